/// Simulated devices, used to generate sensor and heartbeat traffic for demos and tests.
///
/// Initial version is not fully tested outside of the northern and eastern hemispheres.
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::{
    coord::{BBoxWGS, Heading, Point2d},
    protocol::{heartbeat::Heartbeat, TelemMsg},
    FPResult,
};

//  _____
// |_   _|   _ _ __   ___  ___
//   | || | | | '_ \ / _ \/ __|
//   | || |_| | |_) |  __/\__ \
//   |_| \__, | .__/ \___||___/
//       |___/|_|

/// API for stream of telemetry messages.
pub trait TelemStream<M>
where
    M: TelemMsg,
{
    fn next(&mut self, delta_t: StepDelta) -> FPResult<M>;
}

/// Time since the previous message, with [`Default`] and conversion from [`Duration`] for
/// convenience.
pub struct StepDelta {
    msec: u32,
}

impl Default for StepDelta {
    fn default() -> Self {
        Self { msec: 1000 }
    }
}

impl From<Duration> for StepDelta {
    fn from(d: Duration) -> Self {
        Self {
            msec: u32::try_from(d.as_millis()).unwrap_or(u32::MAX),
        }
    }
}

impl StepDelta {
    pub fn seconds(&self) -> f32 {
        self.msec as f32 / 1000.0
    }
}

/// Fleet ids in the `device-001` style used by the field simulators.
pub fn fleet_ids(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("device-{i:03}")).collect()
}

/// One heartbeat per device as `(topic, payload)` pairs.
pub fn heartbeat_fleet(
    ids: &[String],
    prefix: &str,
    now: DateTime<Utc>,
) -> FPResult<Vec<(String, Vec<u8>)>> {
    ids.iter()
        .map(|id| {
            let hb = Heartbeat::new(id).at(now);
            Ok((hb.topic(prefix), hb.to_bytes()?))
        })
        .collect()
}

//  ____  _                 _        __  __           _      _
// / ___|(_)_ __ ___  _ __ | | ___  |  \/  | ___   __| | ___| |
// \___ \| | '_ ` _ \| '_ \| |/ _ \ | |\/| |/ _ \ / _` |/ _ \ |
//  ___) | | | | | | | |_) | |  __/ | |  | | (_) | (_| |  __/ |
// |____/|_|_| |_| |_| .__/|_|\___| |_|  |_|\___/ \__,_|\___|_|
//                   |_|

/// Super simple device motion model, bounded to a box. Not realistic.
pub struct RandomWalk {
    device_id: String,
    bbox: BBoxWGS,
    max_velocity_mps: f32,
    pub(crate) last_pos: Point2d,
    heading: Heading,
}

impl RandomWalk {
    pub fn new(device_id: &str, bbox: BBoxWGS, max_velocity_mps: f32) -> Self {
        let start_pos = bbox.midpoint();
        let random_deg = rand::random::<f32>() * 360.0;
        Self {
            device_id: device_id.to_string(),
            bbox,
            max_velocity_mps,
            last_pos: start_pos,
            heading: Heading(random_deg),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl<M> TelemStream<M> for RandomWalk
where
    M: TelemMsg,
{
    fn next(&mut self, delta_t: StepDelta) -> FPResult<M> {
        let vel = rand::random::<f32>() * self.max_velocity_mps;

        let turn = (rand::random::<f32>() - 0.5) * 10.0;
        self.heading.rot(turn);

        // calculate meters to move then convert to degrees
        let dist_m = (delta_t.seconds() * vel) as f64;
        let delta_x = dist_m * self.heading.to_radians().cos() as f64;
        let delta_y = dist_m * self.heading.to_radians().sin() as f64;
        let delta_lat = delta_y / BBoxWGS::meter_per_deg_lat(self.last_pos.0)?;
        let delta_lon = delta_x / BBoxWGS::meter_per_deg_lon(self.last_pos.0)?;
        let new_lat = self.last_pos.0 + delta_lat;
        let new_lon = self.last_pos.1 + delta_lon;

        // clamp to bbox, turning around at the edge
        let next = Point2d(
            new_lat
                .max(self.bbox.lower_right.0)
                .min(self.bbox.upper_left.0),
            new_lon
                .max(self.bbox.upper_left.1)
                .min(self.bbox.lower_right.1),
        );
        if !self.bbox.contains(Point2d(new_lat, new_lon)) {
            debug!(
                "{} out of bounds at ({:.5}, {:.5}), turning",
                self.device_id, new_lat, new_lon
            );
            self.heading.rot(180.0);
        }
        self.last_pos = next;
        Ok(M::from_coords(next.0, next.1).with_agent_id(&self.device_id))
    }
}
