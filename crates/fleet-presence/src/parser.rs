/// Decoding of raw `(topic, payload)` pairs into position, local and presence fixes.
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::{
    config::TopicConfig,
    coord::{to_frame_b, GeoPoint},
    protocol::{
        envelope::{DeviceMessage, RTK, UWB},
        heartbeat::{is_presence_topic, topic_device_id, Heartbeat},
    },
    FPResult,
};

//  _____
// |_   _|   _ _ __   ___  ___
//   | || | | | '_ \ / _ \/ __|
//   | || |_| | |_) |  __/\__ \
//   |_| \__, | .__/ \___||___/
//       |___/|_|

/// RTK fix, converted to the map frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionFix {
    pub device_id: String,
    /// GCJ-02 position, ready for the map tiles.
    pub point: GeoPoint,
    /// Position as reported, WGS84.
    pub raw: GeoPoint,
    pub indoor: bool,
}

/// UWB fix in the site's local Cartesian frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalFix {
    pub device_id: String,
    pub x_cm: f64,
    pub y_cm: f64,
    pub indoor: bool,
}

impl LocalFix {
    pub fn is_origin(&self) -> bool {
        self.x_cm == 0.0 && self.y_cm == 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceEvent {
    pub device_id: String,
    /// Local arrival time.
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Fix {
    Position(PositionFix),
    Local(LocalFix),
    Presence(PresenceEvent),
}

impl Fix {
    pub fn device_id(&self) -> &str {
        match self {
            Fix::Position(f) => &f.device_id,
            Fix::Local(f) => &f.device_id,
            Fix::Presence(e) => &e.device_id,
        }
    }
}

//  ____
// |  _ \ __ _ _ __ ___  ___
// | |_) / _` | '__/ __|/ _ \
// |  __/ (_| | |  \__ \  __/
// |_|   \__,_|_|  |___/\___|

/// RTK receivers report `0` in a coordinate when they have no solution. Such a fix is dropped,
/// never forwarded as a location.
pub fn is_sentinel(lng: f64, lat: f64) -> bool {
    lng == 0.0 || lat == 0.0
}

/// Parse a sensor payload for its RTK reading.
///
/// Returns `Ok(None)` for the no-signal sentinel and `MalformedPayload` when the envelope or the
/// RTK reading is missing or mis-shaped.
pub fn parse_position(payload: &[u8]) -> FPResult<Option<PositionFix>> {
    let msg = DeviceMessage::decode(payload)?;
    position_from(&msg)
}

/// Parse a sensor payload for its UWB reading. No frame conversion is applied.
pub fn parse_local(payload: &[u8]) -> FPResult<LocalFix> {
    let msg = DeviceMessage::decode(payload)?;
    local_from(&msg)
}

fn position_from(msg: &DeviceMessage) -> FPResult<Option<PositionFix>> {
    let (lng, lat) = msg.pair_reading(RTK)?;
    if is_sentinel(lng, lat) {
        debug!("dropping no-signal RTK fix from {}", msg.device_id);
        return Ok(None);
    }
    Ok(Some(PositionFix {
        device_id: msg.device_id.clone(),
        point: to_frame_b(lat, lng),
        raw: GeoPoint::wgs84(lat, lng),
        indoor: msg.is_indoor(),
    }))
}

fn local_from(msg: &DeviceMessage) -> FPResult<LocalFix> {
    let (x_cm, y_cm) = msg.pair_reading(UWB)?;
    Ok(LocalFix {
        device_id: msg.device_id.clone(),
        x_cm,
        y_cm,
        indoor: msg.is_indoor(),
    })
}

/// Topic-aware parser. Holds the channel layout so presence identity can be recovered from
/// topics.
#[derive(Debug, Clone, Default)]
pub struct Parser {
    topics: TopicConfig,
}

impl Parser {
    pub fn new(topics: TopicConfig) -> Self {
        Self { topics }
    }

    pub fn topics(&self) -> &TopicConfig {
        &self.topics
    }

    /// Presence heartbeat. Never fails: the body id wins, then the id carried by the topic, then
    /// the configured unknown id.
    pub fn parse_presence(&self, topic: &str, payload: &[u8], now: DateTime<Utc>) -> PresenceEvent {
        let device_id = Heartbeat::payload_id(payload)
            .or_else(|| self.topic_id(topic))
            .unwrap_or_else(|| {
                warn!("no device identity in presence message on {topic}");
                self.topics.unknown_id.clone()
            });
        PresenceEvent {
            device_id,
            timestamp: now,
        }
    }

    fn topic_id(&self, topic: &str) -> Option<String> {
        match topic_device_id(topic, &self.topics.presence_prefix) {
            Ok(id) => id.map(str::to_string),
            Err(e) => {
                debug!("presence topic {topic}: {e}");
                None
            }
        }
    }

    /// Route a transport message to the right decoder.
    ///
    /// Presence topics yield one presence event. Anything else is decoded as a sensor envelope:
    /// an RTK reading yields a position fix (unless it is the sentinel), a UWB reading yields a
    /// local fix, except that a UWB origin is dropped when the same message carries a valid RTK
    /// fix. A well-formed envelope with no usable fix still yields a presence event, since the
    /// device was heard from.
    pub fn parse(&self, topic: &str, payload: &[u8], now: DateTime<Utc>) -> FPResult<Vec<Fix>> {
        if is_presence_topic(topic, &self.topics.presence_prefix) {
            return Ok(vec![Fix::Presence(self.parse_presence(topic, payload, now))]);
        }

        let msg = DeviceMessage::decode(payload)?;
        let mut fixes = Vec::new();

        let position = match msg.reading(RTK) {
            Some(_) => position_from(&msg)?,
            None => None,
        };
        if msg.reading(UWB).is_some() {
            let local = local_from(&msg)?;
            if local.is_origin() && position.is_some() {
                trace!("UWB origin from {} superseded by RTK fix", msg.device_id);
            } else {
                fixes.push(Fix::Local(local));
            }
        }
        if let Some(position) = position {
            fixes.insert(0, Fix::Position(position));
        }

        if fixes.is_empty() {
            fixes.push(Fix::Presence(PresenceEvent {
                device_id: msg.device_id,
                timestamp: now,
            }));
        }
        Ok(fixes)
    }
}
