/// Coordinate types and utilities, including the WGS84 <-> GCJ-02 datum shift applied by the
/// regional mapping services.
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{Error, FPResult};

//  _____
// |_   _|   _ _ __   ___  ___
//   | || | | | '_ \ / _ \/ __|
//   | || |_| | |_) |  __/\__ \
//   |_| \__, | .__/ \___||___/
//       |___/|_|

#[derive(Debug, Copy, Clone)]
pub struct Point2d(pub f64, pub f64);

/// Geodetic reference frame of a [`GeoPoint`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Public satellite frame, as reported by the RTK receivers.
    Wgs84,
    /// Regionally obfuscated frame used by the local map tiles.
    Gcj02,
}

/// Latitude / longitude pair, in degrees, tagged with its reference frame.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    pub frame: Frame,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64, frame: Frame) -> Self {
        Self { lat, lng, frame }
    }

    pub fn wgs84(lat: f64, lng: f64) -> Self {
        Self::new(lat, lng, Frame::Wgs84)
    }

    pub fn gcj02(lat: f64, lng: f64) -> Self {
        Self::new(lat, lng, Frame::Gcj02)
    }
}

/// Bounding box rectangle with corners in WGS 84 coordinates.
pub struct BBoxWGS {
    pub upper_left: Point2d,
    pub lower_right: Point2d,
}

impl BBoxWGS {
    pub fn new(upper_left: Point2d, lower_right: Point2d) -> FPResult<Self> {
        Self::validate_lat_lon(upper_left)?;
        Self::validate_lat_lon(lower_right)?;
        Ok(Self {
            upper_left,
            lower_right,
        })
    }

    pub fn midpoint(&self) -> Point2d {
        Point2d(
            (self.upper_left.0 + self.lower_right.0) / 2.0,
            (self.upper_left.1 + self.lower_right.1) / 2.0,
        )
    }

    pub fn contains(&self, coord: Point2d) -> bool {
        (self.lower_right.0..=self.upper_left.0).contains(&coord.0)
            && (self.upper_left.1..=self.lower_right.1).contains(&coord.1)
    }

    fn validate_lat_lon(coord: Point2d) -> FPResult<()> {
        Self::validate_lat(coord.0)?;
        Self::validate_lon(coord.1)?;
        Ok(())
    }

    fn validate_lat(lat: f64) -> FPResult<()> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(Error::InvalidCoord(format!("latitude {lat}")));
        }
        Ok(())
    }

    fn validate_lon(lon: f64) -> FPResult<()> {
        if !(-180.0..=180.0).contains(&lon) {
            return Err(Error::InvalidCoord(format!("longitude {lon}")));
        }
        Ok(())
    }

    pub fn meter_per_deg_lat(lat_deg: f64) -> FPResult<f64> {
        Self::validate_lat(lat_deg)?;
        // 111132.92 - 559.82 * cos(2 * lat_rad) + 1.175 * cos(4 * lat_rad) - 0.0023 * cos(6 * lat_rad)
        // Source: https://en.wikipedia.org/wiki/Geographic_coordinate_system
        let lat_rad = lat_deg.to_radians();
        Ok(
            111132.92 - 559.82 * (2.0 * lat_rad).cos() + 1.175 * (4.0 * lat_rad).cos()
                - 0.0023 * (6.0 * lat_rad).cos(),
        )
    }

    pub fn meter_per_deg_lon(lat_deg: f64) -> FPResult<f64> {
        Self::validate_lat(lat_deg)?;
        let lat_rad = lat_deg.to_radians();
        // m = 111412.84 * cos(lat_rad) - 93.5 * cos(3 * lat_rad) + 0.118 * cos(5 * lat_rad)
        Ok(
            111412.84 * lat_rad.cos() - 93.5 * (3.0 * lat_rad).cos()
                + 0.118 * (5.0 * lat_rad).cos(),
        )
    }
}

pub struct Heading(pub f32);

impl Heading {
    pub fn rot(&mut self, deg_cw: f32) {
        self.0 += deg_cw;
        if self.0 < 0.0 {
            self.0 += 360.0;
        } else if self.0 >= 360.0 {
            self.0 -= 360.0;
        }
    }
    pub fn to_radians(&self) -> f32 {
        self.0.to_radians()
    }
}

impl From<f32> for Heading {
    fn from(deg: f32) -> Self {
        Self(deg)
    }
}

//   ____  ____ _       ___ ____
//  / ___|/ ___| |     / _ \___ \
// | |  _| |_  | |____| | | |__) |
// | |_| |  _| | |____| |_| / __/
//  \____|_|   |_|     \___/_____|

/// Semi-major axis used by the obfuscation, in meters. This is the WGS84 value.
pub const EARTH_R: f64 = 6378137.0;
/// First eccentricity squared.
pub const EE: f64 = 0.00669342162296594323;

pub const COVERAGE_MIN_LNG: f64 = 72.004;
pub const COVERAGE_MAX_LNG: f64 = 137.8347;
pub const COVERAGE_MIN_LAT: f64 = 0.8293;
pub const COVERAGE_MAX_LAT: f64 = 55.8271;

const EXACT_MAX_ITERATIONS: usize = 30;
const EXACT_THRESHOLD: f64 = 1e-6;

/// True when the point lies outside the region where the obfuscation is applied.
pub fn is_outside_coverage(lat: f64, lng: f64) -> bool {
    if !(COVERAGE_MIN_LNG..=COVERAGE_MAX_LNG).contains(&lng) {
        return true;
    }
    !(COVERAGE_MIN_LAT..=COVERAGE_MAX_LAT).contains(&lat)
}

// Distortion polynomial in the normalized coordinates x = lng - 105, y = lat - 35. Returns the
// raw (lat, lng) offsets in meters before ellipsoid scaling. Term order is significant: map tiles
// are calibrated to this exact sequence of floating point operations.
fn distortion(x: f64, y: f64) -> Point2d {
    let xy = x * y;
    let abs_x = x.abs().sqrt();
    let x_pi = x * PI;
    let y_pi = y * PI;
    let d = 20.0 * (6.0 * x_pi).sin() + 20.0 * (2.0 * x_pi).sin();

    let mut lat = d;
    let mut lng = d;

    lat += 20.0 * y_pi.sin() + 40.0 * (y_pi / 3.0).sin();
    lng += 20.0 * x_pi.sin() + 40.0 * (x_pi / 3.0).sin();

    lat += 160.0 * (y_pi / 12.0).sin() + 320.0 * (y_pi / 30.0).sin();
    lng += 150.0 * (x_pi / 12.0).sin() + 300.0 * (x_pi / 30.0).sin();

    lat *= 2.0 / 3.0;
    lng *= 2.0 / 3.0;

    lat += -100.0 + 2.0 * x + 3.0 * y + 0.2 * y * y + 0.1 * xy + 0.2 * abs_x;
    lng += 300.0 + x + 2.0 * y + 0.1 * x * x + 0.1 * xy + 0.1 * abs_x;

    Point2d(lat, lng)
}

/// Offset in degrees (lat, lng) that the obfuscation adds at the given point.
fn offset(lat: f64, lng: f64) -> Point2d {
    let Point2d(d_lat, d_lng) = distortion(lng - 105.0, lat - 35.0);
    let rad_lat = lat / 180.0 * PI;
    let magic = rad_lat.sin();
    let sqrt_magic = (1.0 - EE * magic * magic).sqrt();
    let lat_delta = (d_lat * 180.0) / ((EARTH_R * (1.0 - EE)) / (magic * sqrt_magic) * PI);
    let lng_delta = (d_lng * 180.0) / (EARTH_R / sqrt_magic * rad_lat.cos() * PI);
    Point2d(lat_delta, lng_delta)
}

/// WGS84 -> GCJ-02. Points outside the coverage region are returned unchanged.
pub fn to_frame_b(lat: f64, lng: f64) -> GeoPoint {
    if is_outside_coverage(lat, lng) {
        return GeoPoint::gcj02(lat, lng);
    }
    let Point2d(d_lat, d_lng) = offset(lat, lng);
    GeoPoint::gcj02(lat + d_lat, lng + d_lng)
}

/// GCJ-02 -> WGS84, single step. The offset is evaluated at the obfuscated point, so the result
/// is only accurate to a few meters; see [`to_frame_a_exact`].
pub fn to_frame_a(lat: f64, lng: f64) -> GeoPoint {
    if is_outside_coverage(lat, lng) {
        return GeoPoint::wgs84(lat, lng);
    }
    let Point2d(d_lat, d_lng) = offset(lat, lng);
    GeoPoint::wgs84(lat - d_lat, lng - d_lng)
}

/// GCJ-02 -> WGS84 by fixed-point iteration.
///
/// Each step re-evaluates the offset at the current estimate and subtracts it from the original
/// obfuscated point. Stops after 30 iterations or once neither axis moves by more than `1e-6`
/// degrees, returning the last estimate either way. An estimate that lands outside the coverage
/// region has no obfuscated preimage, so the input is returned unchanged in that case.
pub fn to_frame_a_exact(lat: f64, lng: f64) -> GeoPoint {
    let mut new_lat = lat;
    let mut new_lng = lng;

    for i in 0..EXACT_MAX_ITERATIONS {
        let (old_lat, old_lng) = (new_lat, new_lng);
        let Point2d(d_lat, d_lng) = offset(new_lat, new_lng);
        new_lat = lat - d_lat;
        new_lng = lng - d_lng;
        if (old_lat - new_lat).abs().max((old_lng - new_lng).abs()) < EXACT_THRESHOLD {
            trace!("frame A estimate converged after {} iterations", i + 1);
            break;
        }
    }

    if is_outside_coverage(new_lat, new_lng) {
        return GeoPoint::wgs84(lat, lng);
    }
    GeoPoint::wgs84(new_lat, new_lng)
}
