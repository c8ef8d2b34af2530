/// Application envelope published by field devices on the sensor channel.
///
/// ```json
/// {"id": "112", "indoor": false, "sens": [
///     {"n": "temperature", "u": "°C", "v": 23.5},
///     {"n": "RTK", "u": "deg", "v": [121.791851, 30.904012]}
/// ]}
/// ```
///
/// The RTK pair is ordered `[longitude, latitude]` in WGS84. The UWB pair is `[x, y]` in
/// centimeters in the site's local Cartesian frame.
use serde::{Deserialize, Serialize};

use super::TelemMsg;
use crate::{Error, FPResult};

/// Satellite RTK position reading.
pub const RTK: &str = "RTK";
/// Ultra-wideband local position reading.
pub const UWB: &str = "UWB";

/// Default topic root for sensor messages; devices publish on `location/sensors/<id>`.
pub const SENSOR_TOPIC_ROOT: &str = "location/sensors";

/// Value of a single reading. Anything other than a number or an array of numbers is kept as
/// raw JSON so one odd channel does not invalidate the whole envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Scalar(f64),
    Array(Vec<f64>),
    Other(serde_json::Value),
}

impl Default for ReadingValue {
    fn default() -> Self {
        ReadingValue::Other(serde_json::Value::Null)
    }
}

impl ReadingValue {
    pub fn pair(a: f64, b: f64) -> Self {
        ReadingValue::Array(vec![a, b])
    }

    /// The value as a 2-element pair, if it has exactly that shape.
    pub fn as_pair(&self) -> Option<(f64, f64)> {
        match self {
            ReadingValue::Array(v) if v.len() == 2 => Some((v[0], v[1])),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    #[serde(rename = "n", alias = "name")]
    pub name: String,
    /// Informational only.
    #[serde(rename = "u", alias = "unit", default)]
    pub unit: String,
    #[serde(rename = "v", alias = "value", default)]
    pub value: ReadingValue,
}

impl SensorReading {
    pub fn new(name: &str, unit: &str, value: ReadingValue) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireMessage")]
pub struct DeviceMessage {
    #[serde(rename = "id")]
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indoor: Option<bool>,
    #[serde(rename = "sens")]
    pub readings: Vec<SensorReading>,
}

// Firmware revisions disagree on the id key; some send both, in which case `id` wins.
#[derive(Deserialize)]
struct WireMessage {
    id: Option<String>,
    #[serde(rename = "deviceId")]
    legacy_id: Option<String>,
    #[serde(default)]
    indoor: Option<bool>,
    #[serde(rename = "sens", alias = "readings", default)]
    readings: Vec<SensorReading>,
}

impl From<WireMessage> for DeviceMessage {
    fn from(wire: WireMessage) -> Self {
        Self {
            device_id: wire.id.or(wire.legacy_id).unwrap_or_default(),
            indoor: wire.indoor,
            readings: wire.readings,
        }
    }
}

impl DeviceMessage {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            indoor: None,
            readings: Vec::new(),
        }
    }

    pub fn with_reading(mut self, reading: SensorReading) -> Self {
        self.readings.push(reading);
        self
    }

    /// Decode and validate an envelope. The device id must be present and non-blank.
    pub fn decode(payload: &[u8]) -> FPResult<Self> {
        let mut msg: DeviceMessage = serde_json::from_slice(payload)?;
        let id = msg.device_id.trim();
        if id.is_empty() {
            return Err(Error::MalformedPayload("empty device id".to_string()));
        }
        if id.len() != msg.device_id.len() {
            msg.device_id = id.to_string();
        }
        Ok(msg)
    }

    /// First reading with the given name.
    pub fn reading(&self, name: &str) -> Option<&SensorReading> {
        self.readings.iter().find(|r| r.name == name)
    }

    /// The reading's value as a pair, or `MalformedPayload` when it is absent or mis-shaped.
    pub fn pair_reading(&self, name: &str) -> FPResult<(f64, f64)> {
        let reading = self
            .reading(name)
            .ok_or_else(|| Error::MalformedPayload(format!("missing {name} reading")))?;
        reading.value.as_pair().ok_or_else(|| {
            Error::MalformedPayload(format!("{name} value is not a 2-element array"))
        })
    }

    /// Explicit `indoor` flag, falling back to whether a UWB fix is present.
    pub fn is_indoor(&self) -> bool {
        self.indoor.unwrap_or_else(|| {
            self.reading(UWB)
                .is_some_and(|r| r.value.as_pair().is_some())
        })
    }
}

impl TelemMsg for DeviceMessage {
    fn from_coords(lat: f64, lon: f64) -> Self {
        DeviceMessage::new("").with_reading(SensorReading::new(
            RTK,
            "deg",
            ReadingValue::pair(lon, lat),
        ))
    }

    fn with_agent_id(mut self, agent_id: &str) -> Self {
        self.device_id = agent_id.to_string();
        self
    }

    fn topic(&self) -> String {
        format!("{SENSOR_TOPIC_ROOT}/{}", self.device_id)
    }

    fn to_bytes(&self) -> FPResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::MalformedPayload(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_decode_mixed_readings() {
        let payload = br#"{"id":"112","sens":[
            {"n":"temperature","u":"C","v":23.5},
            {"n":"humidity","u":"%","v":68},
            {"n":"status","u":"","v":"ok"},
            {"n":"RTK","u":"deg","v":[121.791851,30.904012]}
        ]}"#;
        let msg = DeviceMessage::decode(payload).unwrap();
        assert_eq!(msg.device_id, "112");
        assert_eq!(msg.readings.len(), 4);
        assert_eq!(msg.readings[0].value, ReadingValue::Scalar(23.5));
        assert!(matches!(msg.readings[2].value, ReadingValue::Other(_)));
        assert_eq!(msg.pair_reading(RTK).unwrap(), (121.791851, 30.904012));
        assert!(!msg.is_indoor());
    }

    #[test]
    fn test_decode_aliases() {
        let payload =
            br#"{"deviceId":" d9 ","readings":[{"name":"UWB","unit":"cm","value":[10,20]}]}"#;
        let msg = DeviceMessage::decode(payload).unwrap();
        assert_eq!(msg.device_id, "d9");
        assert_eq!(msg.pair_reading(UWB).unwrap(), (10.0, 20.0));
        assert!(msg.is_indoor());
    }

    #[test]
    fn test_decode_prefers_id_over_device_id() {
        let payload = br#"{"deviceId":"old","id":"new","sens":[]}"#;
        assert_eq!(DeviceMessage::decode(payload).unwrap().device_id, "new");
        let payload = br#"{"id":"new","deviceId":"old"}"#;
        assert_eq!(DeviceMessage::decode(payload).unwrap().device_id, "new");
        let payload = br#"{"id":" ","deviceId":"old"}"#;
        assert!(matches!(
            DeviceMessage::decode(payload),
            Err(Error::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_indoor_flag_overrides() {
        let payload = br#"{"id":"d1","indoor":false,"sens":[{"n":"UWB","v":[1,2]}]}"#;
        let msg = DeviceMessage::decode(payload).unwrap();
        assert!(!msg.is_indoor());
    }

    #[test]
    fn test_decode_rejects() {
        assert!(matches!(
            DeviceMessage::decode(b"not json"),
            Err(Error::MalformedPayload(_))
        ));
        assert!(matches!(
            DeviceMessage::decode(br#"{"sens":[]}"#),
            Err(Error::MalformedPayload(_))
        ));
        assert!(matches!(
            DeviceMessage::decode(br#"{"id":"  ","sens":[]}"#),
            Err(Error::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_pair_reading_shape() {
        let msg = DeviceMessage::new("d1")
            .with_reading(SensorReading::new(RTK, "deg", ReadingValue::Array(vec![1.0])))
            .with_reading(SensorReading::new(UWB, "cm", ReadingValue::Scalar(3.0)));
        assert!(msg.pair_reading(RTK).is_err());
        assert!(msg.pair_reading(UWB).is_err());
        assert!(msg.pair_reading("missing").is_err());
    }

    #[test]
    fn test_telem_msg_serde() {
        let msg = DeviceMessage::from_coords(30.9, 121.7).with_agent_id("whiskey_foxtrot");
        assert_eq!(msg.topic(), "location/sensors/whiskey_foxtrot");
        let bytes = msg.to_bytes().unwrap();
        let msg2 = DeviceMessage::decode(&bytes).unwrap();
        assert_eq!(msg, msg2);
        assert_eq!(msg2.pair_reading(RTK).unwrap(), (121.7, 30.9));
    }
}
