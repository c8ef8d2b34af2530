/// Pipeline configuration.
///
/// Durations are expressed in milliseconds when (de)serialized. Every field has a default, so an
/// empty JSON object is a valid configuration.
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    protocol::{
        envelope::SENSOR_TOPIC_ROOT,
        heartbeat::{DEFAULT_PRESENCE_PREFIX, UNKNOWN_DEVICE_ID},
    },
    Error, FPResult,
};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub presence: PresenceConfig,
    pub topics: TopicConfig,
}

impl PipelineConfig {
    pub fn from_json(s: &str) -> FPResult<Self> {
        let config: PipelineConfig =
            serde_json::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FPResult<()> {
        self.presence.validate()?;
        self.topics.validate()
    }
}

/// Liveness timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Silence after which a device is shown offline.
    #[serde(rename = "offline_after_ms", with = "millis")]
    pub offline_after: Duration,
    /// Silence after which a device is forgotten.
    #[serde(rename = "evict_after_ms", with = "millis")]
    pub evict_after: Duration,
    /// Period of the re-sort tick that picks up passive offline transitions.
    #[serde(rename = "resort_every_ms", with = "millis")]
    pub resort_every: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            offline_after: Duration::from_secs(5),
            evict_after: Duration::from_secs(60),
            resort_every: Duration::from_secs(5),
        }
    }
}

impl PresenceConfig {
    pub fn validate(&self) -> FPResult<()> {
        if self.offline_after.is_zero() || self.evict_after.is_zero() || self.resort_every.is_zero()
        {
            return Err(Error::Config("durations must be non-zero".to_string()));
        }
        if self.offline_after >= self.evict_after {
            return Err(Error::Config(format!(
                "offline_after ({:?}) must be shorter than evict_after ({:?})",
                self.offline_after, self.evict_after
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Root of the presence channel, without trailing separator.
    pub presence_prefix: String,
    /// Subscription filter for the sensor channel. Informational for the transport
    /// collaborator; any non-presence topic is decoded as a sensor message.
    pub sensor_filter: String,
    pub unknown_id: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            presence_prefix: DEFAULT_PRESENCE_PREFIX.to_string(),
            sensor_filter: format!("{SENSOR_TOPIC_ROOT}/#"),
            unknown_id: UNKNOWN_DEVICE_ID.to_string(),
        }
    }
}

impl TopicConfig {
    pub fn validate(&self) -> FPResult<()> {
        if self.presence_prefix.is_empty() || self.presence_prefix.ends_with('/') {
            return Err(Error::Config(format!(
                "invalid presence prefix {:?}",
                self.presence_prefix
            )));
        }
        if self.unknown_id.is_empty() {
            return Err(Error::Config("unknown_id must not be empty".to_string()));
        }
        Ok(())
    }
}

/// `now + d`, saturating at the latest representable instant.
pub(crate) fn deadline(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(d)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.presence.offline_after, Duration::from_secs(5));
        assert_eq!(config.presence.evict_after, Duration::from_secs(60));
        assert_eq!(config.presence.resort_every, Duration::from_secs(5));
        assert_eq!(config.topics.presence_prefix, "online");
        assert_eq!(config.topics.sensor_filter, "location/sensors/#");
        assert_eq!(config.topics.unknown_id, "unknown");
    }

    #[test]
    fn test_partial_override() {
        let config = PipelineConfig::from_json(
            r#"{"presence":{"offline_after_ms":2000},"topics":{"presence_prefix":"alive"}}"#,
        )
        .unwrap();
        assert_eq!(config.presence.offline_after, Duration::from_secs(2));
        assert_eq!(config.presence.evict_after, Duration::from_secs(60));
        assert_eq!(config.topics.presence_prefix, "alive");
        assert_eq!(config.topics.unknown_id, "unknown");
    }

    #[test]
    fn test_validation() {
        let cases = [
            r#"{"presence":{"offline_after_ms":0}}"#,
            r#"{"presence":{"offline_after_ms":60000,"evict_after_ms":5000}}"#,
            r#"{"topics":{"presence_prefix":"online/"}}"#,
            r#"{"topics":{"unknown_id":""}}"#,
            r#"{"presence":{"offline_after_ms":"soon"}}"#,
        ];
        for case in cases {
            assert!(
                matches!(PipelineConfig::from_json(case), Err(Error::Config(_))),
                "{case}"
            );
        }
    }

    #[test]
    fn test_serialize_millis() {
        let s = serde_json::to_string(&PresenceConfig::default()).unwrap();
        assert_eq!(
            s,
            r#"{"offline_after_ms":5000,"evict_after_ms":60000,"resort_every_ms":5000}"#
        );
    }

    #[test]
    fn test_deadline_saturates() {
        let now = DateTime::from_timestamp(0, 0).unwrap();
        assert_eq!(
            deadline(now, Duration::from_secs(5)),
            DateTime::from_timestamp(5, 0).unwrap()
        );
        assert_eq!(
            deadline(DateTime::<Utc>::MAX_UTC, Duration::from_secs(1)),
            DateTime::<Utc>::MAX_UTC
        );
    }
}
