/// Presence heartbeats.
///
/// Devices announce themselves on `online/<id>` (or on the bare `online` topic with the id in the
/// body). The body is optional and may be anything; when it is a JSON object with an `id` field
/// that id wins over the one carried by the topic.
use chrono::{DateTime, Utc};
use nom::{
    bytes::complete::{tag, take_while},
    combinator::opt,
    Finish, IResult,
};
use serde::{Deserialize, Serialize};

use crate::{Error, FPResult};

pub const DEFAULT_PRESENCE_PREFIX: &str = "online";

/// Id assigned to heartbeats that carry no usable identity.
pub const UNKNOWN_DEVICE_ID: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireHeartbeat")]
pub struct Heartbeat {
    #[serde(rename = "id")]
    pub device_id: String,
    /// Sender clock, milliseconds since the epoch. Informational only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
}

#[derive(Deserialize)]
struct WireHeartbeat {
    id: Option<String>,
    #[serde(rename = "deviceId")]
    legacy_id: Option<String>,
    #[serde(default)]
    ts: Option<i64>,
}

impl From<WireHeartbeat> for Heartbeat {
    fn from(wire: WireHeartbeat) -> Self {
        Self {
            device_id: wire.id.or(wire.legacy_id).unwrap_or_default(),
            ts: wire.ts,
        }
    }
}

impl Heartbeat {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            ts: None,
        }
    }

    pub fn at(mut self, ts: DateTime<Utc>) -> Self {
        self.ts = Some(ts.timestamp_millis());
        self
    }

    pub fn topic(&self, prefix: &str) -> String {
        format!("{prefix}/{}", self.device_id)
    }

    pub fn to_bytes(&self) -> FPResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::MalformedPayload(e.to_string()))
    }

    /// Trimmed, non-empty id from a heartbeat body. Bodies that are empty, not JSON or lack an
    /// id yield `None`.
    pub fn payload_id(payload: &[u8]) -> Option<String> {
        let hb: Heartbeat = serde_json::from_slice(payload).ok()?;
        let id = hb.device_id.trim();
        (!id.is_empty()).then(|| id.to_string())
    }
}

/// Whether `topic` belongs to the presence channel rooted at `prefix`.
pub fn is_presence_topic(topic: &str, prefix: &str) -> bool {
    match topic.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Device id carried by a presence topic: the prefix and surrounding `/` separators are stripped.
/// Returns `None` when nothing is left.
pub fn topic_device_id<'a>(topic: &'a str, prefix: &str) -> FPResult<Option<&'a str>> {
    let (_, id) = nom_topic_id(topic, prefix).finish()?;
    Ok((!id.is_empty()).then_some(id))
}

fn nom_topic_id<'a>(topic: &'a str, prefix: &str) -> IResult<&'a str, &'a str> {
    let (rest, _) = opt(tag(prefix))(topic)?;
    let (rest, _) = take_while(|c: char| c == '/')(rest)?;
    Ok(("", rest.trim_end_matches('/')))
}
