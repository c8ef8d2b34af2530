pub mod envelope;
pub mod heartbeat;

use crate::FPResult;

/// Trait implemented by payload types that carry a device position, used to generate
/// telemetry messages.
pub trait TelemMsg {
    fn from_coords(lat: f64, lon: f64) -> Self;
    fn with_agent_id(self, agent_id: &str) -> Self;
    /// Topic the message is published on.
    fn topic(&self) -> String;
    fn to_bytes(&self) -> FPResult<Vec<u8>>;
}
