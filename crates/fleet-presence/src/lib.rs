/// Device telemetry ingestion and presence tracking library.
///
/// Raw `(topic, payload)` pairs from a pub/sub transport are decoded by the [`parser`] into
/// [`parser::Fix`] values, folded into the per-device table owned by [`presence::PresenceTracker`],
/// and presented in [`order`] order. [`pipeline::Pipeline`] ties these together behind an explicit
/// `start` / `stop` lifecycle. Satellite coordinates are converted between WGS84 and GCJ-02 by
/// [`coord`].
use std::sync::Once;

use thiserror::Error;

pub mod config;
pub mod coord;
pub mod model;
pub mod order;
pub mod parser;
pub mod pipeline;
pub mod presence;
pub mod protocol;
pub mod timer;

/// Result type for this library
pub type FPResult<T> = std::result::Result<T, Error>;

/// Error type for this library
#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid coordinate: {0}")]
    InvalidCoord(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Pipeline is stopped")]
    Stopped,
}

impl From<nom::error::Error<&str>> for Error {
    fn from(err: nom::error::Error<&str>) -> Self {
        Error::ParseError(format!("{:?}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::MalformedPayload(err.to_string())
    }
}

/// Test binary helper to init tracing. This is usually the responsibility of the consumer of the
/// library crate.
pub fn lazy_init_tracing() {
    {
        static INIT: Once = Once::new();
        &INIT
    }
    .call_once(|| {
        tracing_subscriber::fmt::init();
    });
}
