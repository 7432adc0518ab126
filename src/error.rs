use std::time::Duration;

use thiserror::Error;

/// A transport-specific failure carried without tying the engine to one BLE stack.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of one acquisition cycle. All of them send the engine back to scanning.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("no glucose meter found within {0:?}")]
    DiscoveryTimeout(Duration),

    #[error("scan failed: {0}")]
    Discovery(#[source] BoxError),

    #[error("connection to {device} failed: {source}")]
    Connection {
        device: String,
        #[source]
        source: BoxError,
    },

    #[error("subscribing to glucose measurements on {device} failed: {source}")]
    Subscription {
        device: String,
        #[source]
        source: BoxError,
    },
}

/// A glucose measurement notification that could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("measurement too short: need {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("glucose concentration {mantissa}e{exponent} is out of range")]
    OutOfRange { mantissa: i16, exponent: i8 },
}

/// Failures of the persistence sink. These never reach the acquisition path.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("readings file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("readings writer has stopped")]
    Closed,

    #[error("malformed readings file line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}
