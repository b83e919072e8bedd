//! Error types for the EZ1-MQTT bridge
//!
//! Uses thiserror for ergonomic error definitions.
//! These errors can be converted to anyhow::Error in the main application.

use std::time::Duration;

/// Any failure of a device call.
///
/// Errors are `Clone + PartialEq` so the coordinator can tell a repeated failure
/// from a new one.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Caller supplied an out-of-domain value. Never reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid power limit: expected {min}..={max} W, got {limit} W")]
    PowerLimitOutOfRange { limit: i64, min: i64, max: i64 },

    #[error(
        "Invalid power status '{0}': use '0' or 'ON' to start the inverter, '1', 'SLEEP' or 'OFF' to stop it"
    )]
    UnknownPowerStatus(String),
}

/// The device could not be reached or answered with a non-2xx status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error {status} from '{endpoint}'")]
    Status { endpoint: String, status: u16 },

    #[error("Request to '{endpoint}' timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("Request to '{endpoint}' failed: {reason}")]
    Request { endpoint: String, reason: String },
}

/// The device answered, but not in the shape the contract promises.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Response from '{endpoint}' is not valid JSON: {reason}")]
    InvalidJson { endpoint: String, reason: String },

    #[error("Response from '{endpoint}' has no 'data' object")]
    MissingData { endpoint: String },

    #[error("Response from '{endpoint}' is missing field '{field}'")]
    MissingField { endpoint: String, field: String },

    #[error("Response from '{endpoint}' has invalid value for '{field}': {value}")]
    InvalidValue {
        endpoint: String,
        field: String,
        value: String,
    },
}

impl DeviceError {
    /// Whether a scheduled poll can recover from this error on a later cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DeviceError::Transport(_) | DeviceError::Protocol(_))
    }
}

/// Polling coordinator errors
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Invalid coordinator configuration: {0}")]
    InvalidConfig(String),
}

/// MQTT connection and publishing errors
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("Failed to publish message to topic '{topic}': {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("Failed to serialize data: {error:?}")]
    SerializationError { error: serde_json::Error },

    #[error("MQTT client error: {0}")]
    ClientError(String),
}
