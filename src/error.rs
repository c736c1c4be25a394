//! Error handling for the CANSimple client
//!
//! This module provides the error type and result alias used throughout the
//! crate. Protocol failures carry enough context to decide whether a retry at
//! the caller's level makes sense; none are retried internally.

use thiserror::Error;

use crate::value::EndpointValue;

/// CANSimple client error type
#[derive(Error, Debug, Clone)]
pub enum CanSimpleError {
    /// Payload too short or unparsable
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// No matching frame arrived within the deadline
    #[error("Timed out waiting for reply to opcode {opcode:#04x} from node {node_id}")]
    ReplyTimeout { node_id: u8, opcode: u8 },

    /// Endpoint map does not match the device's reported versions
    #[error("Version mismatch: {0}")]
    VersionMismatch(String),

    /// Path not present in the endpoint map
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    /// Device rejected or altered a written value
    #[error("Failed to write {path}: device returned {actual}, expected {expected}")]
    WriteVerificationFailed {
        path: String,
        expected: EndpointValue,
        actual: EndpointValue,
    },

    /// Required nodes did not reach the target state in time
    #[error("Barrier timed out waiting for nodes {pending:?}")]
    BarrierTimeout { pending: Vec<u8> },

    /// Bus transport errors
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Not connected error
    #[error("Not connected")]
    NotConnected,

    /// Invalid data format or content errors
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Invalid parameter errors
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Data serialization and deserialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Input/Output operation errors
    #[error("IO error: {0}")]
    IoError(String),
}

/// Result type alias for the CANSimple client
pub type Result<T> = std::result::Result<T, CanSimpleError>;

impl From<std::io::Error> for CanSimpleError {
    fn from(err: std::io::Error) -> Self {
        CanSimpleError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for CanSimpleError {
    fn from(err: serde_json::Error) -> Self {
        CanSimpleError::SerializationError(format!("JSON error: {err}"))
    }
}

// Helper methods for creating errors
impl CanSimpleError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        CanSimpleError::MalformedFrame(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        CanSimpleError::TransportError(msg.into())
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        CanSimpleError::InvalidData(msg.into())
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        CanSimpleError::InvalidParameter(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CanSimpleError::ConfigError(msg.into())
    }

    pub fn version_mismatch(msg: impl Into<String>) -> Self {
        CanSimpleError::VersionMismatch(msg.into())
    }

    pub fn unknown_endpoint(path: impl Into<String>) -> Self {
        CanSimpleError::UnknownEndpoint(path.into())
    }
}
