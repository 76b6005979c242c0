//! Error handling for the cooling telemetry service
//!
//! The variants follow the failure taxonomy of the device layer: transport
//! and decode problems are transient and recovered per-cycle, the lookup
//! failures point at configuration or programming mistakes and are surfaced
//! loudly, and nothing here is ever fatal to the process.

use thiserror::Error;

/// Service error type
#[derive(Error, Debug, Clone)]
pub enum CryoSrvError {
    /// Connect/write/read/timeout failure against a device bridge
    #[error("Transport error: {0}")]
    Transport(String),

    /// Reply bytes were not decodable text or did not match the family grammar
    #[error("Decode error: {0}")]
    Decode(String),

    /// Device type is not in the supported catalog
    #[error("Unknown device kind: {0}")]
    UnknownDeviceKind(String),

    /// Symbolic command is not in the device family's table
    #[error("Unknown command: {command} for {devtype}")]
    UnknownCommand { devtype: String, command: String },

    /// Command value failed type coercion or is outside its enumerated set
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Inbound command references a device that is not configured
    #[error("Unknown destination: {0}")]
    UnknownDestination(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Message bus errors
    #[error("Bus error: {0}")]
    Bus(String),

    /// Time-series storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for the service
pub type Result<T> = std::result::Result<T, CryoSrvError>;

impl CryoSrvError {
    pub fn transport(msg: impl Into<String>) -> Self {
        CryoSrvError::Transport(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        CryoSrvError::Decode(msg.into())
    }

    pub fn unknown_command(devtype: impl Into<String>, command: impl Into<String>) -> Self {
        CryoSrvError::UnknownCommand {
            devtype: devtype.into(),
            command: command.into(),
        }
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CryoSrvError::InvalidArgument(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CryoSrvError::Config(msg.into())
    }

    /// True for failures that only cost the current poll cycle and must
    /// leave the job scheduled.
    pub fn is_transient(&self) -> bool {
        matches!(self, CryoSrvError::Transport(_) | CryoSrvError::Decode(_))
    }
}

impl From<std::io::Error> for CryoSrvError {
    fn from(err: std::io::Error) -> Self {
        CryoSrvError::Transport(err.to_string())
    }
}

impl From<errors::CryoError> for CryoSrvError {
    fn from(err: errors::CryoError) -> Self {
        match err {
            errors::CryoError::Configuration(msg) => CryoSrvError::Config(msg),
            errors::CryoError::Broker(msg) => CryoSrvError::Bus(msg),
            errors::CryoError::Storage(msg) => CryoSrvError::Storage(msg),
            other => CryoSrvError::Internal(other.to_string()),
        }
    }
}
