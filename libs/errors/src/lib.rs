//! Unified error handling for cryosrv services
//!
//! This crate provides the workspace-wide error type shared by the service
//! crates and the support libraries. Service crates layer their own, more
//! specific error enums on top of this one where it helps readability.

use thiserror::Error;

/// Workspace-wide error type
#[derive(Debug, Error)]
pub enum CryoError {
    // ======================================
    // Configuration Errors
    // ======================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ======================================
    // Communication Errors
    // ======================================
    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Connection failed: {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    #[error("Broker error: {0}")]
    Broker(String),

    // ======================================
    // Storage Errors
    // ======================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Write failed: {target}: {error}")]
    WriteFailed { target: String, error: String },

    // ======================================
    // File & I/O Errors
    // ======================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {context}: {error}")]
    ParseError { context: String, error: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ======================================
    // Service & Runtime Errors
    // ======================================
    #[error("Service startup failed: {0}")]
    StartupFailed(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // ======================================
    // Catch-all for other errors
    // ======================================
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using CryoError
pub type CryoResult<T> = Result<T, CryoError>;

impl CryoError {
    /// True when the error is transient and the operation may be retried
    /// on its next natural opportunity without operator intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Communication(_)
                | Self::ConnectionFailed { .. }
                | Self::Timeout(_)
                | Self::Broker(_)
                | Self::Storage(_)
                | Self::WriteFailed { .. }
        )
    }

    /// Shorthand constructor for configuration errors
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Shorthand constructor for communication errors
    pub fn comm(msg: impl Into<String>) -> Self {
        Self::Communication(msg.into())
    }

    /// Shorthand constructor for storage errors
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(CryoError::Timeout("gauge".into()).is_recoverable());
        assert!(CryoError::Broker("lost connection".into()).is_recoverable());
        assert!(!CryoError::Configuration("bad interval".into()).is_recoverable());
        assert!(!CryoError::Internal("bug".into()).is_recoverable());
    }

    #[test]
    fn display_includes_context() {
        let err = CryoError::ConnectionFailed {
            endpoint: "tcp://gauge:10001".into(),
            reason: "refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Connection failed: tcp://gauge:10001: refused"
        );
    }
}
