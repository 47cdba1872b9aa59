//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout procgate.
//! All errors are structured and map to stable error codes plus the JSON-RPC
//! numeric codes used in wire responses.
//!
//! # Error Categories
//! - `InvalidRequest`: malformed JSON-RPC envelope
//! - `InvalidParameters`: bad argument names or malformed v1 envelope
//! - `UnknownMethod`: zero catalog matches for the call signature
//! - `Ambiguous`: more than one catalog match for the call signature
//! - `ProcedureError`: the procedure raised; carries the sqlstate
//! - `InternalError`: result-shape violation
//! - `ConnectionLost`: the connection facade exhausted its retry budget
//! - `ConfigError`: service file or gateway settings errors

use thiserror::Error;

/// Main error type for procgate operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Malformed JSON-RPC envelope
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Argument name fails the identifier rules, or the v1 envelope is malformed
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// No procedure in the catalog matches the call signature
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// More than one procedure matches the call signature
    #[error("Ambiguous method: {0}")]
    Ambiguous(String),

    /// The procedure raised an error
    #[error("Procedure error ({sqlstate}): {message}")]
    ProcedureError { sqlstate: String, message: String },

    /// The rowset violated the declared result shape
    #[error("Internal error: {0}")]
    InternalError(String),

    /// The facade could not re-establish a database connection
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Service file or gateway settings error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl GatewayError {
    /// Convert error to a stable code string for JSON output
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::InvalidParameters(_) => "INVALID_PARAMETERS",
            Self::UnknownMethod(_) => "UNKNOWN_METHOD",
            Self::Ambiguous(_) => "AMBIGUOUS_METHOD",
            Self::ProcedureError { .. } => "PROCEDURE_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
            Self::ConnectionLost(_) => "CONNECTION_LOST",
            Self::ConfigError(_) => "CONFIG_ERROR",
        }
    }

    /// JSON-RPC numeric code for this error kind
    ///
    /// `ProcedureError` is not mapped here: its client-visible code comes
    /// from `get_api_error_code` via the error mapper.
    #[must_use]
    pub const fn jsonrpc_code(&self) -> i32 {
        match self {
            Self::InvalidRequest(_) => -32600,
            Self::UnknownMethod(_) | Self::Ambiguous(_) => -32601,
            Self::InvalidParameters(_) => -32602,
            Self::ProcedureError { .. }
            | Self::InternalError(_)
            | Self::ConnectionLost(_)
            | Self::ConfigError(_) => -32603,
        }
    }

    /// Get the human-readable error message
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Create an invalid parameters error
    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::InvalidParameters(message.into())
    }

    /// Create an unknown method error
    pub fn unknown_method(message: impl Into<String>) -> Self {
        Self::UnknownMethod(message.into())
    }

    /// Create an ambiguous method error
    pub fn ambiguous(message: impl Into<String>) -> Self {
        Self::Ambiguous(message.into())
    }

    /// Create a procedure error
    pub fn procedure_error(sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProcedureError { sqlstate: sqlstate.into(), message: message.into() }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }

    /// Create a connection lost error
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost(message.into())
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }
}

/// Result type alias for procgate operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(GatewayError::invalid_request("x").error_code(), "INVALID_REQUEST");
        assert_eq!(GatewayError::invalid_parameters("x").error_code(), "INVALID_PARAMETERS");
        assert_eq!(GatewayError::unknown_method("x").error_code(), "UNKNOWN_METHOD");
        assert_eq!(GatewayError::ambiguous("x").error_code(), "AMBIGUOUS_METHOD");
        assert_eq!(GatewayError::procedure_error("P0001", "x").error_code(), "PROCEDURE_ERROR");
        assert_eq!(GatewayError::internal("x").error_code(), "INTERNAL_ERROR");
        assert_eq!(GatewayError::connection_lost("x").error_code(), "CONNECTION_LOST");
        assert_eq!(GatewayError::config_error("x").error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_jsonrpc_codes() {
        assert_eq!(GatewayError::invalid_request("x").jsonrpc_code(), -32600);
        assert_eq!(GatewayError::unknown_method("x").jsonrpc_code(), -32601);
        assert_eq!(GatewayError::ambiguous("x").jsonrpc_code(), -32601);
        assert_eq!(GatewayError::invalid_parameters("x").jsonrpc_code(), -32602);
        assert_eq!(GatewayError::internal("x").jsonrpc_code(), -32603);
        assert_eq!(GatewayError::connection_lost("x").jsonrpc_code(), -32603);
    }

    #[test]
    fn test_procedure_error_fields() {
        let err = GatewayError::procedure_error("P0001", "ERROR_INSUFFICIENT_FUNDS");
        assert!(matches!(err, GatewayError::ProcedureError { .. }));
        assert!(err.message().contains("P0001"));
        assert!(err.message().contains("ERROR_INSUFFICIENT_FUNDS"));
    }

    #[test]
    fn test_error_messages() {
        let err = GatewayError::unknown_method("get_user_frends(_userid)");
        assert!(err.message().contains("get_user_frends"));

        let err = GatewayError::connection_lost("retry budget exhausted");
        assert!(err.message().contains("retry budget exhausted"));
    }
}
