//! Error Mapping
//!
//! Procedures signal client-visible failures by raising with a message that
//! starts with a textual tag, `ERROR_<UPPER_SNAKE>`, optionally behind the
//! literal driver prefix `ERROR:  `. The mapper extracts the tag, asks the
//! external catalog function `get_api_error_code` for the client-visible
//! `(error_name, numeric_code)` pair, and falls back to
//! `("ERROR_UNKNOWN", 620)` when extraction or lookup fails.
//!
//! For v1 calls the `{message, code}` payload is additionally signed via
//! the external `openssl_sign` procedure; when signing itself fails the
//! signed envelope is simply omitted.

use serde::Serialize;
use serde_json::{json, Value};

use crate::catalog;
use crate::error::GatewayError;
use crate::facade::Facade;

/// Fallback when a raised error carries no known tag
pub const UNKNOWN_ERROR_NAME: &str = "ERROR_UNKNOWN";
pub const UNKNOWN_ERROR_CODE: i32 = 620;

/// Client-visible error object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappedError {
    pub name: &'static str,
    pub message: String,
    pub code: i32,
}

impl MappedError {
    fn new(message: impl Into<String>, code: i32) -> Self {
        Self { name: "JSONRPCError", message: message.into(), code }
    }
}

/// Extract the `ERROR_<UPPER_SNAKE>` tag from a raised message
#[must_use]
pub fn extract_error_tag(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("ERROR:  ").unwrap_or(message);
    if !rest.starts_with("ERROR_") {
        return None;
    }

    let end = rest
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_uppercase() || c.is_ascii_digit() || *c == '_'))
        .map_or(rest.len(), |(i, _)| i);

    // A bare "ERROR_" prefix with nothing behind it is not a tag
    let tag = &rest[..end];
    if tag == "ERROR_" {
        None
    } else {
        Some(tag)
    }
}

/// Map a procedure error onto the client taxonomy
///
/// The lookup runs over the same facade as the failed call; if it fails in
/// turn, the unknown-error fallback applies.
pub async fn map_procedure_error(facade: &mut Facade, error: &GatewayError) -> MappedError {
    let tag = match error {
        GatewayError::ProcedureError { message, .. } => extract_error_tag(message),
        _ => None,
    };

    let Some(tag) = tag else {
        return MappedError::new(UNKNOWN_ERROR_NAME, UNKNOWN_ERROR_CODE);
    };

    match catalog::get_api_error_code(facade, tag).await {
        Ok((name, code)) => MappedError::new(name, code),
        Err(e) => {
            tracing::warn!(tag, error = %e, "error code lookup failed");
            MappedError::new(UNKNOWN_ERROR_NAME, UNKNOWN_ERROR_CODE)
        }
    }
}

/// Inner envelope attached to signed v1 error payloads
#[derive(Debug, Clone, Serialize)]
pub struct SignedEnvelope {
    pub signature: String,
    pub uuid: String,
    pub method: String,
    pub data: Value,
}

/// Sign a mapped error for a v1 call
///
/// Returns `None` when signing fails; the caller then leaves the inner
/// envelope absent rather than failing the error response itself.
pub async fn sign_v1_error(
    facade: &mut Facade,
    method: &str,
    uuid: &str,
    mapped: &MappedError,
) -> Option<SignedEnvelope> {
    let data = json!({ "message": mapped.message, "code": mapped.code });
    let jsondata = data.to_string();

    match catalog::openssl_sign(facade, method, &jsondata, uuid).await {
        Ok(signature) => Some(SignedEnvelope {
            signature,
            uuid: uuid.to_string(),
            method: method.to_string(),
            data,
        }),
        Err(e) => {
            tracing::warn!(method, error = %e, "v1 error signing failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_tag_plain() {
        assert_eq!(
            extract_error_tag("ERROR_INSUFFICIENT_FUNDS"),
            Some("ERROR_INSUFFICIENT_FUNDS")
        );
    }

    #[test]
    fn test_extract_tag_behind_driver_prefix() {
        assert_eq!(
            extract_error_tag("ERROR:  ERROR_INVALID_CURRENCY"),
            Some("ERROR_INVALID_CURRENCY")
        );
    }

    #[test]
    fn test_extract_tag_stops_at_first_non_tag_char() {
        assert_eq!(
            extract_error_tag("ERROR_LIMIT_EXCEEDED: withdrawal above limit"),
            Some("ERROR_LIMIT_EXCEEDED")
        );
        assert_eq!(extract_error_tag("ERROR_2FA_REQUIRED today"), Some("ERROR_2FA_REQUIRED"));
    }

    #[test]
    fn test_extract_tag_rejects_untagged_messages() {
        assert_eq!(extract_error_tag("division by zero"), None);
        assert_eq!(extract_error_tag("ERROR_"), None);
        assert_eq!(extract_error_tag("ERROR: not the double-space prefix ERROR_X"), None);
        assert_eq!(extract_error_tag("error_lowercase"), None);
    }

    #[test]
    fn test_mapped_error_serialises_as_jsonrpc_error() {
        let mapped = MappedError::new("ERROR_INVALID_CURRENCY", 623);
        let json = serde_json::to_value(&mapped).unwrap();
        assert_eq!(json["name"], "JSONRPCError");
        assert_eq!(json["message"], "ERROR_INVALID_CURRENCY");
        assert_eq!(json["code"], 623);
    }

    #[test]
    fn test_unknown_fallback_constants() {
        let mapped = MappedError::new(UNKNOWN_ERROR_NAME, UNKNOWN_ERROR_CODE);
        assert_eq!(mapped.message, "ERROR_UNKNOWN");
        assert_eq!(mapped.code, 620);
    }
}
