//! JSON-RPC Wire Envelopes
//!
//! Manual JSON-RPC 2.0 / 1.1 structures: request parsing and validation,
//! response forming with the version echo rules, and the query-string
//! folding used by GET requests. No JSON-RPC crate; the envelope is small
//! enough to own.
//!
//! # Response Rules
//! - Success: `{result, error: null}`.
//! - `id` is echoed when present.
//! - `version` is echoed iff it equals `"1.1"`.
//! - `jsonrpc` is echoed iff it equals `"2.0"`; a 2.0 success omits
//!   `error` entirely, and a 2.0 failure omits `result`.
//! - An invalid envelope yields the fixed body
//!   `{jsonrpc: "2.0", error: {code: -32600, message: "Invalid Request."}, id: null}`.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::error::{GatewayError, Result};
use crate::resolver::{is_identifier, MethodCall};

/// Raw JSON-RPC request body
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub jsonrpc: Option<String>,
}

/// `method` must be an identifier, optionally namespace-qualified
#[must_use]
pub fn is_valid_method(method: &str) -> bool {
    match method.split_once('.') {
        Some((ns, name)) => is_identifier(ns) && is_identifier(name),
        None => is_identifier(method),
    }
}

impl RpcRequest {
    /// Validate the envelope and produce a `MethodCall`
    pub fn into_call(self, host: String) -> Result<MethodCall> {
        if !is_valid_method(&self.method) {
            return Err(GatewayError::invalid_request(format!(
                "method '{}' is not a valid identifier",
                self.method
            )));
        }

        let params = match self.params {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(GatewayError::invalid_request("params must be an object"));
            }
        };

        let mut call = MethodCall::new(self.method, params, host);
        call.id = self.id;
        call.version = self.version;
        call.jsonrpc = self.jsonrpc;
        Ok(call)
    }
}

/// Fold GET query pairs into a params object
///
/// A key seen once binds a scalar string; a repeated key binds an array of
/// strings in occurrence order.
#[must_use]
pub fn params_from_query(pairs: &[(String, String)]) -> Map<String, Value> {
    let mut params = Map::new();
    for (key, value) in pairs {
        match params.get_mut(key) {
            None => {
                params.insert(key.clone(), Value::String(value.clone()));
            }
            Some(Value::Array(items)) => items.push(Value::String(value.clone())),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value.clone())]);
            }
        }
    }
    params
}

/// Envelope fields echoed into the response
#[derive(Debug, Clone, Default)]
pub struct ResponseMeta {
    pub id: Option<Value>,
    pub version: Option<String>,
    pub jsonrpc: Option<String>,
}

impl From<&MethodCall> for ResponseMeta {
    fn from(call: &MethodCall) -> Self {
        Self { id: call.id.clone(), version: call.version.clone(), jsonrpc: call.jsonrpc.clone() }
    }
}

impl ResponseMeta {
    fn is_v2(&self) -> bool {
        self.jsonrpc.as_deref() == Some("2.0")
    }

    fn echo_into(&self, body: &mut Map<String, Value>) {
        if self.is_v2() {
            body.insert("jsonrpc".into(), json!("2.0"));
        } else if self.version.as_deref() == Some("1.1") {
            body.insert("version".into(), json!("1.1"));
        }
        if let Some(id) = &self.id {
            body.insert("id".into(), id.clone());
        }
    }
}

/// Build a success response body
#[must_use]
pub fn success_response(meta: &ResponseMeta, result: Value) -> Value {
    let mut body = Map::new();
    meta.echo_into(&mut body);
    body.insert("result".into(), result);
    if !meta.is_v2() {
        body.insert("error".into(), Value::Null);
    }
    Value::Object(body)
}

/// Build a failure response body around a prebuilt error object
#[must_use]
pub fn error_response(meta: &ResponseMeta, error: Value) -> Value {
    let mut body = Map::new();
    meta.echo_into(&mut body);
    if !meta.is_v2() {
        body.insert("result".into(), Value::Null);
    }
    body.insert("error".into(), error);
    Value::Object(body)
}

/// The fixed invalid-request body (served with HTTP 400)
#[must_use]
pub fn invalid_request_body() -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": { "code": -32600, "message": "Invalid Request." },
        "id": null
    })
}
