//! HTTP Transport
//!
//! Thin axum layer over the gateway. Two routes:
//! - `POST /` with a JSON-RPC body (`Content-Type: application/json`)
//! - `GET /<...>/<method>?arg=value` where the method is the last path
//!   segment and params come from the query string (single value scalar,
//!   repeated values array)
//!
//! Malformed envelopes get HTTP 400 with the fixed invalid-request body;
//! everything else is HTTP 200 with `application/json; charset=utf-8`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::resolver::MethodCall;
use crate::rpc::{
    self, error_response, invalid_request_body, success_response, ResponseMeta, RpcRequest,
};

#[derive(Clone)]
struct AppState {
    gateway: Arc<Gateway>,
}

/// Build the router
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/", post(rpc_post))
        .route("/*path", get(rpc_get))
        .with_state(AppState { gateway })
}

/// Bind and serve until the process is stopped
pub async fn serve(addr: SocketAddr, gateway: Arc<Gateway>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(
        listener,
        router(gateway).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// The caller's observed origin: first X-Forwarded-For hop, else the peer
fn client_host(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}

fn content_type_is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or("").trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false)
}

/// The method name is the last path segment
fn method_from_path(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn json_body(status: StatusCode, body: Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        body.to_string(),
    )
        .into_response()
}

fn bad_request() -> Response {
    json_body(StatusCode::BAD_REQUEST, invalid_request_body())
}

async fn rpc_post(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !content_type_is_json(&headers) {
        return bad_request();
    }

    let Ok(request) = serde_json::from_str::<RpcRequest>(&body) else {
        return bad_request();
    };

    let call = match request.into_call(client_host(&headers, peer)) {
        Ok(call) => call,
        Err(_) => return bad_request(),
    };

    dispatch(&state, call).await
}

async fn rpc_get(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Path(path): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Response {
    let request = RpcRequest {
        method: method_from_path(&path).to_string(),
        params: Some(Value::Object(rpc::params_from_query(&pairs))),
        id: None,
        version: None,
        jsonrpc: None,
    };

    let call = match request.into_call(client_host(&headers, peer)) {
        Ok(call) => call,
        Err(_) => return bad_request(),
    };

    dispatch(&state, call).await
}

async fn dispatch(state: &AppState, call: MethodCall) -> Response {
    let meta = ResponseMeta::from(&call);

    match state.gateway.call(&call).await {
        Ok(result) => json_body(StatusCode::OK, success_response(&meta, result)),
        Err(GatewayError::InvalidRequest(reason)) => {
            tracing::debug!(method = %call.method, %reason, "invalid request");
            bad_request()
        }
        Err(error) => {
            tracing::debug!(method = %call.method, error = %error, "call failed");
            let payload = state.gateway.error_payload(&call, &error).await;
            json_body(StatusCode::OK, error_response(&meta, payload))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "192.0.2.10:4321".parse().unwrap()
    }

    #[test]
    fn test_client_host_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_host(&headers, peer()), "203.0.113.7");
    }

    #[test]
    fn test_client_host_falls_back_to_peer() {
        assert_eq!(client_host(&HeaderMap::new(), peer()), "192.0.2.10");
    }

    #[test]
    fn test_content_type_check() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert!(content_type_is_json(&headers));

        headers.insert(
            header::CONTENT_TYPE,
            "application/json; charset=utf-8".parse().unwrap(),
        );
        assert!(content_type_is_json(&headers));

        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        assert!(!content_type_is_json(&headers));

        assert!(!content_type_is_json(&HeaderMap::new()));
    }

    #[test]
    fn test_method_from_path() {
        assert_eq!(method_from_path("get_user"), "get_user");
        assert_eq!(method_from_path("rpc/get_user"), "get_user");
        assert_eq!(method_from_path("a/b/get_user_hosts"), "get_user_hosts");
    }
}
