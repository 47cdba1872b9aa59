//! Gateway Composition
//!
//! `Gateway` wires the pieces together: it owns the resolver cache and the
//! facade pool and runs each call through Resolve → Invoke → Shape. Failures
//! are turned into client-visible error objects at this boundary, signed for
//! v1 calls.

use serde_json::{json, Value};

use crate::config::GatewaySettings;
use crate::error::{GatewayError, Result};
use crate::facade::FacadePool;
use crate::resolver::{MethodCall, ResolvedCall, Resolver, ResolverCache};
use crate::{errmap, invoker, shaper};

/// The RPC gateway: one per process
pub struct Gateway {
    settings: GatewaySettings,
    cache: ResolverCache,
    pool: FacadePool,
}

impl Gateway {
    /// Resolve connection parameters and build the facade pool
    pub fn new(settings: GatewaySettings) -> Result<Self> {
        let pg = settings.pg_config()?;
        let pool = FacadePool::new(pg, settings.backoff.clone(), settings.pool_size);
        Ok(Self { settings, cache: ResolverCache::new(), pool })
    }

    #[must_use]
    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    #[must_use]
    pub fn cache(&self) -> &ResolverCache {
        &self.cache
    }

    /// Resolve a call without invoking it
    pub async fn resolve(&self, call: &MethodCall) -> Result<ResolvedCall> {
        let mut facade = self.pool.acquire().await;
        Resolver::new(&self.cache).resolve(&mut facade, call).await
    }

    /// Run a call end to end: Resolve → Invoke → Shape
    pub async fn call(&self, call: &MethodCall) -> Result<Value> {
        let mut facade = self.pool.acquire().await;

        let resolved = Resolver::new(&self.cache).resolve(&mut facade, call).await?;
        tracing::debug!(
            method = %call.method,
            proc = %resolved.proc,
            returns_set = resolved.returns_set,
            "resolved"
        );

        let invocation = invoker::invoke(&mut facade, &resolved).await?;
        shaper::shape(&invocation.rowset, invocation.returns_set, invocation.returns_json)
    }

    /// Build the client-visible error object for a failed call
    ///
    /// Procedure errors go through the catalog's error-code lookup; for v1
    /// calls the payload is additionally signed. All other kinds map to
    /// their fixed JSON-RPC codes.
    pub async fn error_payload(&self, call: &MethodCall, error: &GatewayError) -> Value {
        if !matches!(error, GatewayError::ProcedureError { .. }) {
            return json!({ "code": error.jsonrpc_code(), "message": error.message() });
        }

        let mut facade = self.pool.acquire().await;
        let mapped = errmap::map_procedure_error(&mut facade, error).await;
        let mut payload = json!({
            "name": mapped.name,
            "message": mapped.message,
            "code": mapped.code,
        });

        if call.is_v1() {
            let uuid = call.params.get("UUID").and_then(Value::as_str).unwrap_or_default();
            if let Some(signed) =
                errmap::sign_v1_error(&mut facade, &call.method, uuid, &mapped).await
            {
                // Signing failure leaves the inner envelope absent
                if let Ok(envelope) = serde_json::to_value(&signed) {
                    payload["error"] = envelope;
                }
            }
        }

        payload
    }
}
