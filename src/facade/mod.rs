//! Connection Facade
//!
//! This module owns the database handle. It provides a fast path that issues
//! queries on a cached live connection without a liveness probe, and a
//! bounded reconnect-and-retry path for failures that look connection-level.
//!
//! # Sqlstate Classification
//! Classes `22xxx`, `40xxx`, `42xxx` and `P0xxx` are query-level (data,
//! serialisation, syntax, pl/pgsql RAISE) and are returned without retry.
//! Everything else is treated as possibly connection-level. `22000` on the
//! first attempt is the one exception: the driver is known to surface lost
//! connections under that code, so it takes the reconnect path once.
//!
//! # Retry State Machine
//! `Fresh → Tried → Retrying(k) → TimedOut → Fatal`. The reconnect loop is
//! bounded by the backoff schedule (default 3, 6, 9 seconds). Once the
//! budget is exhausted the facade is `TimedOut`: the next call gets exactly
//! one fresh connect, and if that fails the facade is `Fatal` and every
//! subsequent call short-circuits to `ConnectionLost`.
//!
//! Each worker owns its facade; handles are never shared across workers.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};

use crate::error::{GatewayError, Result};
use crate::resolver::ResolvedCall;

/// Facade retry state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Last query succeeded (or nothing attempted yet)
    Fresh,
    /// Last query failed at query level; the handle itself is fine
    Tried,
    /// Inside the reconnect loop, attempt `k`
    Retrying(u32),
    /// Reconnect budget exhausted; one fresh probe remains
    TimedOut,
    /// The fresh probe failed too; every call short-circuits
    Fatal,
}

/// Ordered rowset: column names plus rows of JSON values
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rowset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl Rowset {
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }
}

/// Classify a sqlstate
///
/// Returns true when the error is query-level and must not be retried.
/// `22000` is exempted on the first attempt only.
#[must_use]
pub fn is_query_level(sqlstate: &str, first_attempt: bool) -> bool {
    if first_attempt && sqlstate == "22000" {
        return false;
    }
    matches!(sqlstate.get(..2), Some("22" | "40" | "42")) || sqlstate.starts_with("P0")
}

/// Database connection facade with ping-on-demand reconnect
pub struct Facade {
    pg: tokio_postgres::Config,
    client: Option<Client>,
    state: RetryState,
    backoff: Vec<std::time::Duration>,
}

impl Facade {
    /// Create a facade; the connection is established lazily on first use
    #[must_use]
    pub fn new(pg: tokio_postgres::Config, backoff: Vec<std::time::Duration>) -> Self {
        Self { pg, client: None, state: RetryState::Fresh, backoff }
    }

    /// Current retry state (observable for tests and logging)
    #[must_use]
    pub const fn state(&self) -> RetryState {
        self.state
    }

    /// Open a fresh connection, replacing any cached handle
    async fn reconnect(&mut self) -> std::result::Result<(), tokio_postgres::Error> {
        let (client, connection) = self.pg.connect(NoTls).await?;

        // Driver task; errors surface on the next query, not here
        tokio::spawn(async move {
            let _ = connection.await;
        });

        self.client = Some(client);
        Ok(())
    }

    /// Liveness probe on the cached handle
    async fn ping(&mut self) -> bool {
        match &self.client {
            Some(client) if !client.is_closed() => client.simple_query("").await.is_ok(),
            _ => false,
        }
    }

    async fn attempt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> std::result::Result<(Vec<String>, Vec<Row>), tokio_postgres::Error> {
        let client = self.client.as_ref().expect("attempt requires a handle");
        let stmt = client.prepare(sql).await?;
        let columns = stmt.columns().iter().map(|c| c.name().to_string()).collect();
        let rows = client.query(&stmt, params).await?;
        Ok((columns, rows))
    }

    /// Execute a query, reconnecting on connection-level failures
    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<(Vec<String>, Vec<Row>)> {
        match self.state {
            RetryState::Fatal => {
                return Err(GatewayError::connection_lost("database connection is gone"));
            }
            RetryState::TimedOut => {
                // One fresh probe after a timed-out episode
                if self.reconnect().await.is_err() {
                    self.state = RetryState::Fatal;
                    return Err(GatewayError::connection_lost(
                        "reconnect after retry exhaustion failed",
                    ));
                }
                self.state = RetryState::Fresh;
            }
            _ => {}
        }

        if self.client.is_none() && self.reconnect().await.is_err() {
            return self.retry(sql, params).await;
        }

        match self.attempt(sql, params).await {
            Ok(result) => {
                self.state = RetryState::Fresh;
                Ok(result)
            }
            Err(err) => {
                if let Some(sqlstate) = err.code().map(|c| c.code()) {
                    if is_query_level(sqlstate, true) {
                        self.state = RetryState::Tried;
                        return Err(to_gateway_error(&err));
                    }
                }
                self.retry(sql, params).await
            }
        }
    }

    /// Bounded reconnect loop with linear backoff
    async fn retry(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<(Vec<String>, Vec<Row>)> {
        let backoff = self.backoff.clone();
        for (index, delay) in backoff.iter().enumerate() {
            let attempt_no = index as u32 + 1;
            self.state = RetryState::Retrying(attempt_no);
            tracing::warn!(attempt = attempt_no, "database connection lost, reconnecting");
            tokio::time::sleep(*delay).await;

            if !self.ping().await && self.reconnect().await.is_err() {
                continue;
            }

            return match self.attempt(sql, params).await {
                Ok(result) => {
                    self.state = RetryState::Fresh;
                    Ok(result)
                }
                Err(err) => {
                    // Second failure on a live handle: give up on this query
                    self.state = RetryState::Tried;
                    Err(to_gateway_error(&err))
                }
            };
        }

        self.state = RetryState::TimedOut;
        Err(GatewayError::connection_lost(format!(
            "gave up after {} reconnect attempts",
            self.backoff.len()
        )))
    }

    /// Execute and return the raw rows (catalog queries)
    pub async fn query(
        &mut self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>> {
        let (_, rows) = self.execute(sql, params).await?;
        Ok(rows)
    }

    /// Invoke a resolved procedure call and convert its rows to JSON
    pub async fn call_proc(&mut self, call: &ResolvedCall) -> Result<Rowset> {
        let (sql, texts) = build_call_statement(call);
        let params: Vec<&(dyn ToSql + Sync)> =
            texts.iter().map(|t| t as &(dyn ToSql + Sync)).collect();

        let (columns, rows) = self.execute(&sql, &params).await?;
        rows_to_rowset(columns, &rows)
    }
}

/// Map a driver error into the gateway taxonomy
fn to_gateway_error(err: &tokio_postgres::Error) -> GatewayError {
    match err.as_db_error() {
        Some(db) => GatewayError::procedure_error(db.code().code(), db.message()),
        None => GatewayError::connection_lost(err.to_string()),
    }
}

/// Quote an SQL identifier: double quotes, embedded quotes doubled
#[must_use]
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Render an argument value as text for binding
///
/// Objects and arrays are serialised to their JSON text; scalars pass
/// through as given; null binds as SQL NULL.
#[must_use]
pub fn value_to_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Object(_) | serde_json::Value::Array(_) => Some(value.to_string()),
    }
}

/// Build the invocation statement for a resolved call
///
/// Every argument is bound by name with an explicit cast to its declared
/// type, so text-bound values reach the procedure with the types the
/// catalog declared: `SELECT * FROM "s"."p"("a" := CAST($1 AS integer))`.
#[must_use]
pub fn build_call_statement(call: &ResolvedCall) -> (String, Vec<Option<String>>) {
    let target = match &call.schema {
        Some(schema) => format!("{}.{}", quote_ident(schema), quote_ident(&call.proc)),
        None => quote_ident(&call.proc),
    };

    let mut assignments = Vec::with_capacity(call.args.len());
    let mut texts = Vec::with_capacity(call.args.len());
    for (n, arg) in call.args.iter().enumerate() {
        assignments.push(format!(
            "{} := CAST(${} AS {})",
            quote_ident(&arg.name),
            n + 1,
            arg.sql_type
        ));
        texts.push(value_to_text(&arg.value));
    }

    (format!("SELECT * FROM {}({})", target, assignments.join(", ")), texts)
}

/// Convert driver rows into a JSON rowset
fn rows_to_rowset(columns: Vec<String>, rows: &[Row]) -> Result<Rowset> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..row.len() {
            values.push(pg_value_to_json(row, idx)?);
        }
        out.push(values);
    }
    Ok(Rowset { columns, rows: out })
}

/// Convert one cell to a JSON value
fn pg_value_to_json(row: &Row, idx: usize) -> Result<serde_json::Value> {
    use serde_json::Value;

    fn get<'a, T>(row: &'a Row, idx: usize, what: &str) -> Result<Option<T>>
    where
        T: tokio_postgres::types::FromSql<'a>,
    {
        row.try_get(idx)
            .map_err(|e| GatewayError::internal(format!("failed to read {what} column: {e}")))
    }

    let col_type = row.columns()[idx].type_();
    let value = match *col_type {
        Type::BOOL => get::<bool>(row, idx, "boolean")?.map(Value::Bool),

        Type::INT2 => get::<i16>(row, idx, "int2")?.map(|v| Value::Number(v.into())),
        Type::INT4 => get::<i32>(row, idx, "int4")?.map(|v| Value::Number(v.into())),
        Type::INT8 => get::<i64>(row, idx, "int8")?.map(|v| Value::Number(v.into())),

        // NaN and infinity have no JSON rendering; they become null
        Type::FLOAT4 => get::<f32>(row, idx, "float4")?
            .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
            .map(Value::Number),
        Type::FLOAT8 => get::<f64>(row, idx, "float8")?
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number),

        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => {
            get::<String>(row, idx, "text")?.map(Value::String)
        }

        Type::JSON | Type::JSONB => get::<Value>(row, idx, "json")?,

        Type::BYTEA => get::<Vec<u8>>(row, idx, "bytea")?.map(|v| {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(v))
        }),

        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, idx, "timestamp")?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S").to_string())),
        Type::TIMESTAMPTZ => get::<chrono::DateTime<chrono::Utc>>(row, idx, "timestamptz")?
            .map(|v| Value::String(v.to_rfc3339())),
        Type::DATE => get::<chrono::NaiveDate>(row, idx, "date")?
            .map(|v| Value::String(v.format("%Y-%m-%d").to_string())),
        Type::TIME => get::<chrono::NaiveTime>(row, idx, "time")?
            .map(|v| Value::String(v.format("%H:%M:%S").to_string())),

        Type::UUID => get::<uuid::Uuid>(row, idx, "uuid")?.map(|v| Value::String(v.to_string())),

        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => get::<Vec<String>>(row, idx, "text[]")?
            .map(|v| Value::Array(v.into_iter().map(Value::String).collect())),
        Type::INT4_ARRAY => get::<Vec<i32>>(row, idx, "int4[]")?
            .map(|v| Value::Array(v.into_iter().map(|n| Value::Number(n.into())).collect())),
        Type::INT8_ARRAY => get::<Vec<i64>>(row, idx, "int8[]")?
            .map(|v| Value::Array(v.into_iter().map(|n| Value::Number(n.into())).collect())),

        _ => get::<String>(row, idx, col_type.name())?.map(Value::String),
    };

    Ok(value.unwrap_or(Value::Null))
}

/// Fixed set of facades, one per worker, handed out round-robin
pub struct FacadePool {
    slots: Vec<tokio::sync::Mutex<Facade>>,
    next: AtomicUsize,
}

impl FacadePool {
    #[must_use]
    pub fn new(pg: tokio_postgres::Config, backoff: Vec<std::time::Duration>, size: usize) -> Self {
        let slots = (0..size.max(1))
            .map(|_| tokio::sync::Mutex::new(Facade::new(pg.clone(), backoff.clone())))
            .collect();
        Self { slots, next: AtomicUsize::new(0) }
    }

    /// Acquire a facade, preferring an idle slot over waiting
    pub async fn acquire(&self) -> tokio::sync::MutexGuard<'_, Facade> {
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for offset in 0..self.slots.len() {
            let slot = &self.slots[(start + offset) % self.slots.len()];
            if let Ok(guard) = slot.try_lock() {
                return guard;
            }
        }
        self.slots[start % self.slots.len()].lock().await
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::BoundArg;
    use serde_json::json;

    fn resolved(schema: Option<&str>, proc: &str, args: Vec<BoundArg>) -> ResolvedCall {
        ResolvedCall {
            schema: schema.map(String::from),
            proc: proc.to_string(),
            returns_set: false,
            returns_json: false,
            args,
        }
    }

    #[test]
    fn test_query_level_classes() {
        assert!(is_query_level("22012", true)); // division by zero
        assert!(is_query_level("40001", true)); // serialization failure
        assert!(is_query_level("42883", true)); // undefined function
        assert!(is_query_level("P0001", true)); // raise_exception
        assert!(!is_query_level("08006", true)); // connection failure
        assert!(!is_query_level("57P01", true)); // admin shutdown
    }

    #[test]
    fn test_22000_is_connection_level_on_first_attempt_only() {
        assert!(!is_query_level("22000", true));
        assert!(is_query_level("22000", false));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("get_user"), "\"get_user\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn test_value_to_text_scalars() {
        assert_eq!(value_to_text(&json!(null)), None);
        assert_eq!(value_to_text(&json!("joel")), Some("joel".to_string()));
        assert_eq!(value_to_text(&json!(123)), Some("123".to_string()));
        assert_eq!(value_to_text(&json!(1.5)), Some("1.5".to_string()));
        assert_eq!(value_to_text(&json!(true)), Some("true".to_string()));
    }

    #[test]
    fn test_value_to_text_serialises_objects_and_arrays() {
        assert_eq!(
            value_to_text(&json!({"Amount": 10})),
            Some(r#"{"Amount":10}"#.to_string())
        );
        assert_eq!(value_to_text(&json!([1, 2])), Some("[1,2]".to_string()));
    }

    #[test]
    fn test_build_call_statement_binds_by_name() {
        let call = resolved(
            Some("public"),
            "get_userid_by_username",
            vec![BoundArg {
                name: "_username".into(),
                sql_type: "text".into(),
                value: json!("joel"),
            }],
        );
        let (sql, params) = build_call_statement(&call);
        assert_eq!(
            sql,
            "SELECT * FROM \"public\".\"get_userid_by_username\"(\"_username\" := CAST($1 AS text))"
        );
        assert_eq!(params, vec![Some("joel".to_string())]);
    }

    #[test]
    fn test_build_call_statement_empty_args() {
        let call = resolved(Some("public"), "get_server_time", vec![]);
        let (sql, params) = build_call_statement(&call);
        assert_eq!(sql, "SELECT * FROM \"public\".\"get_server_time\"()");
        assert!(params.is_empty());
    }

    #[test]
    fn test_build_call_statement_without_schema_uses_search_path() {
        let call = resolved(
            None,
            "get_user_hosts",
            vec![BoundArg { name: "_userid".into(), sql_type: "integer".into(), value: json!(123) }],
        );
        let (sql, _) = build_call_statement(&call);
        assert_eq!(
            sql,
            "SELECT * FROM \"get_user_hosts\"(\"_userid\" := CAST($1 AS integer))"
        );
    }

    #[test]
    fn test_build_call_statement_null_binds_null() {
        let call = resolved(
            Some("public"),
            "set_note",
            vec![BoundArg { name: "_note".into(), sql_type: "text".into(), value: json!(null) }],
        );
        let (_, params) = build_call_statement(&call);
        assert_eq!(params, vec![None]);
    }

    #[test]
    fn test_facade_starts_fresh_without_connecting() {
        let facade = Facade::new(tokio_postgres::Config::new(), crate::config::default_backoff());
        assert_eq!(facade.state(), RetryState::Fresh);
    }

    #[tokio::test]
    async fn test_pool_hands_out_distinct_slots() {
        let pool = FacadePool::new(tokio_postgres::Config::new(), vec![], 2);
        assert_eq!(pool.size(), 2);

        let first = pool.acquire().await;
        let second = pool.acquire().await;
        // Both guards are live at once, so they must be different slots
        assert_eq!(first.state(), RetryState::Fresh);
        assert_eq!(second.state(), RetryState::Fresh);
    }
}
