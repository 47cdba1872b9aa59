//! Method-to-Procedure Resolution
//!
//! Given `(method, argument names, optional namespace)` the resolver
//! identifies exactly one procedure in the catalog, decides whether the
//! implicit `_host` parameter must be injected, and records whether the
//! return value is already JSON. Resolved signatures are cached for the
//! process lifetime; a cache entry is a pure function of its key, so
//! concurrent misses for the same key may both hit the catalog and the
//! second insert harmlessly wins.
//!
//! # Argument-Name Normalisation
//! Every supplied key is lowercased and, unless it already starts with an
//! underscore, prefixed with one (`userid` → `_userid`). Two distinct keys
//! normalising to the same name is `InvalidParameters`.
//!
//! # V1 Envelopes
//! A call whose params carry exactly the keys `{Signature, UUID, Data}` is
//! a signed v1 envelope. It is validated against the external-method table
//! and routed to the fixed dispatcher procedure, bypassing the cache.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde::Serialize;
use serde_json::Value;

use crate::catalog::{self, ProcCandidate};
use crate::error::{GatewayError, Result};
use crate::facade::Facade;

/// Fixed dispatcher for v1 envelope calls
const V1_SCHEMA: &str = "public";
const V1_PROC: &str = "api_call";

/// Method names remapped to a canonical procedure before catalog lookup
const METHOD_ALIASES: &[(&str, &str)] = &[
    ("getview", "get_view_json"),
    ("getviewparams", "get_view_json"),
];

/// One incoming call, transport details already stripped
#[derive(Debug, Clone)]
pub struct MethodCall {
    /// Method name, optionally `namespace.method`
    pub method: String,

    /// Named arguments; may be empty
    pub params: serde_json::Map<String, Value>,

    /// Caller's observed origin, injected as `_host` on demand
    pub host: String,

    /// Passthrough envelope fields
    pub id: Option<Value>,
    pub version: Option<String>,
    pub jsonrpc: Option<String>,
}

impl MethodCall {
    #[must_use]
    pub fn new(method: impl Into<String>, params: serde_json::Map<String, Value>, host: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params,
            host: host.into(),
            id: None,
            version: None,
            jsonrpc: None,
        }
    }

    /// A v1 envelope carries exactly the keys `Signature`, `UUID`, `Data`
    #[must_use]
    pub fn is_v1(&self) -> bool {
        self.params.len() == 3
            && self.params.contains_key("Signature")
            && self.params.contains_key("UUID")
            && self.params.contains_key("Data")
    }
}

/// One argument of a resolved call: declared name, declared type, value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundArg {
    pub name: String,
    pub sql_type: String,
    pub value: Value,
}

/// A call resolved to a unique catalog procedure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedCall {
    /// Namespace; absent leaves the choice to the catalog search path
    pub schema: Option<String>,

    /// Procedure name as stored in the catalog
    pub proc: String,

    /// Declared to return zero-or-more rows
    pub returns_set: bool,

    /// Declared return type is the catalog's JSON type
    pub returns_json: bool,

    /// Arguments actually sent, `_host` included when injected
    pub args: Vec<BoundArg>,
}

/// Value of the resolver cache, keyed by `cache_key(method, argnames)`
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub schema: String,
    pub proc: String,
    pub returns_set: bool,
    pub returns_json: bool,
    pub requires_host: bool,
    pub arg_names: Vec<String>,
    pub arg_types: Vec<String>,
}

impl From<ProcCandidate> for CacheEntry {
    fn from(c: ProcCandidate) -> Self {
        Self {
            schema: c.schema,
            proc: c.proc,
            returns_set: c.returns_set,
            returns_json: c.returns_json,
            requires_host: c.requires_host,
            arg_names: c.arg_names,
            arg_types: c.arg_types,
        }
    }
}

/// Process-wide resolution cache; insert-only, read-mostly
#[derive(Default)]
pub struct ResolverCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl ResolverCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.read().expect("cache lock poisoned").get(key).cloned()
    }

    pub fn insert(&self, key: String, entry: CacheEntry) {
        self.entries.write().expect("cache lock poisoned").insert(key, entry);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// True for `[A-Za-z_][A-Za-z0-9_]*`
#[must_use]
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Normalise one argument name: lowercase, leading underscore
#[must_use]
pub fn normalise_key(key: &str) -> String {
    let lower = key.to_ascii_lowercase();
    if lower.starts_with('_') {
        lower
    } else {
        format!("_{lower}")
    }
}

/// Normalise an argument mapping
///
/// The result is ordered by name, which makes the cache key and the bound
/// argument order deterministic regardless of input iteration order.
pub fn normalise_params(params: &serde_json::Map<String, Value>) -> Result<BTreeMap<String, Value>> {
    let mut normalised = BTreeMap::new();
    for (key, value) in params {
        if !is_identifier(key) {
            return Err(GatewayError::invalid_parameters(format!(
                "argument name '{key}' is not a valid identifier"
            )));
        }
        let name = normalise_key(key);
        if normalised.insert(name.clone(), value.clone()).is_some() {
            return Err(GatewayError::invalid_parameters(format!(
                "arguments collide on normalised name '{name}'"
            )));
        }
    }
    Ok(normalised)
}

/// Cache key: `method(sorted,argument,names)`, namespace-qualified
#[must_use]
pub fn cache_key(schema: Option<&str>, method: &str, normalised: &BTreeMap<String, Value>) -> String {
    let names = normalised.keys().cloned().collect::<Vec<_>>().join(",");
    match schema {
        Some(ns) => format!("{ns}.{method}({names})"),
        None => format!("{method}({names})"),
    }
}

/// Apply the special-name remap table
#[must_use]
fn remap_method(method: &str) -> String {
    let lower = method.to_ascii_lowercase();
    for (alias, canonical) in METHOD_ALIASES {
        if lower == *alias {
            return (*canonical).to_string();
        }
    }
    method.to_string()
}

/// Split `namespace.method` into its parts, validating both
fn split_method(method: &str) -> Result<(Option<&str>, &str)> {
    let (schema, name) = match method.split_once('.') {
        Some((ns, name)) => (Some(ns), name),
        None => (None, method),
    };
    if let Some(ns) = schema {
        if !is_identifier(ns) {
            return Err(GatewayError::invalid_request(format!("bad namespace '{ns}'")));
        }
    }
    if !is_identifier(name) {
        return Err(GatewayError::invalid_request(format!("bad method name '{name}'")));
    }
    Ok((schema, name))
}

/// Build the outgoing argument list from a cache entry, injecting `_host`
fn resolved_from_entry(
    entry: &CacheEntry,
    normalised: &BTreeMap<String, Value>,
    host: &str,
) -> Result<ResolvedCall> {
    let mut args = Vec::with_capacity(entry.arg_names.len());
    for (name, sql_type) in entry.arg_names.iter().zip(&entry.arg_types) {
        let value = if name == "_host" && entry.requires_host {
            Value::String(host.to_string())
        } else {
            normalised
                .get(name)
                .cloned()
                .ok_or_else(|| {
                    GatewayError::internal(format!("declared argument '{name}' has no value"))
                })?
        };
        args.push(BoundArg { name: name.clone(), sql_type: sql_type.clone(), value });
    }

    Ok(ResolvedCall {
        schema: Some(entry.schema.clone()),
        proc: entry.proc.clone(),
        returns_set: entry.returns_set,
        returns_json: entry.returns_json,
        args,
    })
}

/// Build the dispatcher call for a validated v1 envelope
fn v1_resolved(call: &MethodCall) -> ResolvedCall {
    let field = |key: &str| call.params.get(key).cloned().unwrap_or(Value::Null);

    let args = vec![
        BoundArg { name: "_data".into(), sql_type: "json".into(), value: field("Data") },
        BoundArg { name: "_host".into(), sql_type: "text".into(), value: Value::String(call.host.clone()) },
        BoundArg { name: "_method".into(), sql_type: "text".into(), value: Value::String(call.method.clone()) },
        BoundArg { name: "_signature".into(), sql_type: "text".into(), value: field("Signature") },
        BoundArg { name: "_uuid".into(), sql_type: "text".into(), value: field("UUID") },
    ];

    ResolvedCall {
        schema: Some(V1_SCHEMA.to_string()),
        proc: V1_PROC.to_string(),
        returns_set: false,
        returns_json: true,
        args,
    }
}

/// The resolution engine; owns nothing but a reference to the shared cache
pub struct Resolver<'a> {
    cache: &'a ResolverCache,
}

impl<'a> Resolver<'a> {
    #[must_use]
    pub fn new(cache: &'a ResolverCache) -> Self {
        Self { cache }
    }

    /// Resolve a call to a unique procedure
    ///
    /// Zero catalog matches is `UnknownMethod`, two or more is `Ambiguous`.
    pub async fn resolve(&self, facade: &mut Facade, call: &MethodCall) -> Result<ResolvedCall> {
        if call.is_v1() {
            return self.resolve_v1(facade, call).await;
        }

        let (schema, name) = split_method(&call.method)?;
        let method = remap_method(name);
        let normalised = normalise_params(&call.params)?;
        let key = cache_key(schema, &method, &normalised);

        if let Some(entry) = self.cache.get(&key) {
            return resolved_from_entry(&entry, &normalised, &call.host);
        }

        let candidates = if normalised.is_empty() {
            catalog::map_no_params(facade, &method, schema).await?
        } else {
            let argnames: Vec<String> = normalised.keys().cloned().collect();
            catalog::map_with_params(facade, &method, &argnames, schema).await?
        };

        let entry: CacheEntry = match candidates.len() {
            0 => return Err(GatewayError::unknown_method(key)),
            1 => candidates.into_iter().next().expect("one candidate").into(),
            _ => return Err(GatewayError::ambiguous(key)),
        };

        let resolved = resolved_from_entry(&entry, &normalised, &call.host)?;
        self.cache.insert(key, entry);
        Ok(resolved)
    }

    /// Validate a v1 envelope and route it to the dispatcher
    async fn resolve_v1(&self, facade: &mut Facade, call: &MethodCall) -> Result<ResolvedCall> {
        let Some(Value::Object(data)) = call.params.get("Data") else {
            return Err(GatewayError::invalid_parameters("v1 envelope 'Data' must be an object"));
        };

        if !is_identifier(&call.method) {
            return Err(GatewayError::invalid_request(format!(
                "bad method name '{}'",
                call.method
            )));
        }

        let data_keys: Vec<String> = data.keys().cloned().collect();
        let matches = catalog::map_v1(facade, &call.method, &data_keys).await?;
        if matches.is_empty() {
            return Err(GatewayError::unknown_method(call.method.clone()));
        }

        Ok(v1_resolved(call))
    }
}
