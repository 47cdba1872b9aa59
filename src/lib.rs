//! procgate - PostgreSQL Stored Procedures as a JSON-RPC Endpoint
//!
//! procgate exposes the stored procedures of a PostgreSQL database as a
//! JSON-RPC 2.0 / 1.1 API. A caller names a method and supplies a bag of
//! named arguments; the gateway resolves the call to a unique procedure in
//! the catalog, executes it, and shapes the rowset into a JSON value whose
//! shape follows the procedure's declaration.
//!
//! # Core Principles
//! - The database is the API: no per-method server code, the catalog drives
//!   dispatch
//! - Named arguments only; a call signature is a *set* of names
//! - Exactly one catalog match or the call fails (`UnknownMethod` /
//!   `Ambiguous`)
//! - Resolution is cached for the process lifetime; the cache never changes
//!   a result, only its latency
//!
//! # Architecture
//! ```text
//! request → resolver → invoker → shaper → response
//!               │          │
//!            catalog ── facade (reconnecting handle)
//! ```
//! Errors at any stage feed the error mapper, which translates procedure
//! errors through `get_api_error_code` and signs v1 error payloads.
//!
//! Both the HTTP transport and the CLI are thin wrappers over the same
//! library functions.

pub mod catalog;
pub mod config;
pub mod errmap;
pub mod error;
pub mod facade;
pub mod gateway;
pub mod http;
pub mod invoker;
pub mod resolver;
pub mod rpc;
pub mod shaper;

pub use config::{load_service, GatewaySettings, ServiceEntry};
pub use error::{GatewayError, Result};
pub use facade::{Facade, FacadePool, RetryState, Rowset};
pub use gateway::Gateway;
pub use invoker::{invoke, Invocation};
pub use resolver::{BoundArg, MethodCall, ResolvedCall, Resolver, ResolverCache};
pub use rpc::RpcRequest;
pub use shaper::shape;
