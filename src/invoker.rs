//! Procedure Invocation
//!
//! Thin wrapper over the connection facade: executes a resolved call and
//! hands the raw rowset back together with the shape metadata the shaper
//! needs. Every argument is bound by name, never by position; an empty
//! argument list yields `SELECT * FROM schema.proc()`.

use crate::error::Result;
use crate::facade::{Facade, Rowset};
use crate::resolver::ResolvedCall;

/// Raw invocation result: the rowset plus the declared shape
#[derive(Debug, Clone)]
pub struct Invocation {
    pub rowset: Rowset,
    pub returns_set: bool,
    pub returns_json: bool,
}

/// Execute a resolved call without interpreting its rows
pub async fn invoke(facade: &mut Facade, call: &ResolvedCall) -> Result<Invocation> {
    let rowset = facade.call_proc(call).await?;
    Ok(Invocation { rowset, returns_set: call.returns_set, returns_json: call.returns_json })
}
