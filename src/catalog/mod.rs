//! Procedure Catalog Queries
//!
//! The fixed set of read-only queries over `pg_catalog` that answer "which
//! procedure matches this call?", plus the two external helper functions the
//! gateway invokes (`get_api_error_code`, `openssl_sign`).
//!
//! # Matching Semantics
//! A method name matches a procedure name either case-insensitively, or
//! case-insensitively after stripping every underscore in the procedure name
//! that is not preceded by a caret (`GetUserFriends` binds to
//! `get_user_friends`; a literal `^_` keeps its underscore). Argument sets
//! are compared with the `text[]` containment operators `<@` / `@>`; order
//! never matters.
//!
//! A candidate with parameters is accepted iff every supplied argument is
//! declared and every declared argument is supplied, except that `_host` may
//! be declared without being supplied. `requires_host` reports exactly that
//! case so the resolver can inject the caller's origin.

use tokio_postgres::Row;

use crate::error::Result;
use crate::facade::Facade;

/// Shared candidate projection: IN/INOUT argument names and types per
/// procedure, with both name-matching rules applied.
///
/// Procedures with unnamed arguments are excluded up front; they can only be
/// called positionally, which the gateway does not support.
const CANDIDATE_CTE: &str = r#"
WITH candidate AS (
    SELECT p.proname,
           n.nspname,
           p.proretset,
           p.prorettype IN ('pg_catalog.json'::regtype, 'pg_catalog.jsonb'::regtype)
               AS returns_json,
           CASE WHEN p.proargmodes IS NULL THEN coalesce(p.proargnames, '{}'::text[])
                ELSE array(SELECT a.name
                             FROM unnest(p.proargnames, p.proargmodes)
                                  WITH ORDINALITY AS a(name, mode, ord)
                            WHERE a.mode IN ('i', 'b')
                            ORDER BY a.ord)
           END AS arg_names,
           CASE WHEN p.proargmodes IS NULL
                THEN array(SELECT format_type(t.typ, NULL)
                             FROM unnest(p.proargtypes) WITH ORDINALITY AS t(typ, ord)
                            ORDER BY t.ord)
                ELSE array(SELECT format_type(a.typ, NULL)
                             FROM unnest(p.proallargtypes, p.proargmodes)
                                  WITH ORDINALITY AS a(typ, mode, ord)
                            WHERE a.mode IN ('i', 'b')
                            ORDER BY a.ord)
           END AS arg_types
      FROM pg_catalog.pg_proc p
      JOIN pg_catalog.pg_namespace n ON n.oid = p.pronamespace
     WHERE p.prokind = 'f'
       AND (p.pronargs = 0 OR p.proargnames IS NOT NULL)
       AND (lower(p.proname) = lower($1)
            OR lower(regexp_replace(p.proname, '(?<!\^)_', '', 'g')) = lower($1))
)
"#;

/// `map_with_params(name, argnames, schema?)`
const MAP_WITH_PARAMS_TAIL: &str = r#"
SELECT c.nspname,
       c.proname,
       c.proretset,
       c.returns_json,
       '_host' = ANY(c.arg_names) AND NOT '_host' = ANY($2::text[]) AS requires_host,
       c.arg_names,
       c.arg_types
  FROM candidate c
 WHERE $2::text[] <@ c.arg_names
   AND c.arg_names <@ ($2::text[] || '{_host}'::text[])
   AND ($3::text IS NULL OR c.nspname = $3::text)
"#;

/// `map_no_params(name, schema?)`: declared argument set is empty or
/// exactly `{_host}`
const MAP_NO_PARAMS_TAIL: &str = r#"
SELECT c.nspname,
       c.proname,
       c.proretset,
       c.returns_json,
       c.arg_names = '{_host}'::text[] AS requires_host,
       c.arg_names,
       c.arg_types
  FROM candidate c
 WHERE (c.arg_names = '{}'::text[] OR c.arg_names = '{_host}'::text[])
   AND ($2::text IS NULL OR c.nspname = $2::text)
"#;

/// `map_v1(method, data_keys)`: the declared parameter set of the external
/// method, unioned with the constant `{Password}`, must equal the supplied
/// key set
const MAP_V1: &str = r#"
SELECT f."Name"
  FROM "Functions" f
 WHERE f."ApiMethod" = $1
   AND (f."ApiParams" || '{Password}'::text[]) <@ $2::text[]
   AND (f."ApiParams" || '{Password}'::text[]) @> $2::text[]
"#;

const GET_API_ERROR_CODE: &str =
    "SELECT * FROM get_api_error_code(CAST($1 AS text))";

const OPENSSL_SIGN: &str = "SELECT * FROM openssl_sign(\
     _method := CAST($1 AS text), \
     _jsondata := CAST($2 AS text), \
     _uuid := CAST($3 AS text))";

/// One procedure matching a call signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcCandidate {
    /// Schema the procedure lives in
    pub schema: String,

    /// Procedure name exactly as stored in the catalog
    pub proc: String,

    /// Declared to return zero-or-more rows
    pub returns_set: bool,

    /// Declared return type is `json` or `jsonb`
    pub returns_json: bool,

    /// `_host` is declared but was not supplied
    pub requires_host: bool,

    /// Declared IN/INOUT argument names, in declaration order
    pub arg_names: Vec<String>,

    /// Declared IN/INOUT argument types (`format_type`), parallel to
    /// `arg_names`
    pub arg_types: Vec<String>,
}

impl ProcCandidate {
    fn from_row(row: &Row) -> Self {
        Self {
            schema: row.get(0),
            proc: row.get(1),
            returns_set: row.get(2),
            returns_json: row.get(3),
            requires_host: row.get(4),
            arg_names: row.get(5),
            arg_types: row.get(6),
        }
    }
}

/// Candidates whose declared argument set matches the supplied names
pub async fn map_with_params(
    facade: &mut Facade,
    name: &str,
    argnames: &[String],
    schema: Option<&str>,
) -> Result<Vec<ProcCandidate>> {
    let sql = format!("{CANDIDATE_CTE}{MAP_WITH_PARAMS_TAIL}");
    let rows = facade.query(&sql, &[&name, &argnames, &schema]).await?;
    Ok(rows.iter().map(ProcCandidate::from_row).collect())
}

/// Candidates callable without any supplied arguments
pub async fn map_no_params(
    facade: &mut Facade,
    name: &str,
    schema: Option<&str>,
) -> Result<Vec<ProcCandidate>> {
    let sql = format!("{CANDIDATE_CTE}{MAP_NO_PARAMS_TAIL}");
    let rows = facade.query(&sql, &[&name, &schema]).await?;
    Ok(rows.iter().map(ProcCandidate::from_row).collect())
}

/// External methods whose declared parameter set (plus `Password`) equals
/// the supplied v1 `Data` key set
pub async fn map_v1(
    facade: &mut Facade,
    method: &str,
    data_keys: &[String],
) -> Result<Vec<String>> {
    let rows = facade.query(MAP_V1, &[&method, &data_keys]).await?;
    Ok(rows.iter().map(|row| row.get(0)).collect())
}

/// Translate an `ERROR_<TAG>` into `(error_name, numeric_code)` via the
/// external catalog function
pub async fn get_api_error_code(facade: &mut Facade, tag: &str) -> Result<(String, i32)> {
    let rows = facade.query(GET_API_ERROR_CODE, &[&tag]).await?;
    let row = rows
        .first()
        .ok_or_else(|| crate::error::GatewayError::internal("get_api_error_code returned no row"))?;
    Ok((row.get(0), row.get(1)))
}

/// Sign a v1 error payload via the external `openssl_sign` procedure
pub async fn openssl_sign(
    facade: &mut Facade,
    method: &str,
    jsondata: &str,
    uuid: &str,
) -> Result<String> {
    let rows = facade.query(OPENSSL_SIGN, &[&method, &jsondata, &uuid]).await?;
    let row = rows
        .first()
        .ok_or_else(|| crate::error::GatewayError::internal("openssl_sign returned no row"))?;
    Ok(row.get(0))
}
