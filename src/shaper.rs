//! Rowset Shaping
//!
//! Reduces a rowset plus `{returns_set, returns_json}` to the single JSON
//! value a JSON-RPC response carries. The shape depends on whether the
//! procedure returns a set and how many output columns it produces:
//!
//! | declaration          | rows | cols | result                      |
//! |----------------------|------|------|-----------------------------|
//! | `returns_json`       | 1    | 1    | the decoded JSON value      |
//! | scalar (`set=false`) | 0    | any  | null                        |
//! | scalar               | 1    | 1    | the scalar                  |
//! | scalar               | 1    | ≥2   | the row as an object        |
//! | set (`set=true`)     | n    | 1    | array of column values      |
//! | set                  | n    | ≥2   | array of row objects        |
//!
//! Everything else is an `InternalError`: the catalog promised a shape the
//! rowset does not have.

use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::facade::Rowset;

/// Shape a rowset into the response value
pub fn shape(rowset: &Rowset, returns_set: bool, returns_json: bool) -> Result<Value> {
    if returns_json {
        return shape_json(rowset);
    }

    if !rowset.rows.is_empty() && rowset.num_columns() == 0 {
        return Err(GatewayError::internal("function returned rows with no columns"));
    }

    if returns_set {
        return Ok(Value::Array(rowset.rows.iter().map(|row| shape_row(rowset, row)).collect()));
    }

    match rowset.num_rows() {
        0 => Ok(Value::Null),
        1 => Ok(shape_row(rowset, &rowset.rows[0])),
        n => Err(GatewayError::internal(format!("function returned multiple rows ({n})"))),
    }
}

/// One row: a bare scalar for a single column, otherwise an object
fn shape_row(rowset: &Rowset, row: &[Value]) -> Value {
    if row.len() == 1 {
        return row[0].clone();
    }
    let fields =
        rowset.columns.iter().cloned().zip(row.iter().cloned()).collect::<serde_json::Map<_, _>>();
    Value::Object(fields)
}

/// `returns_json`: exactly one row and one column, already JSON
///
/// The driver decodes `json`/`jsonb` columns to a value directly; a string
/// cell is parsed so the decoded value round-trips unchanged either way.
fn shape_json(rowset: &Rowset) -> Result<Value> {
    if rowset.num_rows() != 1 || rowset.num_columns() != 1 {
        return Err(GatewayError::internal(format!(
            "json-returning function produced {} rows x {} columns, expected 1 x 1",
            rowset.num_rows(),
            rowset.num_columns()
        )));
    }

    match &rowset.rows[0][0] {
        Value::String(raw) => serde_json::from_str(raw)
            .map_err(|e| GatewayError::internal(format!("function returned malformed JSON: {e}"))),
        decoded => Ok(decoded.clone()),
    }
}
