//! Response Shape Validation
//!
//! End-to-end shape checks for the non-database half of the pipeline: the
//! shaper's rowset reduction composed with the JSON-RPC response forming.
//! Each scenario mirrors a documented call shape (scalar, column set, row
//! object, object set, JSON passthrough) and asserts the exact wire body.

use serde_json::{json, Value};

use procgate::rpc::{success_response, ResponseMeta};
use procgate::{shape, Rowset};

fn rowset(columns: &[&str], rows: &[&[Value]]) -> Rowset {
    Rowset {
        columns: columns.iter().map(|c| (*c).to_string()).collect(),
        rows: rows.iter().map(|r| r.to_vec()).collect(),
    }
}

fn v2_meta(id: i64) -> ResponseMeta {
    ResponseMeta { id: Some(json!(id)), version: None, jsonrpc: Some("2.0".into()) }
}

// ============================================================================
// Scenario shapes
// ============================================================================

#[test]
fn scalar_return_forms_full_v2_response() {
    // get_userid_by_username(_username) -> 123
    let rs = rowset(&["get_userid_by_username"], &[&[json!(123)]]);
    let result = shape(&rs, false, false).unwrap();

    let body = success_response(&v2_meta(1), result);
    assert_eq!(body, json!({"jsonrpc": "2.0", "id": 1, "result": 123}));
}

#[test]
fn multi_row_single_column_returns_value_array() {
    // get_user_hosts(_userid) -> setof text
    let rs = rowset(
        &["get_user_hosts"],
        &[&[json!("127.0.0.1")], &[json!("192.168.0.1")], &[json!("10.0.0.1")]],
    );
    let result = shape(&rs, true, false).unwrap();
    assert_eq!(result, json!(["127.0.0.1", "192.168.0.1", "10.0.0.1"]));

    let body = success_response(
        &ResponseMeta { id: Some(json!(2)), version: None, jsonrpc: None },
        result,
    );
    assert_eq!(body["id"], json!(2));
    assert_eq!(body["error"], json!(null));
}

#[test]
fn single_row_multi_column_returns_row_object() {
    // get_user_details(_userid) -> one row of three columns
    let rs = rowset(
        &["firstname", "lastname", "creationdate"],
        &[&[json!("Joel"), json!("Jacobson"), json!("2012-05-25")]],
    );
    let result = shape(&rs, false, false).unwrap();
    assert_eq!(
        result,
        json!({"firstname": "Joel", "lastname": "Jacobson", "creationdate": "2012-05-25"})
    );
}

#[test]
fn multi_row_multi_column_returns_object_array() {
    // get_user_friends(_userid) -> three rows of four columns
    let columns = ["userid", "firstname", "lastname", "creationdate"];
    let rs = rowset(
        &columns,
        &[
            &[json!(2), json!("Anna"), json!("Genial"), json!("2012-05-26")],
            &[json!(3), json!("Bob"), json!("Spol"), json!("2012-05-27")],
            &[json!(4), json!("Cecilia"), json!("Ahl"), json!("2012-05-28")],
        ],
    );
    let result = shape(&rs, true, false).unwrap();

    let Value::Array(items) = &result else { panic!("expected array") };
    assert_eq!(items.len(), 3);
    for item in items {
        let Value::Object(fields) = item else { panic!("expected row objects") };
        for column in columns {
            assert!(fields.contains_key(column), "missing column {column}");
        }
    }
    assert_eq!(items[1]["firstname"], json!("Bob"));
}

// ============================================================================
// Invariants
// ============================================================================

#[test]
fn set_results_are_always_arrays_scalar_results_never_are() {
    let single = rowset(&["v"], &[&[json!(42)]]);
    assert!(shape(&single, true, false).unwrap().is_array());
    assert!(!shape(&single, false, false).unwrap().is_array());

    let empty = rowset(&["v"], &[]);
    assert!(shape(&empty, true, false).unwrap().is_array());
    assert!(!shape(&empty, false, false).unwrap().is_array());
}

#[test]
fn json_return_round_trips_decoded_value_unchanged() {
    let value = json!({
        "accounts": [{"id": 1, "balance": "10.50"}, {"id": 2, "balance": "0.00"}],
        "total": 2,
        "nested": {"deep": [null, true, 1.25]}
    });

    // Driver-decoded json column
    let rs = rowset(&["api_call"], &[&[value.clone()]]);
    assert_eq!(shape(&rs, false, true).unwrap(), value);

    // Same value arriving as its text serialisation
    let rs = rowset(&["api_call"], &[&[json!(value.to_string())]]);
    assert_eq!(shape(&rs, false, true).unwrap(), value);
}

#[test]
fn row_order_is_preserved() {
    let rs = rowset(&["n"], &[&[json!(3)], &[json!(1)], &[json!(2)]]);
    assert_eq!(shape(&rs, true, false).unwrap(), json!([3, 1, 2]));
}

#[test]
fn shape_violations_stay_server_side() {
    // A scalar declaration that produced two rows must not leak rows into
    // the response; it is an internal error
    let rs = rowset(&["v"], &[&[json!(1)], &[json!(2)]]);
    let err = shape(&rs, false, false).unwrap_err();
    assert_eq!(err.error_code(), "INTERNAL_ERROR");
}
