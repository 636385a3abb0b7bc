//! ReQL terms in the JSON wire encoding.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::store::{Record, TableBinding};

const MAKE_ARRAY: u64 = 2;
const DB: u64 = 14;
const TABLE: u64 = 15;
const GET: u64 = 16;
const INSERT: u64 = 56;

const QUERY_START: u64 = 1;
const QUERY_CONTINUE: u64 = 2;

/// Encode a plain JSON value as a ReQL datum.
///
/// Bare arrays are terms on the wire, so every array is wrapped in
/// `MAKE_ARRAY`. Object values are encoded recursively.
pub fn datum(value: &Value) -> Value {
    match value {
        Value::Array(items) => json!([MAKE_ARRAY, items.iter().map(datum).collect::<Vec<_>>()]),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), datum(value)))
                .collect::<Map<_, _>>(),
        ),
        scalar => scalar.clone(),
    }
}

pub fn table(binding: &TableBinding) -> Value {
    json!([TABLE, [[DB, [binding.database]], binding.table]])
}

pub fn get(binding: &TableBinding, id: &Value) -> Value {
    json!([GET, [table(binding), datum(id)]])
}

pub fn insert_replace(binding: &TableBinding, record: &Record) -> Value {
    let document = datum(&Value::Object(record.fields().clone()));
    json!([INSERT, [table(binding), document], {"conflict": "replace"}])
}

pub fn start(term: Value) -> Value {
    json!([QUERY_START, term, {}])
}

pub fn continue_query() -> Value {
    json!([QUERY_CONTINUE])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Atom,
    Sequence,
    Partial,
    Error(&'static str),
    Unexpected(u64),
}

/// A decoded response frame.
#[derive(Debug, Deserialize)]
pub struct Response {
    t: u64,
    #[serde(default)]
    pub r: Vec<Value>,
}

impl Response {
    pub const fn kind(&self) -> ResponseKind {
        match self.t {
            1 => ResponseKind::Atom,
            2 => ResponseKind::Sequence,
            3 => ResponseKind::Partial,
            16 => ResponseKind::Error("client error"),
            17 => ResponseKind::Error("compile error"),
            18 => ResponseKind::Error("runtime error"),
            other => ResponseKind::Unexpected(other),
        }
    }

    pub fn error_message(&self) -> String {
        match self.r.first() {
            Some(Value::String(message)) => message.clone(),
            Some(other) => other.to_string(),
            None => "no message".to_string(),
        }
    }
}

/// Result object of an `INSERT`.
#[derive(Debug, Default, Deserialize)]
pub struct WriteSummary {
    #[serde(default)]
    pub errors: u64,
    pub first_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datum_wraps_nested_arrays() {
        let value = json!({"id": "1", "tags": ["a", ["b"]], "n": 3});
        assert_eq!(
            datum(&value),
            json!({"id": "1", "tags": [2, ["a", [2, ["b"]]]], "n": 3})
        );
    }

    #[test]
    fn test_get_term_targets_database_and_table() {
        let binding = TableBinding::new("mydb", "users");
        assert_eq!(
            start(get(&binding, &json!("1"))),
            json!([1, [16, [[15, [[14, ["mydb"]], "users"]], "1"]], {}])
        );
    }

    #[test]
    fn test_insert_uses_replace_on_conflict() {
        let binding = TableBinding::new("mydb", "users");
        let record = Record::from_value(json!({"id": "1", "roles": ["admin"]})).unwrap();
        let term = insert_replace(&binding, &record);
        assert_eq!(term[0], json!(56));
        assert_eq!(term[1][1], json!({"id": "1", "roles": [2, ["admin"]]}));
        assert_eq!(term[2], json!({"conflict": "replace"}));
    }

    #[test]
    fn test_response_kinds_and_error_message() {
        let response: Response =
            serde_json::from_value(json!({"t": 18, "r": ["Table `mydb.nope` does not exist."]}))
                .unwrap();
        assert_eq!(response.kind(), ResponseKind::Error("runtime error"));
        assert_eq!(response.error_message(), "Table `mydb.nope` does not exist.");

        let partial: Response = serde_json::from_value(json!({"t": 3, "r": [1, 2]})).unwrap();
        assert_eq!(partial.kind(), ResponseKind::Partial);
    }
}
