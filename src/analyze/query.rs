//! Value conversion helpers for query results.

use rusqlite::types::Value;

/// Convert a SQLite value to a properly typed JSON value.
pub(super) fn sqlite_value_to_json(value: Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(n) => serde_json::json!(n),
        Value::Real(n) => {
            if n.is_finite() {
                serde_json::json!(n)
            } else {
                serde_json::Value::String(n.to_string())
            }
        }
        Value::Text(s) => serde_json::Value::String(s),
        Value::Blob(b) => serde_json::Value::String(format!("<{} bytes>", b.len())),
    }
}

/// Convert a SQLite value to a display string.
pub(super) fn sqlite_value_to_string(value: Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(n) => n.to_string(),
        Value::Real(n) => n.to_string(),
        Value::Text(s) => s,
        Value::Blob(b) => format!("<{} bytes>", b.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_value_to_json_types() {
        assert_eq!(sqlite_value_to_json(Value::Null), serde_json::Value::Null);
        assert_eq!(sqlite_value_to_json(Value::Integer(-100)), serde_json::json!(-100));
        assert_eq!(sqlite_value_to_json(Value::Real(1.25)), serde_json::json!(1.25));
        assert_eq!(
            sqlite_value_to_json(Value::Text("MEM LD".to_string())),
            serde_json::json!("MEM LD")
        );
    }

    #[test]
    fn test_sqlite_value_to_json_nan() {
        assert!(sqlite_value_to_json(Value::Real(f64::NAN)).is_string());
    }

    #[test]
    fn test_sqlite_value_to_string() {
        assert_eq!(sqlite_value_to_string(Value::Null), "NULL");
        assert_eq!(sqlite_value_to_string(Value::Blob(vec![1, 2])), "<2 bytes>");
    }
}
