use serde_json::{Map, Value};

pub type Id = i64;

/// Scalar column values of a stored row, keyed by column name.
pub type Fields = Map<String, Value>;

/// One node of a client-supplied object graph.
pub type Payload = Map<String, Value>;

/// Interpret a payload value as a primary key.
///
/// Only positive integers (or strings holding one) count as keys; null, empty
/// strings and zero mean "no key", which makes the node a new record.
pub fn key_from_value(value: &Value) -> Option<Id> {
    let id = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.trim().parse::<Id>().ok()?,
        _ => return None,
    };
    (id > 0).then_some(id)
}

/// Read the primary key of a payload node.
pub fn payload_key(payload: &Payload, primary_key: &str) -> Option<Id> {
    payload.get(primary_key).and_then(key_from_value)
}

/// Text form used when comparing payload values against stored columns.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Join two dotted path fragments.
pub fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", prefix, segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_from_value() {
        assert_eq!(key_from_value(&json!(5)), Some(5));
        assert_eq!(key_from_value(&json!("12")), Some(12));
        assert_eq!(key_from_value(&json!(" 7 ")), Some(7));
        assert_eq!(key_from_value(&json!(0)), None);
        assert_eq!(key_from_value(&json!("")), None);
        assert_eq!(key_from_value(&json!(null)), None);
        assert_eq!(key_from_value(&json!(1.5)), None);
        assert_eq!(key_from_value(&json!({"id": 1})), None);
    }

    #[test]
    fn test_value_text_and_join() {
        assert_eq!(value_text(&json!("abc")).as_deref(), Some("abc"));
        assert_eq!(value_text(&json!(3)).as_deref(), Some("3"));
        assert_eq!(value_text(&json!(null)), None);
        assert_eq!(join_path("", "comments"), "comments");
        assert_eq!(join_path("comments.0", "author"), "comments.0.author");
    }
}
