use kdbzph_protocol::ResponseEnvelope;
use serde_json::Value;

pub const EMPTY_EXPRESSION: &str = "(empty expression)";
pub const PENDING: &str = "...";
pub const UNKNOWN_ERROR: &str = "unknown error";

/// Strings are shown raw, anything else as 2-space indented JSON.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

pub fn render_envelope(envelope: &ResponseEnvelope) -> String {
    if envelope.ok {
        render_value(envelope.result.as_ref().unwrap_or(&Value::Null))
    } else {
        format!(
            "ERROR: {}",
            envelope
                .error
                .as_deref()
                .filter(|e| !e.is_empty())
                .unwrap_or(UNKNOWN_ERROR)
        )
    }
}

pub fn render_parse_error(detail: impl std::fmt::Display) -> String {
    format!("parse error: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(v: Value) -> ResponseEnvelope {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn string_result_is_literal() {
        assert_eq!(render_envelope(&env(json!({"ok": true, "result": "hello"}))), "hello");
    }

    #[test]
    fn structured_result_is_indented() {
        assert_eq!(
            render_envelope(&env(json!({"ok": true, "result": {"a": 1}}))),
            "{\n  \"a\": 1\n}"
        );
        assert_eq!(render_envelope(&env(json!({"ok": true, "result": 42}))), "42");
    }

    #[test]
    fn errors_are_prefixed() {
        assert_eq!(
            render_envelope(&env(json!({"ok": false, "error": "type error"}))),
            "ERROR: type error"
        );
        assert_eq!(
            render_envelope(&env(json!({"ok": false}))),
            "ERROR: unknown error"
        );
    }

    #[test]
    fn missing_result_renders_null() {
        assert_eq!(render_envelope(&env(json!({"ok": true}))), "null");
    }
}
