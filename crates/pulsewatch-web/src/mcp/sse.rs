//! Server-Sent Events framing (spec.md §4.E "SSE adapter", §6 "SSE event
//! frame", §8 invariant 9).

use serde_json::Value;

/// Frame one SSE event. `data` must already be single-line JSON; the MCP
/// JSON encoder guarantees that, so this never re-escapes it.
pub fn frame_event(name: &str, data: &Value) -> String {
    format!("event: {name}\ndata: {data}\n\n")
}

pub fn message_event(payload: &Value) -> String {
    frame_event("message", payload)
}

pub fn complete_event() -> String {
    frame_event("complete", &Value::Object(Default::default()))
}

pub fn error_event(message: &str) -> String {
    frame_event("error", &serde_json::json!({ "message": message }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_event_has_blank_line_terminator() {
        let frame = message_event(&serde_json::json!({"ok": true}));
        assert!(frame.starts_with("event: message\ndata: "));
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn complete_event_carries_empty_object() {
        assert_eq!(complete_event(), "event: complete\ndata: {}\n\n");
    }

    #[test]
    fn frames_never_contain_internal_blank_line() {
        let frame = message_event(&serde_json::json!({"a": 1, "b": "two"}));
        let body = frame.trim_end_matches("\n\n");
        assert!(!body.contains("\n\n"));
    }
}
