//! Scripted evaluation. The expression itself says how the engine should
//! behave, so tests can provoke every reply shape over a real socket.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// `{id, ok: true, result}`
    Result(Value),
    /// `{id, ok: false, error?}`
    Failure(Option<String>),
    /// Answer normally, then send the same answer again.
    Twice(Value),
    /// Answer with no `id` at all.
    NoId(Value),
    /// Answer under an id that was never issued.
    WrongId(Value),
    /// A frame that is not JSON.
    Garbage,
    /// No answer.
    Silent,
    /// Close the connection without answering.
    Drop,
}

pub const GARBAGE_FRAME: &str = "<<not json>>";

pub fn evaluate(expr: &str) -> Reply {
    let expr = expr.trim();
    match expr {
        "silent" => return Reply::Silent,
        "drop" => return Reply::Drop,
        "garbage" => return Reply::Garbage,
        "fail" => return Reply::Failure(None),
        _ => {}
    }

    if let Some(msg) = expr.strip_prefix("fail ") {
        return Reply::Failure(Some(msg.trim().to_string()));
    }
    if let Some(rest) = expr.strip_prefix("twice ") {
        return Reply::Twice(value_of(rest));
    }
    if let Some(rest) = expr.strip_prefix("noid ") {
        return Reply::NoId(value_of(rest));
    }
    if let Some(rest) = expr.strip_prefix("badid ") {
        return Reply::WrongId(value_of(rest));
    }

    Reply::Result(value_of(expr))
}

/// JSON literals evaluate to themselves; anything else echoes back as text.
fn value_of(expr: &str) -> Value {
    let expr = expr.trim();
    serde_json::from_str(expr).unwrap_or_else(|_| Value::String(expr.to_string()))
}
