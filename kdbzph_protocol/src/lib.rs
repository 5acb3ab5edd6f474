use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Storage key the REPL history is persisted under.
pub const HISTORY_KEY: &str = "kdbzph_repl_history";
/// Most recent entries kept in persisted history.
pub const HISTORY_CAP: usize = 100;

/// Outbound session frame: `{"id": "...", "expr": "..."}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EvalRequest {
    pub id: String,
    pub expr: String,
}

/// Inbound session frame.
///
/// `result` is present iff `ok`, `error` iff not `ok`. `id` is absent for
/// replies the engine could not correlate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEnvelope {
    pub fn success(id: Option<String>, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<String>, error: Option<String>) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchAction {
    Eval,
    Plot,
}

/// Body of `POST /` on the batch (non-session) path.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BatchRequest {
    pub action: BatchAction,
    pub expr: String,
}

/// One row of `GET /api/tables`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TableInfo {
    pub name: String,
    pub rows: u64,
    pub cols: u64,
}

/// `GET /api/meta?table=` reply: column names and their type codes.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct TableMeta {
    #[serde(default)]
    pub c: Vec<String>,
    #[serde(default)]
    pub t: Vec<String>,
}

/// Column-oriented table slice from `GET /api/data`, in server key order.
pub type ColumnData = Map<String, Value>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlotTrace {
    #[serde(default)]
    pub x: Vec<Value>,
    #[serde(default)]
    pub y: Vec<Value>,
    #[serde(default)]
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    pub error: String,
}

/// Collaborator endpoints answer either their payload or `{error}`.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum ApiReply<T> {
    Error(ServerError),
    Ok(T),
}

impl<T> ApiReply<T> {
    pub fn into_result(self) -> Result<T, String> {
        match self {
            ApiReply::Ok(v) => Ok(v),
            ApiReply::Error(e) => Err(e.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_without_id_or_result_parses() {
        let env: ResponseEnvelope = serde_json::from_str(r#"{"ok": false}"#).unwrap();
        assert_eq!(env.id, None);
        assert!(!env.ok);
        assert_eq!(env.error, None);
    }

    #[test]
    fn envelope_missing_ok_is_rejected() {
        assert!(serde_json::from_str::<ResponseEnvelope>(r#"{"id": "1"}"#).is_err());
    }

    #[test]
    fn request_wire_shape() {
        let req = EvalRequest {
            id: "7".to_string(),
            expr: "til 3".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"id": "7", "expr": "til 3"})
        );
    }

    #[test]
    fn api_reply_prefers_error_shape() {
        let reply: ApiReply<TableMeta> =
            serde_json::from_str(r#"{"error": "no such table"}"#).unwrap();
        assert_eq!(reply.into_result().unwrap_err(), "no such table");

        let reply: ApiReply<ColumnData> =
            serde_json::from_str(r#"{"error": [1, 2], "b": [3, 4]}"#).unwrap();
        let data = reply.into_result().unwrap();
        assert_eq!(data.keys().collect::<Vec<_>>(), vec!["error", "b"]);
    }

    #[test]
    fn batch_request_action_is_lowercase() {
        let req = BatchRequest {
            action: BatchAction::Plot,
            expr: "x".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"action": "plot", "expr": "x"})
        );
    }
}
