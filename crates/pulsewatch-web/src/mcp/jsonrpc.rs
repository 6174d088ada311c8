//! JSON-RPC 2.0 envelope, batch dispatch, and error serialization
//! (spec.md §4.E "MCP JSON-RPC adapter", §8 invariant 8, scenario S5).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::McpError;

/// Transport-wide response size cap (spec.md §6 "MCP over HTTP").
pub const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    fn validate(&self) -> Result<(), McpError> {
        if self.jsonrpc != "2.0" {
            return Err(McpError::BadRequest("jsonrpc must be \"2.0\"".into()));
        }
        if let Some(params) = &self.params {
            if !params.is_object() {
                return Err(McpError::InvalidParams("params must be an object".into()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcSuccess {
    jsonrpc: &'static str,
    id: Value,
    result: Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcFailure {
    jsonrpc: &'static str,
    id: Value,
    error: JsonRpcErrorBody,
}

#[derive(Debug, Serialize)]
struct JsonRpcErrorBody {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// A method call's result: either one value, or a sequence of chunks a
/// streaming-capable caller (SSE) can emit as separate events. A
/// non-streaming caller (plain HTTP) can only accept a single chunk; more
/// than one becomes [`McpError::StreamingNotSupported`].
pub enum McpCallResult {
    Single(Value),
    Chunks(Vec<Value>),
}

/// Handler table for MCP methods. The built-in [`DefaultMethodTable`] only
/// answers `ping`/`notify`; the rest of the method surface is an open
/// extension point implemented by embedders.
pub trait McpMethodTable: Send + Sync {
    fn call(&self, method: &str, params: Option<&Value>) -> Result<McpCallResult, McpError>;
}

pub struct DefaultMethodTable;

impl McpMethodTable for DefaultMethodTable {
    fn call(&self, method: &str, _params: Option<&Value>) -> Result<McpCallResult, McpError> {
        match method {
            "ping" => Ok(McpCallResult::Single(Value::Object(Default::default()))),
            "notify" => Ok(McpCallResult::Single(Value::Null)),
            other => Err(McpError::NotFound(other.to_string())),
        }
    }
}

/// Outcome of dispatching one JSON-RPC document (single request or batch).
pub enum DispatchOutcome {
    /// `202 Accepted`, no body — every request in the batch was a
    /// notification.
    AcceptedEmpty,
    /// A JSON body to return with `200`.
    Body(Vec<u8>),
    /// The input was not valid JSON or not a request/array at all.
    ParseFailed(McpError),
}

/// Parse and dispatch one MCP request body against `table`.
pub fn dispatch(body: &[u8], table: &dyn McpMethodTable) -> DispatchOutcome {
    let parsed: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => return DispatchOutcome::ParseFailed(McpError::ParseError(e.to_string())),
    };

    let requests: Vec<Value> = match parsed {
        Value::Array(items) => items,
        single @ Value::Object(_) => vec![single],
        _ => return DispatchOutcome::ParseFailed(McpError::BadRequest("expected object or array".into())),
    };

    let mut responses = Vec::new();
    for item in requests {
        let request: JsonRpcRequest = match serde_json::from_value(item) {
            Ok(r) => r,
            Err(e) => {
                responses.push(serde_json::to_value(JsonRpcFailure {
                    jsonrpc: "2.0",
                    id: Value::Null,
                    error: JsonRpcErrorBody {
                        code: McpError::BadRequest(String::new()).json_rpc_code(),
                        message: e.to_string(),
                        data: None,
                    },
                }).expect("static shape"));
                continue;
            }
        };

        if let Some(response) = handle_one(&request, table, false) {
            responses.push(response);
        }
    }

    if responses.is_empty() {
        return DispatchOutcome::AcceptedEmpty;
    }

    let body = if responses.len() == 1 && !was_batch(body) {
        serde_json::to_vec(&responses[0])
    } else {
        serde_json::to_vec(&responses)
    };

    match body {
        Ok(bytes) if bytes.len() <= MAX_RESPONSE_BYTES => DispatchOutcome::Body(bytes),
        Ok(_) => DispatchOutcome::ParseFailed(McpError::ResponseTooLarge),
        Err(e) => DispatchOutcome::ParseFailed(McpError::InternalError(e.to_string())),
    }
}

/// Like [`dispatch`] but returns each non-notification response
/// individually instead of combining them into one JSON body — the shape
/// the SSE adapter needs, since it emits one `message` event per response.
pub fn dispatch_each(body: &[u8], table: &dyn McpMethodTable) -> Result<Vec<Value>, McpError> {
    let parsed: Value = serde_json::from_slice(body).map_err(|e| McpError::ParseError(e.to_string()))?;

    let requests: Vec<Value> = match parsed {
        Value::Array(items) => items,
        single @ Value::Object(_) => vec![single],
        _ => return Err(McpError::BadRequest("expected object or array".into())),
    };

    let mut responses = Vec::new();
    for item in requests {
        let request: JsonRpcRequest = serde_json::from_value(item).map_err(|e| McpError::BadRequest(e.to_string()))?;
        if let Some(response) = handle_one(&request, table, true) {
            responses.push(response);
        }
    }
    Ok(responses)
}

fn was_batch(body: &[u8]) -> bool {
    body.iter().find(|b| !b.is_ascii_whitespace()).is_some_and(|b| *b == b'[')
}

/// Dispatch one request and fold its result down to the single JSON value a
/// JSON-RPC response carries. `supports_chunks` is true for transports
/// (SSE) that can fan a handler's chunks out as separate events; a
/// non-streaming caller (HTTP) gets [`McpError::StreamingNotSupported`] if
/// the handler produced anything but exactly one chunk.
fn handle_one(request: &JsonRpcRequest, table: &dyn McpMethodTable, supports_chunks: bool) -> Option<Value> {
    let id = request.id.clone().unwrap_or(Value::Null);

    if let Err(e) = request.validate() {
        return request.id.as_ref().map(|_| error_value(id, &e));
    }

    let result = table.call(&request.method, request.params.as_ref()).and_then(|outcome| match outcome {
        McpCallResult::Single(v) => Ok(v),
        McpCallResult::Chunks(chunks) if supports_chunks => Ok(Value::Array(chunks)),
        McpCallResult::Chunks(mut chunks) if chunks.len() == 1 => Ok(chunks.remove(0)),
        McpCallResult::Chunks(_) => Err(McpError::StreamingNotSupported),
    });

    if request.is_notification() {
        return None;
    }

    match result {
        Ok(value) => Some(
            serde_json::to_value(JsonRpcSuccess {
                jsonrpc: "2.0",
                id,
                result: value,
            })
            .expect("static shape"),
        ),
        Err(e) => Some(error_value(id, &e)),
    }
}

fn error_value(id: Value, e: &McpError) -> Value {
    serde_json::to_value(JsonRpcFailure {
        jsonrpc: "2.0",
        id,
        error: JsonRpcErrorBody {
            code: e.json_rpc_code(),
            message: e.message(),
            data: None,
        },
    })
    .expect("static shape")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ChunkingMethodTable;

    impl McpMethodTable for ChunkingMethodTable {
        fn call(&self, method: &str, _params: Option<&Value>) -> Result<McpCallResult, McpError> {
            match method {
                "stream" => Ok(McpCallResult::Chunks(vec![Value::from(1), Value::from(2)])),
                other => Err(McpError::NotFound(other.to_string())),
            }
        }
    }

    #[test]
    fn multi_chunk_result_over_http_is_streaming_not_supported() {
        let body = br#"{"jsonrpc":"2.0","id":1,"method":"stream"}"#;
        match dispatch(body, &ChunkingMethodTable) {
            DispatchOutcome::Body(bytes) => {
                let v: Value = serde_json::from_slice(&bytes).unwrap();
                assert_eq!(v["error"]["code"], -32002);
            }
            DispatchOutcome::AcceptedEmpty => panic!("expected Body, got AcceptedEmpty"),
            DispatchOutcome::ParseFailed(e) => panic!("expected Body, got ParseFailed({e})"),
        }
    }

    #[test]
    fn multi_chunk_result_over_sse_is_accepted() {
        let body = br#"{"jsonrpc":"2.0","id":1,"method":"stream"}"#;
        let responses = dispatch_each(body, &ChunkingMethodTable).unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["result"], serde_json::json!([1, 2]));
    }

    #[test]
    fn single_ping_returns_result() {
        let body = br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        match dispatch(body, &DefaultMethodTable) {
            DispatchOutcome::Body(bytes) => {
                let v: Value = serde_json::from_slice(&bytes).unwrap();
                assert_eq!(v["result"], serde_json::json!({}));
            }
            _ => panic!("expected Body"),
        }
    }

    #[test]
    fn batch_omits_notification_and_preserves_order() {
        let body = br#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","method":"notify"},{"jsonrpc":"2.0","id":2,"method":"unknown"}]"#;
        match dispatch(body, &DefaultMethodTable) {
            DispatchOutcome::Body(bytes) => {
                let v: Value = serde_json::from_slice(&bytes).unwrap();
                let arr = v.as_array().unwrap();
                assert_eq!(arr.len(), 2);
                assert_eq!(arr[0]["id"], 1);
                assert_eq!(arr[1]["error"]["code"], -32601);
            }
            _ => panic!("expected Body"),
        }
    }

    #[test]
    fn pure_notification_batch_is_accepted_empty() {
        let body = br#"[{"jsonrpc":"2.0","method":"notify"}]"#;
        assert!(matches!(dispatch(body, &DefaultMethodTable), DispatchOutcome::AcceptedEmpty));
    }

    #[test]
    fn malformed_json_is_parse_error() {
        let body = b"{not json";
        match dispatch(body, &DefaultMethodTable) {
            DispatchOutcome::ParseFailed(e) => assert_eq!(e.json_rpc_code(), -32700),
            _ => panic!("expected ParseFailed"),
        }
    }

    #[test]
    fn non_object_params_is_invalid_params() {
        let body = br#"{"jsonrpc":"2.0","id":1,"method":"ping","params":"oops"}"#;
        match dispatch(body, &DefaultMethodTable) {
            DispatchOutcome::Body(bytes) => {
                let v: Value = serde_json::from_slice(&bytes).unwrap();
                assert_eq!(v["error"]["code"], -32602);
            }
            _ => panic!("expected Body"),
        }
    }
}
