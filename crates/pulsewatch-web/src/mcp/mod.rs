//! Model Context Protocol dispatch: a JSON-RPC 2.0 envelope delivered
//! either as a single HTTP response body or as a stream of SSE events
//! (spec.md §4.E "MCP JSON-RPC adapter", "SSE adapter").

pub mod jsonrpc;
pub mod sse;

pub use jsonrpc::{DefaultMethodTable, DispatchOutcome, McpCallResult, McpMethodTable};

use crate::response::Response;

/// Handle `POST /mcp` (or `/mcp` without an SSE hint): one JSON body in,
/// one JSON body out.
pub fn handle_http(body: &[u8], table: &dyn McpMethodTable) -> Response {
    match jsonrpc::dispatch(body, table) {
        DispatchOutcome::AcceptedEmpty => Response::new(202),
        DispatchOutcome::Body(bytes) => Response::json(200, bytes),
        DispatchOutcome::ParseFailed(e) => Response::json(400, parse_error_body(&e)),
    }
}

/// Handle `/sse` (or `/mcp` with an SSE hint): emit one `message` event per
/// JSON-RPC response, then a final `complete` event.
pub fn handle_sse(body: &[u8], table: &dyn McpMethodTable) -> Response {
    let events = match jsonrpc::dispatch_each(body, table) {
        Ok(responses) => {
            let mut text = String::new();
            for response in &responses {
                text.push_str(&sse::message_event(response));
            }
            text.push_str(&sse::complete_event());
            text
        }
        Err(e) => return sse_error_response(&e),
    };

    Response::new(200).with_body("text/event-stream", events.into_bytes())
}

fn sse_error_response(e: &crate::error::McpError) -> Response {
    let body = sse::error_event(&e.message());
    Response::new(400).with_body("text/event-stream", body.into_bytes())
}

fn parse_error_body(e: &crate::error::McpError) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "jsonrpc": "2.0",
        "id": null,
        "error": { "code": e.json_rpc_code(), "message": e.message() }
    }))
    .expect("static shape")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_batch_end_to_end() {
        let body = br#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","method":"notify"},{"jsonrpc":"2.0","id":2,"method":"unknown"}]"#;
        let response = handle_http(body, &DefaultMethodTable);
        assert_eq!(response.status, 200);
    }

    #[test]
    fn sse_single_call_emits_message_then_complete() {
        let body = br#"{"jsonrpc":"2.0","id":"a","method":"ping"}"#;
        let response = handle_sse(body, &DefaultMethodTable);
        let text = String::from_utf8(response.body).unwrap();
        assert!(text.starts_with("event: message\n"));
        assert!(text.ends_with("event: complete\ndata: {}\n\n"));
    }
}
