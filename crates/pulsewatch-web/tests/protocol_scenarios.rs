//! End-to-end scenarios S4-S6 driven through the real `Dispatcher`, with
//! requests and responses built directly rather than over a socket
//! (mirrors how `frame_codec.rs` tests feed a `Cursor` instead of a real
//! `TcpStream`).

use std::collections::HashMap;
use std::path::PathBuf;

use pulsewatch_web::acl::AclMask;
use pulsewatch_web::dispatch::{ApiHandler, Dispatcher};
use pulsewatch_web::parser::{Method, Request};
use pulsewatch_web::response::{Response, ResponseContext};

fn request(method: Method, path: &str, headers: &[(&str, &str)], body: &[u8]) -> Request {
    let mut map = HashMap::new();
    for (k, v) in headers {
        map.insert(k.to_ascii_lowercase(), v.to_string());
    }
    Request {
        method,
        path: path.to_string(),
        query: String::new(),
        headers: map,
        body: body.to_vec(),
    }
}

fn ctx() -> ResponseContext {
    ResponseContext {
        transaction_id: "test-txn".into(),
        origin: None,
        keep_alive: true,
        accepts_gzip: false,
    }
}

/// Answers `/api/v1/info` with a fixed etag so S4 can be driven through the
/// real dispatcher rather than asserting on `Response::render` in isolation.
struct EtagInfoHandler;

const CURRENT_ETAG: &str = "\"pulsewatch-info-v1\"";

impl ApiHandler for EtagInfoHandler {
    fn handle(&self, _version: &str, request: &Request, remaining_path: &str) -> Response {
        if remaining_path != "info" {
            return Response::plain_text(404, "no such api route");
        }
        if request.header("if-none-match") == Some(CURRENT_ETAG) {
            return Response::not_modified();
        }
        Response::json(200, br#"{"version":"1"}"#.to_vec())
    }
}

fn dispatcher_with_etag_info() -> Dispatcher {
    Dispatcher::new(PathBuf::from("/srv/www"), "netdata.conf snapshot".into())
        .with_api_handler("v1", Box::new(EtagInfoHandler))
}

#[test]
fn s4_matching_etag_yields_304_with_no_transfer_encoding() {
    let dispatcher = dispatcher_with_etag_info();
    let req = request(Method::Get, "/api/v1/info", &[("If-None-Match", CURRENT_ETAG)], b"");

    let response = dispatcher.route(&req, AclMask::ALL).unwrap();
    assert_eq!(response.status, 304);

    let bytes = response.render(&ctx());
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.starts_with("HTTP/1.1 304 Not Modified\r\n"));
    assert!(text.contains("Content-Length: 0\r\n"));
    assert!(!text.contains("Transfer-Encoding"));
    assert!(text.ends_with("\r\n\r\n"));
}

#[test]
fn s4_mismatched_etag_yields_200_with_body() {
    let dispatcher = dispatcher_with_etag_info();
    let req = request(Method::Get, "/api/v1/info", &[("If-None-Match", "\"stale\"")], b"");

    let response = dispatcher.route(&req, AclMask::ALL).unwrap();
    assert_eq!(response.status, 200);
}

#[test]
fn s5_mcp_batch_preserves_order_and_omits_notification() {
    let dispatcher = Dispatcher::new(PathBuf::from("/srv/www"), "conf".into());
    let body = br#"[{"jsonrpc":"2.0","id":1,"method":"ping"},{"jsonrpc":"2.0","method":"notify"},{"jsonrpc":"2.0","id":2,"method":"unknown"}]"#;
    let req = request(Method::Post, "/mcp", &[("Content-Type", "application/json")], body);

    let response = dispatcher.route(&req, AclMask::ALL).unwrap();
    assert_eq!(response.status, 200);

    let parsed: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    let items = parsed.as_array().expect("batch response is a JSON array");
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["id"], 1);
    assert_eq!(items[0]["result"], serde_json::json!({}));
    assert_eq!(items[1]["id"], 2);
    assert_eq!(items[1]["error"]["code"], -32601);
}

#[test]
fn s5_pure_notification_batch_is_202_with_empty_body() {
    let dispatcher = Dispatcher::new(PathBuf::from("/srv/www"), "conf".into());
    let body = br#"[{"jsonrpc":"2.0","method":"notify"}]"#;
    let req = request(Method::Post, "/mcp", &[], body);

    let response = dispatcher.route(&req, AclMask::ALL).unwrap();
    assert_eq!(response.status, 202);
    assert!(response.body.is_empty());
}

#[test]
fn s6_sse_transport_frames_message_then_complete() {
    let dispatcher = Dispatcher::new(PathBuf::from("/srv/www"), "conf".into());
    let body = br#"{"jsonrpc":"2.0","id":"a","method":"ping"}"#;
    let req = request(Method::Get, "/sse", &[], body);

    let response = dispatcher.route(&req, AclMask::ALL).unwrap();
    assert_eq!(response.status, 200);
    assert!(response.headers.iter().any(|(k, v)| k == "Content-Type" && v == "text/event-stream"));

    let text = String::from_utf8(response.body).unwrap();
    let mut events = text.split("\n\n").filter(|s| !s.is_empty());
    assert_eq!(events.next(), Some("event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":\"a\",\"result\":{}}"));
    assert_eq!(events.next(), Some("event: complete\ndata: {}"));
    assert!(events.next().is_none());
}
