//! Top-level path routing (spec.md §4.E "Path decoding and dispatch", §6
//! "URL paths").

use std::collections::HashMap;
use std::path::PathBuf;

use crate::acl::{required_mask_for_path, AclMask};
use crate::error::HttpError;
use crate::mcp::{self, DefaultMethodTable, McpMethodTable};
use crate::parser::Request;
use crate::response::{Response, StaticFileBody};
use crate::static_files::{self, STATIC_CHUNK_SIZE};

/// One versioned `/api/vN/...` surface. The real alerting/registry/query
/// handlers for these routes are external collaborators (spec.md §1); this
/// core only needs the dispatcher to reach them.
pub trait ApiHandler: Send + Sync {
    fn handle(&self, version: &str, request: &Request, remaining_path: &str) -> Response;
}

pub struct StubApiHandler;

impl ApiHandler for StubApiHandler {
    fn handle(&self, version: &str, _request: &Request, remaining_path: &str) -> Response {
        Response::plain_text(501, format!("api/{version}/{remaining_path} not implemented"))
    }
}

pub struct Dispatcher {
    web_root: PathBuf,
    api_handlers: HashMap<String, Box<dyn ApiHandler>>,
    mcp_table: Box<dyn McpMethodTable>,
    config_snapshot: String,
}

impl Dispatcher {
    pub fn new(web_root: PathBuf, config_snapshot: String) -> Self {
        let mut api_handlers: HashMap<String, Box<dyn ApiHandler>> = HashMap::new();
        for version in ["v1", "v2", "v3"] {
            api_handlers.insert(version.to_string(), Box::new(StubApiHandler));
        }
        Dispatcher {
            web_root,
            api_handlers,
            mcp_table: Box::new(DefaultMethodTable),
            config_snapshot,
        }
    }

    pub fn with_mcp_table(mut self, table: Box<dyn McpMethodTable>) -> Self {
        self.mcp_table = table;
        self
    }

    pub fn with_api_handler(mut self, version: &str, handler: Box<dyn ApiHandler>) -> Self {
        self.api_handlers.insert(version.to_string(), handler);
        self
    }

    /// Route a parsed request, enforcing the listener's ACL mask first.
    pub fn route(&self, request: &Request, listener_acl: AclMask) -> Result<Response, HttpError> {
        let trimmed = request.path.trim_start_matches('/');
        let mut segments = trimmed.splitn(2, '/');
        let top = segments.next().unwrap_or("");
        let rest = segments.next().unwrap_or("");

        let required = required_mask_for_path(top);
        if !listener_acl.contains(required) {
            return Err(HttpError::AclForbidden);
        }

        match top {
            "api" => self.route_api(rest, request),
            "mcp" => Ok(self.route_mcp(request)),
            "sse" => Ok(mcp::handle_sse(&request.body, self.mcp_table.as_ref())),
            "host" | "node" => self.route_host_switch(rest),
            "netdata.conf" => Ok(Response::plain_text(200, self.config_snapshot.clone())),
            "v0" | "v1" | "v2" | "v3" => Ok(Response::plain_text(200, format!("dashboard {top}"))),
            _ => self.route_static(&request.path),
        }
    }

    fn route_api(&self, rest: &str, request: &Request) -> Result<Response, HttpError> {
        let mut parts = rest.splitn(2, '/');
        let version = parts.next().unwrap_or("");
        let tail = parts.next().unwrap_or("");
        let handler = self.api_handlers.get(version).ok_or(HttpError::NotFound)?;
        Ok(handler.handle(version, request, tail))
    }

    fn route_mcp(&self, request: &Request) -> Response {
        if request.wants_sse() {
            mcp::handle_sse(&request.body, self.mcp_table.as_ref())
        } else {
            mcp::handle_http(&request.body, self.mcp_table.as_ref())
        }
    }

    fn route_host_switch(&self, rest: &str) -> Result<Response, HttpError> {
        if rest.is_empty() {
            return Err(HttpError::InvalidArguments("missing host/node id".into()));
        }
        let mut parts = rest.splitn(2, '/');
        let id = parts.next().unwrap_or("");
        let remaining = parts.next().unwrap_or("");
        if remaining.starts_with("host/") || remaining.starts_with("node/") {
            return Err(HttpError::InvalidArguments("nested host context switch".into()));
        }
        Ok(Response::plain_text(200, format!("switched host context to {id}")))
    }

    fn route_static(&self, path: &str) -> Result<Response, HttpError> {
        let resolved = static_files::resolve(&self.web_root, path)?;
        let metadata = std::fs::metadata(&resolved).map_err(|_| HttpError::NotFound)?;
        let mime = static_files::mime_for_extension(path);

        if metadata.len() > STATIC_CHUNK_SIZE as u64 {
            return Ok(Response::static_file(
                mime,
                StaticFileBody {
                    path: resolved,
                    len: metadata.len(),
                },
            ));
        }

        let bytes = std::fs::read(&resolved).map_err(|_| HttpError::NotFound)?;
        Ok(Response::new(200).with_body(mime, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    fn request(path: &str) -> Request {
        Request {
            method: crate::parser::Method::Get,
            path: path.to_string(),
            query: String::new(),
            headers: StdHashMap::new(),
            body: Vec::new(),
        }
    }

    #[test]
    fn api_route_reaches_stub_handler() {
        let dispatcher = Dispatcher::new(PathBuf::from("/srv/www"), "conf".into());
        let response = dispatcher.route(&request("/api/v1/info"), AclMask::ALL).unwrap();
        assert_eq!(response.status, 501);
    }

    #[test]
    fn acl_forbidden_when_listener_lacks_feature() {
        let dispatcher = Dispatcher::new(PathBuf::from("/srv/www"), "conf".into());
        let err = dispatcher.route(&request("/mcp"), AclMask::DASHBOARD).unwrap_err();
        assert!(matches!(err, HttpError::AclForbidden));
    }

    #[test]
    fn nested_host_switch_is_rejected() {
        let dispatcher = Dispatcher::new(PathBuf::from("/srv/www"), "conf".into());
        let err = dispatcher.route(&request("/host/abc/node/def"), AclMask::ALL).unwrap_err();
        assert!(matches!(err, HttpError::InvalidArguments(_)));
    }

    #[test]
    fn netdata_conf_route_returns_snapshot() {
        let dispatcher = Dispatcher::new(PathBuf::from("/srv/www"), "listen = *\n".into());
        let response = dispatcher.route(&request("/netdata.conf"), AclMask::ALL).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"listen = *\n");
    }

    #[test]
    fn small_static_file_is_buffered_whole() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("app.js"), b"console.log(1)").unwrap();
        let dispatcher = Dispatcher::new(root.path().to_path_buf(), "conf".into());
        let response = dispatcher.route(&request("/app.js"), AclMask::ALL).unwrap();
        assert_eq!(response.body, b"console.log(1)");
        assert!(response.static_file.is_none());
    }

    #[test]
    fn large_static_file_streams_from_disk() {
        let root = tempfile::tempdir().unwrap();
        let bytes = vec![b'x'; STATIC_CHUNK_SIZE + 1];
        let path = root.path().join("big.bin");
        std::fs::write(&path, &bytes).unwrap();
        let dispatcher = Dispatcher::new(root.path().to_path_buf(), "conf".into());
        let response = dispatcher.route(&request("/big.bin"), AclMask::ALL).unwrap();
        assert!(response.body.is_empty());
        let file = response.static_file.unwrap();
        assert_eq!(file.path, path);
        assert_eq!(file.len, bytes.len() as u64);
    }
}
