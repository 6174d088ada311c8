//! Response construction: status line, standard headers, and the
//! gzip/chunked vs. `Content-Length` framing decision (spec.md §4.E
//! "Response construction", §8 invariant 7).

use std::path::PathBuf;

use crate::compression;

const SERVER_NAME: &str = "pulsewatch-agent";
const GZIP_MIN_BODY_LEN: usize = 256;
const OPTIONS_MAX_AGE_SECONDS: u64 = 14 * 24 * 60 * 60;

/// A static file too large to buffer whole; `render` emits only the headers
/// (with `Content-Length` set from `len`), and the caller streams the body
/// straight from disk in bounded reads (see `static_files::STATIC_CHUNK_SIZE`,
/// `Connection::queue_static_file`).
#[derive(Debug, Clone)]
pub struct StaticFileBody {
    pub path: PathBuf,
    pub len: u64,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub is_options_preflight: bool,
    pub static_file: Option<StaticFileBody>,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Response {
            status,
            headers: Vec::new(),
            body: Vec::new(),
            is_options_preflight: false,
            static_file: None,
        }
    }

    /// Headers only; the body streams straight from `file.path` in bounded
    /// chunks rather than living in `self.body`.
    pub fn static_file(content_type: impl Into<String>, file: StaticFileBody) -> Self {
        let mut r = Response::new(200);
        r.headers.push(("Content-Type".into(), content_type.into()));
        r.static_file = Some(file);
        r
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, content_type: impl Into<String>, body: Vec<u8>) -> Self {
        self.body = body;
        self.headers.push(("Content-Type".into(), content_type.into()));
        self
    }

    pub fn not_modified() -> Self {
        Response::new(304)
    }

    pub fn options_preflight() -> Self {
        let mut r = Response::new(204);
        r.is_options_preflight = true;
        r
    }

    pub fn json(status: u16, body: Vec<u8>) -> Self {
        Response::new(status).with_body("application/json", body)
    }

    pub fn plain_text(status: u16, text: impl Into<String>) -> Self {
        Response::new(status).with_body("text/plain; charset=utf-8", text.into().into_bytes())
    }

    /// Serialize into wire bytes, deciding between `Content-Length` and
    /// gzip+chunked framing. Exactly one of the two is ever emitted.
    pub fn render(mut self, ctx: &ResponseContext) -> Vec<u8> {
        self.headers.push(("Server".into(), SERVER_NAME.into()));
        self.headers.push(("Date".into(), httpdate_now()));
        self.headers
            .push(("X-Transaction-ID".into(), ctx.transaction_id.clone()));
        self.headers.push((
            "Access-Control-Allow-Origin".into(),
            ctx.origin.clone().unwrap_or_else(|| "*".into()),
        ));
        self.headers
            .push(("Access-Control-Allow-Credentials".into(), "true".into()));
        self.headers.push((
            "Connection".into(),
            if ctx.keep_alive { "keep-alive" } else { "close" }.into(),
        ));

        if self.is_options_preflight {
            self.headers
                .push(("Access-Control-Allow-Methods".into(), "GET, POST, PUT, DELETE, OPTIONS".into()));
            self.headers
                .push(("Access-Control-Allow-Headers".into(), "Content-Type, Authorization".into()));
            self.headers
                .push(("Access-Control-Max-Age".into(), OPTIONS_MAX_AGE_SECONDS.to_string()));
        }

        if self.status == 304 {
            self.headers.push(("Content-Length".into(), "0".into()));
            return self.serialize_status_and_headers(&[]);
        }

        if let Some(file) = &self.static_file {
            self.headers.push(("Content-Length".into(), file.len.to_string()));
            return self.serialize_status_and_headers(&[]);
        }

        let use_gzip = ctx.accepts_gzip && self.body.len() >= GZIP_MIN_BODY_LEN;
        if use_gzip {
            self.headers.push(("Content-Encoding".into(), "gzip".into()));
            self.headers.push(("Transfer-Encoding".into(), "chunked".into()));
            let mut writer = compression::ChunkedGzipWriter::new();
            let mut chunked = writer.write(&self.body).unwrap_or_default();
            chunked.extend(writer.finish().unwrap_or_default());
            let mut out = self.serialize_status_and_headers(&[]);
            out.extend_from_slice(&chunked);
            out
        } else {
            self.headers.push(("Content-Length".into(), self.body.len().to_string()));
            self.serialize_status_and_headers(&self.body.clone())
        }
    }

    fn serialize_status_and_headers(&self, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + body.len());
        out.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", self.status, reason_phrase(self.status)).as_bytes());
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(body);
        out
    }
}

pub struct ResponseContext {
    pub transaction_id: String,
    pub origin: Option<String>,
    pub keep_alive: bool,
    pub accepts_gzip: bool,
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        204 => "No Content",
        304 => "Not Modified",
        399 => "HTTPS Upgrade Required",
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        451 => "Unavailable For Legal Reasons",
        499 => "Client Closed Request",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

/// RFC 7231 `Date` header value.
fn httpdate_now() -> String {
    chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
