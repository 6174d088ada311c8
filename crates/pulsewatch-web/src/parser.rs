//! Incremental HTTP/1.1 request parser.
//!
//! Mirrors the saved-offset streaming-decoder shape used elsewhere in this
//! codebase for length-prefixed frames: state advances as bytes arrive, and
//! a partial read never re-parses bytes already consumed.

use std::collections::HashMap;

use crate::error::HttpError;

/// Fruitless read attempts (zero bytes with no progress) tolerated before a
/// connection is dropped as a slow client.
pub const MAX_HEADER_FETCH_TRIES: u32 = 20;

/// Header block larger than this without a terminating blank line is
/// rejected rather than buffered forever.
const MAX_HEADER_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Options,
    /// Internal agent-to-agent replication method.
    Stream,
}

impl Method {
    fn parse(s: &str) -> Option<Method> {
        match s {
            "GET" => Some(Method::Get),
            "POST" => Some(Method::Post),
            "PUT" => Some(Method::Put),
            "DELETE" => Some(Method::Delete),
            "OPTIONS" => Some(Method::Options),
            "STREAM" => Some(Method::Stream),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    pub fn accepts_gzip(&self) -> bool {
        self.header("accept-encoding").is_some_and(|v| v.contains("gzip"))
    }

    pub fn wants_sse(&self) -> bool {
        self.header("accept").is_some_and(|v| v.contains("text/event-stream"))
            || self.query.split('&').any(|kv| kv == "transport=sse")
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.header("authorization").and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// Outcome of feeding one chunk of bytes to the parser.
pub enum ParseOutcome {
    Incomplete,
    Complete(Request),
    TooManyReadRetries,
    MalformedUrl,
    NotSupported,
    HttpsUpgradeRequired { host: String },
}

struct Head {
    method: Method,
    path: String,
    query: String,
    headers: HashMap<String, String>,
    content_length: usize,
}

enum State {
    Headers,
    Body { head: Head },
}

pub struct RequestParser {
    buf: Vec<u8>,
    state: State,
    empty_reads: u32,
    force_tls_for_stream: bool,
}

impl RequestParser {
    pub fn new(force_tls_for_stream: bool) -> Self {
        RequestParser {
            buf: Vec::with_capacity(4096),
            state: State::Headers,
            empty_reads: 0,
            force_tls_for_stream,
        }
    }

    /// Reset to await the next request on a keep-alive connection, keeping
    /// any bytes already buffered past the previous request's boundary.
    pub fn reset_for_next_request(&mut self) {
        self.state = State::Headers;
        self.empty_reads = 0;
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Result<ParseOutcome, HttpError> {
        if chunk.is_empty() {
            self.empty_reads += 1;
            if self.empty_reads > MAX_HEADER_FETCH_TRIES {
                return Ok(ParseOutcome::TooManyReadRetries);
            }
            return Ok(ParseOutcome::Incomplete);
        }
        self.empty_reads = 0;
        self.buf.extend_from_slice(chunk);

        loop {
            match &self.state {
                State::Headers => match self.try_parse_headers()? {
                    HeaderStep::NeedMoreData => return Ok(ParseOutcome::Incomplete),
                    HeaderStep::Resolved(outcome) => return Ok(outcome),
                    HeaderStep::BodyPending => continue,
                },
                State::Body { .. } => {
                    let State::Body { head } = std::mem::replace(&mut self.state, State::Headers) else {
                        unreachable!()
                    };
                    if self.buf.len() < head.content_length {
                        self.state = State::Body { head };
                        return Ok(ParseOutcome::Incomplete);
                    }
                    let body: Vec<u8> = self.buf.drain(..head.content_length).collect();
                    return Ok(ParseOutcome::Complete(Request {
                        method: head.method,
                        path: head.path,
                        query: head.query,
                        headers: head.headers,
                        body,
                    }));
                }
            }
        }
    }

    fn try_parse_headers(&mut self) -> Result<HeaderStep, HttpError> {
        let Some(boundary) = find_subslice(&self.buf, b"\r\n\r\n") else {
            if self.buf.len() > MAX_HEADER_BYTES {
                return Ok(HeaderStep::Resolved(ParseOutcome::MalformedUrl));
            }
            return Ok(HeaderStep::NeedMoreData);
        };

        let header_bytes: Vec<u8> = self.buf.drain(..boundary + 4).collect();
        let head_text = match std::str::from_utf8(&header_bytes[..boundary]) {
            Ok(s) => s,
            Err(_) => return Ok(HeaderStep::Resolved(ParseOutcome::MalformedUrl)),
        };

        let mut lines = head_text.split("\r\n");
        let Some(request_line) = lines.next() else {
            return Ok(HeaderStep::Resolved(ParseOutcome::MalformedUrl));
        };

        let mut parts = request_line.split(' ');
        let (Some(method_str), Some(target), Some(_version)) = (parts.next(), parts.next(), parts.next()) else {
            return Ok(HeaderStep::Resolved(ParseOutcome::MalformedUrl));
        };

        let Some(method) = Method::parse(method_str) else {
            return Ok(HeaderStep::Resolved(ParseOutcome::NotSupported));
        };

        let (path_raw, query_raw) = match target.split_once('?') {
            Some((p, q)) => (p, q),
            None => (target, ""),
        };

        let Some(path) = url_decode(path_raw) else {
            return Ok(HeaderStep::Resolved(ParseOutcome::MalformedUrl));
        };
        if !path.starts_with('/') || path.contains("..") || path.chars().any(|c| c.is_control()) {
            return Ok(HeaderStep::Resolved(ParseOutcome::MalformedUrl));
        }
        let Some(query) = url_decode(query_raw) else {
            return Ok(HeaderStep::Resolved(ParseOutcome::MalformedUrl));
        };

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Ok(HeaderStep::Resolved(ParseOutcome::MalformedUrl));
            };
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        if method == Method::Stream && self.force_tls_for_stream {
            let host = headers.get("host").cloned().unwrap_or_default();
            return Ok(HeaderStep::Resolved(ParseOutcome::HttpsUpgradeRequired { host }));
        }

        let content_length = headers
            .get("content-length")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(0);

        if content_length == 0 {
            return Ok(HeaderStep::Resolved(ParseOutcome::Complete(Request {
                method,
                path,
                query,
                headers,
                body: Vec::new(),
            })));
        }

        self.state = State::Body {
            head: Head {
                method,
                path,
                query,
                headers,
                content_length,
            },
        };
        Ok(HeaderStep::BodyPending)
    }
}

enum HeaderStep {
    NeedMoreData,
    BodyPending,
    Resolved(ParseOutcome),
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Percent-decode a URL component. Returns `None` on a malformed escape.
fn url_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes.get(i + 1..i + 3)?;
                let hex_str = std::str::from_utf8(hex).ok()?;
                let byte = u8::from_str_radix(hex_str, 16).ok()?;
                out.push(byte);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let mut parser = RequestParser::new(false);
        let raw = b"GET /api/v1/info HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let outcome = parser.feed(raw).unwrap();
        match outcome {
            ParseOutcome::Complete(req) => {
                assert_eq!(req.method, Method::Get);
                assert_eq!(req.path, "/api/v1/info");
                assert_eq!(req.header("host"), Some("localhost"));
            }
            _ => panic!("expected Complete"),
        }
    }

    #[test]
    fn handles_partial_header_read() {
        let mut parser = RequestParser::new(false);
        assert!(matches!(parser.feed(b"GET /x HTTP/1.1\r\n").unwrap(), ParseOutcome::Incomplete));
        let outcome = parser.feed(b"Host: a\r\n\r\n").unwrap();
        assert!(matches!(outcome, ParseOutcome::Complete(_)));
    }

    #[test]
    fn waits_for_full_body() {
        let mut parser = RequestParser::new(false);
        let head = b"POST /mcp HTTP/1.1\r\nContent-Length: 5\r\n\r\n";
        assert!(matches!(parser.feed(head).unwrap(), ParseOutcome::Incomplete));
        let outcome = parser.feed(b"hello").unwrap();
        match outcome {
            ParseOutcome::Complete(req) => assert_eq!(req.body, b"hello"),
            _ => panic!("expected Complete"),
        }
    }

    #[test]
    fn rejects_dotdot_path() {
        let mut parser = RequestParser::new(false);
        let outcome = parser.feed(b"GET /../etc/passwd HTTP/1.1\r\n\r\n").unwrap();
        assert!(matches!(outcome, ParseOutcome::MalformedUrl));
    }

    #[test]
    fn unsupported_method_is_flagged() {
        let mut parser = RequestParser::new(false);
        let outcome = parser.feed(b"PATCH /x HTTP/1.1\r\n\r\n").unwrap();
        assert!(matches!(outcome, ParseOutcome::NotSupported));
    }

    #[test]
    fn stream_requires_tls_when_forced() {
        let mut parser = RequestParser::new(true);
        let outcome = parser.feed(b"STREAM /x HTTP/1.1\r\nHost: peer.example\r\n\r\n").unwrap();
        match outcome {
            ParseOutcome::HttpsUpgradeRequired { host } => assert_eq!(host, "peer.example"),
            _ => panic!("expected HttpsUpgradeRequired"),
        }
    }

    #[test]
    fn too_many_empty_reads_is_reported() {
        let mut parser = RequestParser::new(false);
        for _ in 0..MAX_HEADER_FETCH_TRIES {
            assert!(matches!(parser.feed(&[]).unwrap(), ParseOutcome::Incomplete));
        }
        assert!(matches!(parser.feed(&[]).unwrap(), ParseOutcome::TooManyReadRetries));
    }

    #[test]
    fn query_string_is_decoded() {
        let mut parser = RequestParser::new(false);
        let outcome = parser.feed(b"GET /search?q=a%20b HTTP/1.1\r\n\r\n").unwrap();
        match outcome {
            ParseOutcome::Complete(req) => assert_eq!(req.query, "q=a b"),
            _ => panic!("expected Complete"),
        }
    }
}
