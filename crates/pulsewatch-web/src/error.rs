//! Error taxonomy for the HTTP and MCP layers (spec.md §7).

use thiserror::Error;

/// Errors surfaced by the HTTP pipeline. Each variant maps to exactly one
/// HTTP status code via [`HttpError::status_code`].
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("malformed request: {0}")]
    Malformed(String),

    #[error("access denied")]
    AccessDenied,

    #[error("You need to be authorized to access this resource")]
    AclForbidden,

    #[error("not found")]
    NotFound,

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("transient resource exhaustion")]
    Transient,

    #[error("request timed out")]
    Timeout,

    #[error("client closed request")]
    ClientClosed,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("https upgrade required")]
    HttpsUpgradeRequired,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HttpError {
    pub fn status_code(&self) -> u16 {
        match self {
            HttpError::Malformed(_) => 400,
            HttpError::AccessDenied => 403,
            HttpError::AclForbidden => 451,
            HttpError::NotFound => 404,
            HttpError::InvalidArguments(_) => 400,
            HttpError::Transient => 503,
            HttpError::Timeout => 504,
            HttpError::ClientClosed => 499,
            HttpError::Internal(_) => 500,
            HttpError::HttpsUpgradeRequired => 399,
            HttpError::Io(_) => 500,
        }
    }

    pub fn reason_phrase(&self) -> &'static str {
        match self.status_code() {
            400 => "Bad Request",
            403 => "Forbidden",
            404 => "Not Found",
            451 => "Unavailable For Legal Reasons",
            499 => "Client Closed Request",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            399 => "HTTPS Upgrade Required",
            _ => "Internal Server Error",
        }
    }
}

/// Errors surfaced by the MCP JSON-RPC dispatcher, mapped per spec.md §4.E
/// "MCP JSON-RPC adapter".
#[derive(Debug, Error)]
pub enum McpError {
    #[error("parse error: {0}")]
    ParseError(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("method not found: {0}")]
    NotFound(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("response too large for transport")]
    ResponseTooLarge,

    #[error("streaming responses not supported on this transport")]
    StreamingNotSupported,
}

impl McpError {
    pub fn json_rpc_code(&self) -> i32 {
        match self {
            McpError::ParseError(_) => -32700,
            McpError::BadRequest(_) => -32600,
            McpError::NotFound(_) | McpError::NotImplemented(_) => -32601,
            McpError::InvalidParams(_) => -32602,
            McpError::InternalError(_) => -32603,
            McpError::ResponseTooLarge => -32001,
            McpError::StreamingNotSupported => -32002,
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }
}

pub type HttpResult<T> = std::result::Result<T, HttpError>;
pub type McpResult<T> = std::result::Result<T, McpError>;
