//! Non-blocking HTTP/MCP/SSE pipeline that sits in front of an
//! agent-resident [`pulsewatch_engine`] metric registry.

pub mod access_log;
pub mod acl;
pub mod bufpool;
pub mod compression;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod mcp;
pub mod parser;
pub mod response;
pub mod server;
pub mod static_files;

pub use dispatch::Dispatcher;
pub use error::{HttpError, McpError};
pub use server::{spawn, ServerConfig, ServerHandle};
