//! Error types shared by the server, binder and host pump.
//!
//! Nothing here is fatal to the process: every variant ends up either in a
//! log line, a best-effort error response, or both.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Server construction and lifecycle errors.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("Server is already running on {0}")]
    AlreadyRunning(std::net::SocketAddr),
    #[error("Root directory not found or not a directory: {}", .0.display())]
    InvalidRoot(PathBuf),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A query value could not be decoded into the declared parameter type.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Parameter '{param}' expects {expected}, got {value:?}")]
pub struct ConversionError {
    pub param: String,
    pub expected: &'static str,
    pub value: String,
}

/// Failure while executing a queued invocation on the consumer side.
#[derive(Error, Debug)]
pub enum InvokeError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error("Missing required parameter '{0}'")]
    Missing(String),
    #[error("Unknown parameter '{0}'")]
    UnknownParam(String),
    #[error("Parameter '{name}' has unexpected shape: {source}")]
    Shape {
        name: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Operation '{op}' failed: {source:#}")]
    Failed {
        op: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Serializer failed: {0:#}")]
    Serialize(anyhow::Error),
}

/// Problems reading a request head off the wire.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Malformed request: {0}")]
    Malformed(#[from] httparse::Error),
    #[error("Request head exceeds {0} bytes")]
    TooLarge(usize),
    #[error("Connection closed before request was complete")]
    Incomplete,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Failure while streaming a response body.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Nothing was written yet; the exchange can still carry an error response
    #[error("Stream failed before response was committed: {0}")]
    NotCommitted(io::Error),
    /// Head (and maybe part of the body) already went out; the connection is dropped
    #[error("Stream aborted after {sent} body bytes: {source}")]
    Aborted {
        sent: u64,
        #[source]
        source: io::Error,
    },
}
