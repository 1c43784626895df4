//! TICKSERVE - embedded HTTP server for single-threaded hosts
//!
//! Serves static files from a root directory and turns `GET /<name>?k=v`
//! requests into calls of explicitly registered operations, executed only
//! when the host calls [`HttpServer::pump`] from its own loop.

// Concurrency primitives (workers, dispatch queue)
pub mod core;

// HTTP server
pub mod server;

// Support
pub mod cli;
pub mod config;
pub mod error;
pub mod utils;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{ConversionError, InvokeError, ServerError};
pub use server::{Args, HttpServer, Param, Registry, json_serializer};
