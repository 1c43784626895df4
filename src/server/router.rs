//! Request Router: file request or API call.
//!
//! The first path segment is looked up in the operation catalog. A hit is
//! an API call, even if a file of the same name exists. Anything else is a
//! path relative to the static root.

use http::StatusCode;
use log::{debug, warn};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Instant;

use super::binder::{Args, parse_query};
use super::registry::{Catalog, OpSchema};
use super::request::RequestHead;
use super::response::Exchange;
use super::static_files::StaticFiles;
use crate::core::dispatch_queue::QueueSender;

/// Where a request goes
#[derive(Debug, Clone, Copy)]
pub enum Route<'c, 'p> {
    /// Registered operation named by the first path segment
    Api(&'c OpSchema),
    /// Relative file path; empty means "index file"
    File(&'p str),
}

/// Classify a decoded path (leading `/` included).
pub fn classify<'c, 'p>(catalog: &'c Catalog, decoded_path: &'p str) -> Route<'c, 'p> {
    let rel = decoded_path.strip_prefix('/').unwrap_or(decoded_path);
    let segment = rel.split('/').next().unwrap_or("");
    match catalog.lookup(segment) {
        Some(op) => Route::Api(op),
        None => Route::File(rel),
    }
}

/// A resolved API call waiting for the host pump.
///
/// Carries the exchange: after enqueue the producing worker no longer
/// has it.
#[derive(Debug)]
pub struct PendingInvocation {
    pub exchange: Exchange,
    pub op_id: usize,
    pub op_name: String,
    pub args: Args,
    pub enqueued_at: Instant,
}

/// Per-request dispatch shared by all connection workers.
pub struct Router {
    catalog: Arc<Catalog>,
    files: StaticFiles,
    queue: QueueSender<PendingInvocation>,
}

impl Router {
    pub fn new(catalog: Arc<Catalog>, files: StaticFiles, queue: QueueSender<PendingInvocation>) -> Self {
        Self { catalog, files, queue }
    }

    /// Serve a file or enqueue an invocation. Never waits for the host.
    pub fn dispatch(&self, head: &RequestHead, mut exchange: Exchange<TcpStream>) {
        let path = head.decoded_path();
        match classify(&self.catalog, &path) {
            Route::Api(op) => {
                debug!("{} {} -> API {}", head.method, head.target, op.name);
                self.enqueue(op, head.query(), exchange);
            }
            Route::File(rel) => {
                debug!("{} {} -> file {:?}", head.method, head.target, rel);
                self.files.serve(rel, &mut exchange);
            }
        }
    }

    fn enqueue(&self, op: &OpSchema, query: &str, exchange: Exchange) {
        let pending = PendingInvocation {
            exchange,
            op_id: op.id,
            op_name: op.name.clone(),
            args: Args::bind(op, &parse_query(query)),
            enqueued_at: Instant::now(),
        };
        if let Err(mut rejected) = self.queue.push(pending) {
            warn!("Server stopping, refusing call to '{}'", rejected.op_name);
            rejected.exchange.send_error(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable");
        }
    }
}
