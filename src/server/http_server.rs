//! Listener loop, server lifecycle and the host pump.
//!
//! # Thread layout
//!
//! - `tickserve-listener` - blocks in `accept`, hands each connection to
//!   the worker pool, never processes a request itself
//! - `tickserve-worker-N` - read the request head, serve files, bind and
//!   enqueue API calls
//! - host thread - owns [`HttpServer`], calls [`HttpServer::pump`] once per
//!   tick; the only place registered operations run
//!
//! # Shutdown
//!
//! [`HttpServer::stop`] closes the dispatch queue (queued calls get `503`),
//! raises the stop flag and makes a loopback connection so the blocked
//! `accept` returns. The listener sees the flag, drops the socket and gives
//! workers a grace period before abandoning them.

use anyhow::anyhow;
use http::StatusCode;
use log::{debug, error, info, trace, warn};
use serde_json::Value;
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use super::registry::{Catalog, Handler, Registry};
use super::request::RequestHead;
use super::response::{Exchange, TEXT};
use super::router::{PendingInvocation, Router};
use super::static_files::StaticFiles;
use crate::config::ServerConfig;
use crate::core::dispatch_queue::DispatchQueue;
use crate::core::workers::Workers;
use crate::error::{InvokeError, RequestError, ServerError};
use crate::utils::net;

/// Turns an operation's return value into the response body.
pub type Serializer = Box<dyn Fn(&Value) -> anyhow::Result<String>>;

/// Compact JSON via `serde_json`
pub fn json_serializer() -> Serializer {
    Box::new(|value| Ok(serde_json::to_string(value)?))
}

const EMPTY_OBJECT: &str = "{}";
const WAKE_TIMEOUT: Duration = Duration::from_millis(250);
/// Largest ignored request body read off the socket before routing
const MAX_DISCARDED_BODY: u64 = 8 * 1024 * 1024;

/// Per-connection socket settings copied into every worker job
#[derive(Debug, Clone, Copy)]
struct ConnSettings {
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    max_head_bytes: usize,
}

struct Running {
    addr: SocketAddr,
    stop: Arc<AtomicBool>,
    listener: thread::JoinHandle<()>,
}

/// Embedded HTTP server serving files and queued RPC calls.
///
/// `T` is the host's method-call target; it is handed to every operation by
/// [`HttpServer::pump`].
///
/// # Example
/// ```ignore
/// let mut server = HttpServer::new(config, registry)?.with_serializer(json_serializer());
/// server.start()?;
/// loop {
///     server.pump(&mut game);
///     // ... rest of the frame
/// }
/// ```
pub struct HttpServer<T> {
    config: ServerConfig,
    catalog: Arc<Catalog>,
    handlers: Vec<Handler<T>>,
    queue: DispatchQueue<PendingInvocation>,
    serializer: Option<Serializer>,
    running: Option<Running>,
}

impl<T> HttpServer<T> {
    /// Build a stopped server. Validates the configuration.
    pub fn new(config: ServerConfig, registry: Registry<T>) -> Result<Self, ServerError> {
        config.validate()?;
        let (catalog, handlers) = registry.into_parts(config.case_sensitive_names);
        debug!("Registered operations: {:?}", catalog.names().collect::<Vec<_>>());

        Ok(Self {
            config,
            catalog: Arc::new(catalog),
            handlers,
            queue: DispatchQueue::new(),
            serializer: None,
            running: None,
        })
    }

    /// Build and start in one go.
    pub fn bind(config: ServerConfig, registry: Registry<T>) -> Result<Self, ServerError> {
        let mut server = Self::new(config, registry)?;
        server.start()?;
        Ok(server)
    }

    /// Install the serializer for operation results.
    ///
    /// Without one, every successful call is answered with `{}`.
    pub fn with_serializer(mut self, serializer: Serializer) -> Self {
        self.serializer = Some(serializer);
        self
    }

    pub fn set_serializer(&mut self, serializer: Option<Serializer>) {
        self.serializer = serializer;
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    /// Invocations waiting for the next pump
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// `http://<lan-ip>:<port>/<page>` for sharing with other devices
    pub fn url(&self, page: &str) -> Option<String> {
        let addr = self.local_addr()?;
        Some(format!(
            "http://{}:{}/{}",
            net::local_ipv4(),
            addr.port(),
            page.trim_start_matches('/')
        ))
    }

    /// Open the listening socket and spawn listener + workers.
    pub fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if let Some(running) = &self.running {
            return Err(ServerError::AlreadyRunning(running.addr));
        }
        if self.queue.is_closed() {
            // Restart after stop: old queue stays closed, start clean
            self.queue = DispatchQueue::new();
        }

        let bind_to = format!("{}:{}", self.config.bind_addr, self.config.port);
        let listener = TcpListener::bind(&bind_to)
            .map_err(|source| ServerError::Bind { addr: bind_to.clone(), source })?;
        let addr = listener.local_addr()?;

        let files = StaticFiles::new(
            &self.config.root_dir,
            self.config.index_files.clone(),
            self.config.buffer_bytes(),
        )?;
        let router = Arc::new(Router::new(Arc::clone(&self.catalog), files, self.queue.sender()));
        let workers = Workers::new(self.config.worker_threads)?;
        let settings = ConnSettings {
            read_timeout: self.config.read_timeout(),
            write_timeout: self.config.write_timeout(),
            max_head_bytes: self.config.max_head_bytes,
        };
        let stop = Arc::new(AtomicBool::new(false));
        let grace = self.config.shutdown_grace();

        let handle = {
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("tickserve-listener".to_string())
                .spawn(move || listen(listener, workers, router, stop, settings, grace))?
        };

        info!(
            "HTTP server listening on http://{} (root: {})",
            addr,
            self.config.root_dir.display()
        );
        self.running = Some(Running { addr, stop, listener: handle });
        Ok(addr)
    }

    /// Stop listening and abandon queued work. Idempotent.
    pub fn stop(&mut self) {
        discard(self.queue.close());

        let Some(running) = self.running.take() else {
            return;
        };
        running.stop.store(true, Ordering::Release);
        wake(running.addr);

        let deadline = Instant::now() + self.config.shutdown_grace() + WAKE_TIMEOUT;
        while !running.listener.is_finished() {
            if Instant::now() >= deadline {
                warn!("Listener on {} did not stop in time, abandoning it", running.addr);
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        if running.listener.is_finished() {
            let _ = running.listener.join();
        }

        // Calls that raced the first close
        discard(self.queue.close());
        info!("HTTP server on {} stopped", running.addr);
    }

    /// Drain the dispatch queue and run every call in it.
    ///
    /// Call once per host tick. Returns how many invocations were handled.
    /// A failing call is answered with `500` and does not affect the rest of
    /// the batch.
    pub fn pump(&mut self, target: &mut T) -> usize {
        let batch = self.queue.drain();
        let count = batch.len();
        for pending in batch {
            self.execute(target, pending);
        }
        count
    }

    fn execute(&mut self, target: &mut T, mut pending: PendingInvocation) {
        if let Some(limit) = self.config.invocation_timeout() {
            let waited = pending.enqueued_at.elapsed();
            if waited > limit {
                warn!("Call to '{}' waited {:?} in queue, answering 504", pending.op_name, waited);
                pending.exchange.send_error(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout");
                return;
            }
        }

        match self.invoke(target, &pending) {
            Ok(body) => pending.exchange.send_json(StatusCode::OK, &body),
            Err(e) => {
                error!("API Method Invocation Error: {}", e);
                let message = match &e {
                    InvokeError::Failed { .. } | InvokeError::Serialize(_) => {
                        "Internal Server Error".to_string()
                    }
                    detail => detail.to_string(),
                };
                pending.exchange.send_error(StatusCode::INTERNAL_SERVER_ERROR, &message);
            }
        }
    }

    fn invoke(&mut self, target: &mut T, pending: &PendingInvocation) -> Result<String, InvokeError> {
        let op = &pending.op_name;
        if let Some(e) = pending.args.first_invalid() {
            return Err(e.clone().into());
        }
        let handler = self.handlers.get_mut(pending.op_id).ok_or_else(|| InvokeError::Failed {
            op: op.clone(),
            source: anyhow!("no handler registered"),
        })?;

        trace!("Invoking '{}' with {:?}", op, pending.args);
        let result = catch_unwind(AssertUnwindSafe(|| handler(target, &pending.args)))
            .unwrap_or_else(|_| Err(anyhow!("operation panicked")))
            .map_err(|source| match source.downcast::<InvokeError>() {
                Ok(invoke_error) => invoke_error,
                Err(source) => InvokeError::Failed { op: op.clone(), source },
            })?;

        match (result, &self.serializer) {
            (None | Some(Value::Null), _) | (_, None) => Ok(EMPTY_OBJECT.to_string()),
            (Some(value), Some(serialize)) => serialize(&value).map_err(InvokeError::Serialize),
        }
    }
}

impl<T> Drop for HttpServer<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Answer invocations that will never run
fn discard(leftover: Vec<PendingInvocation>) {
    for mut pending in leftover {
        debug!("Dropping queued call to '{}'", pending.op_name);
        pending.exchange.send_error(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable");
    }
}

/// Poke the listener so a blocked `accept` returns
fn wake(addr: SocketAddr) {
    let target = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port()),
        _ => addr,
    };
    if let Err(e) = TcpStream::connect_timeout(&target, WAKE_TIMEOUT) {
        debug!("Wake-up connection to {} failed: {}", target, e);
    }
}

fn listen(
    listener: TcpListener,
    mut workers: Workers,
    router: Arc<Router>,
    stop: Arc<AtomicBool>,
    settings: ConnSettings,
    grace: Duration,
) {
    trace!("Listener loop started");
    for incoming in listener.incoming() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        match incoming {
            Ok(stream) => {
                let router = Arc::clone(&router);
                workers.execute(move || handle_connection(stream, &router, settings));
            }
            Err(e) => {
                // Transient (reset before accept, fd exhaustion): keep serving
                error!("Listener loop error: {}", e);
                thread::sleep(Duration::from_millis(10));
            }
        }
    }
    drop(listener);
    workers.shutdown(grace);
    trace!("Listener loop finished");
}

fn handle_connection(stream: TcpStream, router: &Router, settings: ConnSettings) {
    let peer = stream.peer_addr().ok();
    if let Err(e) = stream
        .set_read_timeout(settings.read_timeout)
        .and_then(|_| stream.set_write_timeout(settings.write_timeout))
    {
        warn!("Could not set socket deadlines for {:?}: {}", peer, e);
    }

    let mut exchange = Exchange::new(stream, peer);
    let head = match exchange.stream_mut() {
        Some(socket) => RequestHead::read_from(socket, settings.max_head_bytes),
        None => return,
    };

    match head {
        Ok(head) => {
            if let Some(socket) = exchange.stream_mut() {
                discard_body(socket, &head, peer);
            }
            router.dispatch(&head, exchange)
        }
        Err(RequestError::TooLarge(limit)) => {
            warn!("Request head from {:?} exceeds {} bytes", peer, limit);
            exchange.send(
                StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
                TEXT,
                b"Request Header Fields Too Large",
            );
        }
        Err(RequestError::Malformed(e)) => {
            warn!("Malformed request from {:?}: {}", peer, e);
            exchange.send(StatusCode::BAD_REQUEST, TEXT, b"Bad Request");
        }
        Err(RequestError::Incomplete) => trace!("{:?} closed before sending a request", peer),
        Err(RequestError::Io(e)) => debug!("Reading request from {:?} failed: {}", peer, e),
    }
}

/// Read and drop a request body. Routing never looks at it, but unread
/// input would turn the eventual close into a reset.
fn discard_body(socket: &mut TcpStream, head: &RequestHead, peer: Option<SocketAddr>) {
    let unread = head.unread_body();
    if unread == 0 {
        return;
    }
    if unread > MAX_DISCARDED_BODY {
        debug!("Body of {} bytes from {:?} left unread", unread, peer);
        return;
    }
    match io::copy(&mut socket.by_ref().take(unread), &mut io::sink()) {
        Ok(n) => trace!("Discarded {} body bytes from {:?}", n, peer),
        Err(e) => debug!("Discarding body from {:?} failed: {}", peer, e),
    }
}
