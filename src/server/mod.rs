//! Embedded HTTP server: static files plus RPC calls run on the host loop.
//!
//! # Purpose
//!
//! Lets a browser (or any HTTP client) fetch files from a root directory
//! and call named operations of a single-threaded host application, e.g. a
//! game or tool with its own main loop.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐     DispatchQueue      ┌──────────────────────┐
//! │  Listener + Workers      │  ── PendingInvocation ▶ │   Host Thread        │
//! │  (std::net, httparse)    │                        │   (its own loop)     │
//! │                          │                        │                      │
//! │  GET /Add?x=2&y=3        │  ──▶ Add(x=2, y=3) ──▶  │  server.pump(&mut t) │
//! │  GET /index.html         │  streams file itself   │  writes 200 / 500    │
//! └──────────────────────────┘                        └──────────────────────┘
//! ```
//!
//! - **Listener** - one thread blocked in `accept`, hands sockets to workers
//! - **Workers** - parse the request, route it, serve files or enqueue calls
//! - **DispatchQueue** - unbounded FIFO, drained completely once per pump
//! - **pump** - the only place a registered operation ever runs
//!
//! # Routes
//!
//! | Request                 | Result                                        |
//! |-------------------------|-----------------------------------------------|
//! | `GET /<op>?k=v&...`     | queued call, `200` JSON or `500` JSON error   |
//! | `GET /<path>`           | file under root, `404` HTML if missing        |
//! | `GET /`                 | first existing index file                     |

mod binder;
mod http_server;
mod registry;
mod request;
mod response;
mod router;
mod static_files;

pub use binder::{Args, Bound, parse_query};
pub use http_server::{HttpServer, Serializer, json_serializer};
pub use registry::{Catalog, DecodeFn, Handler, OpSchema, Param, Registry};
pub use request::RequestHead;
pub use response::{Connection, Exchange};
pub use router::{PendingInvocation, Route, classify};
pub use static_files::{NOT_FOUND_BODY, StaticFiles};
