//! Response Writer and the per-connection [`Exchange`].
//!
//! An exchange owns the accepted socket until exactly one response has been
//! written. Writing takes the socket out, so a second attempt finds nothing
//! and is logged as a no-op instead of corrupting the stream.
//!
//! Every response carries `Content-Length`, `Connection: close` and a
//! permissive CORS header.

use http::StatusCode;
use log::{trace, warn};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use crate::error::StreamError;

pub const JSON: &str = "application/json";
pub const HTML: &str = "text/html";
pub const TEXT: &str = "text/plain; charset=utf-8";

/// Leftover input dropped when closing, at most
const LEFTOVER_MAX_BYTES: usize = 64 * 1024;

/// Outgoing side of an exchange.
pub trait Connection: Write {
    /// Runs once after a complete response was written. Must not block.
    fn finish(&mut self) {}
}

impl Connection for TcpStream {
    /// Half-close, then drop input that is already buffered. Closing a
    /// socket with unread input resets it and the client can lose the
    /// response.
    fn finish(&mut self) {
        if self.shutdown(Shutdown::Write).is_err() || self.set_nonblocking(true).is_err() {
            return;
        }
        let mut buf = [0u8; 8192];
        let mut dropped = 0;
        while dropped < LEFTOVER_MAX_BYTES {
            match self.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => dropped += n,
            }
        }
        if dropped > 0 {
            trace!("Dropped {} leftover request bytes", dropped);
        }
    }
}

/// One accepted connection and its not-yet-sent response.
///
/// Owned by exactly one thread at a time: the worker that accepted it, or
/// the host pump after it was queued.
pub struct Exchange<S: Connection = TcpStream> {
    stream: Option<S>,
    peer: Option<SocketAddr>,
}

impl<S: Connection> std::fmt::Debug for Exchange<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exchange")
            .field("peer", &self.peer)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

impl<S: Connection> Exchange<S> {
    pub fn new(stream: S, peer: Option<SocketAddr>) -> Self {
        Self { stream: Some(stream), peer }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Still waiting for its response
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Mutable access to the socket before anything was written (request reads)
    pub fn stream_mut(&mut self) -> Option<&mut S> {
        self.stream.as_mut()
    }

    /// Write a complete response and close the connection.
    ///
    /// Calling this on an exchange that already answered logs and does nothing.
    pub fn send(&mut self, status: StatusCode, content_type: &str, body: &[u8]) {
        let Some(mut stream) = self.stream.take() else {
            warn!("Response {} for {:?} dropped: exchange already answered", status.as_u16(), self.peer);
            return;
        };
        let result = write_head(&mut stream, status, content_type, body.len() as u64)
            .and_then(|_| stream.write_all(body))
            .and_then(|_| stream.flush());
        match result {
            Ok(()) => {
                trace!("Sent {} ({} bytes) to {:?}", status.as_u16(), body.len(), self.peer);
                stream.finish();
            }
            Err(e) => warn!("Error sending response to {:?}: {}", self.peer, e),
        }
    }

    pub fn send_json(&mut self, status: StatusCode, json: &str) {
        self.send(status, JSON, json.as_bytes());
    }

    /// JSON `{"error": message}` body
    pub fn send_error(&mut self, status: StatusCode, message: &str) {
        let body = serde_json::json!({ "error": message }).to_string();
        self.send_json(status, &body);
    }

    /// Stream `len` bytes from `reader` in chunks of `buffer_size`.
    ///
    /// The first chunk is read before the head is written, so a reader that
    /// fails immediately yields [`StreamError::NotCommitted`] and the
    /// exchange stays open for an error response. Any later failure can only
    /// abort the connection: the client has already seen `200` and a length.
    pub fn stream<R: Read>(
        &mut self,
        status: StatusCode,
        content_type: &str,
        len: u64,
        mut reader: R,
        buffer_size: usize,
    ) -> Result<u64, StreamError> {
        let mut buf = vec![0u8; buffer_size.max(1)];
        let first = reader.read(&mut buf).map_err(StreamError::NotCommitted)?;

        let Some(mut stream) = self.stream.take() else {
            warn!("Stream for {:?} dropped: exchange already answered", self.peer);
            return Ok(0);
        };

        let mut sent = 0u64;
        let result: io::Result<()> = (|| {
            write_head(&mut stream, status, content_type, len)?;
            let mut n = first;
            while n > 0 && sent < len {
                let take = n.min((len - sent) as usize);
                stream.write_all(&buf[..take])?;
                sent += take as u64;
                n = reader.read(&mut buf)?;
            }
            if sent < len {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "file shrank while streaming"));
            }
            stream.flush()
        })();

        match result {
            Ok(()) => {
                trace!("Streamed {} bytes to {:?}", sent, self.peer);
                stream.finish();
                Ok(sent)
            }
            Err(source) => Err(StreamError::Aborted { sent, source }),
        }
    }
}

impl<S: Connection> Drop for Exchange<S> {
    fn drop(&mut self) {
        if self.stream.is_some() {
            trace!("Closing unanswered connection from {:?}", self.peer);
        }
    }
}

fn write_head<W: Write>(out: &mut W, status: StatusCode, content_type: &str, len: u64) -> io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\nAccess-Control-Allow-Origin: *\r\n\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        content_type,
        len
    );
    out.write_all(head.as_bytes())
}
