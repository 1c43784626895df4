//! Request head parsing (request line + headers) with `httparse`.
//!
//! Bodies are never read: every route is driven by path and query alone.

use httparse::{EMPTY_HEADER, Status};
use percent_encoding::percent_decode_str;
use std::io::Read;

use crate::error::RequestError;

const MAX_HEADERS: usize = 64;
const READ_CHUNK: usize = 1024;

/// Parsed request line of one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    /// Raw request target, e.g. `/Add?x=2&y=3`
    pub target: String,
    /// Minor HTTP version (0 or 1)
    pub version: u8,
    /// Declared `Content-Length`, if any
    pub content_length: Option<u64>,
    /// Body bytes that arrived together with the head
    pub body_buffered: usize,
}

impl RequestHead {
    /// Read and parse a request head, at most `max_bytes` long.
    pub fn read_from<R: Read>(stream: &mut R, max_bytes: usize) -> Result<Self, RequestError> {
        let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            let n = stream.read(&mut chunk)?;
            if n == 0 {
                return Err(RequestError::Incomplete);
            }
            buf.extend_from_slice(&chunk[..n]);

            if let Some(head) = Self::parse(&buf)? {
                return Ok(head);
            }
            if buf.len() >= max_bytes {
                return Err(RequestError::TooLarge(max_bytes));
            }
        }
    }

    /// Parse a complete head; `Ok(None)` if more bytes are needed.
    pub fn parse(bytes: &[u8]) -> Result<Option<Self>, RequestError> {
        let mut headers = [EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(bytes)? {
            Status::Partial => Ok(None),
            Status::Complete(head_len) => Ok(Some(Self {
                // All three are set once parsing completes
                method: req.method.unwrap_or("GET").to_string(),
                target: req.path.unwrap_or("/").to_string(),
                version: req.version.unwrap_or(1),
                content_length: content_length(req.headers),
                body_buffered: bytes.len() - head_len,
            })),
        }
    }

    /// Target with any `scheme://authority` prefix and `#fragment` removed
    fn origin_form(&self) -> &str {
        let mut target = self.target.as_str();
        if let Some(rest) = target.strip_prefix("http://").or_else(|| target.strip_prefix("https://")) {
            target = rest.find('/').map_or("/", |i| &rest[i..]);
        }
        target.split('#').next().unwrap_or(target)
    }

    /// Raw path, without query
    pub fn path(&self) -> &str {
        let target = self.origin_form();
        target.split_once('?').map_or(target, |(path, _)| path)
    }

    /// Raw query string without the leading `?`, empty when absent
    pub fn query(&self) -> &str {
        self.origin_form().split_once('?').map_or("", |(_, query)| query)
    }

    /// Body bytes still waiting on the socket
    pub fn unread_body(&self) -> u64 {
        self.content_length.unwrap_or(0).saturating_sub(self.body_buffered as u64)
    }

    /// Percent-decoded path
    pub fn decoded_path(&self) -> String {
        percent_decode_str(self.path()).decode_utf8_lossy().into_owned()
    }
}

fn content_length(headers: &[httparse::Header<'_>]) -> Option<u64> {
    let header = headers.iter().find(|h| h.name.eq_ignore_ascii_case("content-length"))?;
    std::str::from_utf8(header.value).ok()?.trim().parse().ok()
}
