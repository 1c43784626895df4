//! Static File Server: maps URL paths to files under one root directory.
//!
//! Files are streamed through [`Exchange::stream`] with a content type from
//! [`mime::for_path`]. Misses are a minimal HTML 404.

use http::StatusCode;
use log::{debug, error};
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use super::response::{Connection, Exchange, HTML};
use crate::error::StreamError;
use crate::utils::mime;

pub const NOT_FOUND_BODY: &str = "<h1>404 - Not Found</h1>";
const SERVE_ERROR: &str = "Could not serve file";

/// Static File Server rooted at one directory.
///
/// Only regular files whose canonical path stays under the canonical root
/// are served; `..` segments, absolute paths and symlinks leading outside
/// the root all resolve to "not found".
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    index_files: Vec<String>,
    buffer_size: usize,
}

impl StaticFiles {
    pub fn new(root: &Path, index_files: Vec<String>, buffer_size: usize) -> io::Result<Self> {
        Ok(Self {
            root: root.canonicalize()?,
            index_files,
            buffer_size,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a decoded, slash-stripped URL path to a file under the root.
    ///
    /// An empty path picks the first existing index file.
    pub fn resolve(&self, rel: &str) -> Option<PathBuf> {
        if rel.is_empty() {
            return self
                .index_files
                .iter()
                .find_map(|name| self.contain(&self.root.join(name)));
        }

        let mut candidate = self.root.clone();
        for comp in Path::new(rel).components() {
            match comp {
                Component::Normal(s) => candidate.push(s),
                Component::CurDir => {}
                _ => return None,
            }
        }
        self.contain(&candidate)
    }

    /// Canonicalize and keep only regular files inside the root
    fn contain(&self, path: &Path) -> Option<PathBuf> {
        let canonical = path.canonicalize().ok()?;
        (canonical.starts_with(&self.root) && canonical.is_file()).then_some(canonical)
    }

    /// Answer `exchange` with the file at `rel`, or 404.
    pub fn serve<S: Connection>(&self, rel: &str, exchange: &mut Exchange<S>) {
        let Some(path) = self.resolve(rel) else {
            debug!("404 for {:?}", rel);
            exchange.send(StatusCode::NOT_FOUND, HTML, NOT_FOUND_BODY.as_bytes());
            return;
        };

        let opened = File::open(&path).and_then(|f| Ok((f.metadata()?.len(), f)));
        let (len, file) = match opened {
            Ok(v) => v,
            Err(e) => {
                error!("File serving error for {}: {}", path.display(), e);
                exchange.send_error(StatusCode::INTERNAL_SERVER_ERROR, SERVE_ERROR);
                return;
            }
        };

        let content_type = mime::for_path(&path);
        debug!("Serving {} ({}, {} bytes)", path.display(), content_type, len);

        match exchange.stream(StatusCode::OK, content_type, len, file, self.buffer_size) {
            Ok(_) => {}
            Err(StreamError::NotCommitted(e)) => {
                error!("File serving error for {}: {}", path.display(), e);
                exchange.send_error(StatusCode::INTERNAL_SERVER_ERROR, SERVE_ERROR);
            }
            // Status and length already went out; the client sees a short body
            Err(e @ StreamError::Aborted { .. }) => {
                error!("File serving error for {}: {}", path.display(), e);
            }
        }
    }
}
