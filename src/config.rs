//! Server configuration: JSON file, environment and CLI overrides.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ServerError;

/// Environment variable overriding the served root directory
pub const ENV_ROOT: &str = "TICKSERVE_ROOT";
/// Environment variable overriding the listen port
pub const ENV_PORT: &str = "TICKSERVE_PORT";

/// Server construction options.
///
/// Loaded from JSON (all fields optional), then overridden by environment
/// and CLI, see [`ServerConfig::apply_overrides`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory whose files are served; nothing outside it is reachable
    pub root_dir: PathBuf,
    /// Interface to bind (default: all interfaces)
    pub bind_addr: String,
    /// Listen port; 0 picks an ephemeral port
    pub port: u16,
    /// File streaming buffer in kilobytes
    pub buffer_kb: usize,
    /// Tried in order when the request path is empty
    pub index_files: Vec<String>,
    /// Whether `/add` matches an operation registered as `Add`
    pub case_sensitive_names: bool,
    /// Connection worker threads.
    ///
    /// A worker stays busy while it waits for a request head, so this many
    /// idle connections (e.g. browser preconnects) can hold up file serving
    /// and enqueueing for up to `read_timeout_ms`.
    pub worker_threads: usize,
    /// Socket read deadline, 0 disables
    pub read_timeout_ms: u64,
    /// Socket write deadline, 0 disables
    pub write_timeout_ms: u64,
    /// Upper bound for request line + headers
    pub max_head_bytes: usize,
    /// Queued invocations older than this are answered 504 instead of run, 0 disables
    pub invocation_timeout_ms: u64,
    /// How long stop() waits for the listener and workers
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("."),
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
            buffer_kb: 16,
            index_files: vec!["index.html".to_string(), "index.htm".to_string()],
            case_sensitive_names: true,
            worker_threads: num_cpus::get().max(1),
            read_timeout_ms: 10_000,
            write_timeout_ms: 10_000,
            max_head_bytes: 8 * 1024,
            invocation_timeout_ms: 30_000,
            shutdown_grace_ms: 500,
        }
    }
}

impl ServerConfig {
    /// Defaults with the given root and port
    pub fn new(root_dir: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            root_dir: root_dir.into(),
            port,
            ..Self::default()
        }
    }

    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Apply overrides.
    ///
    /// Priority: CLI args → ENV vars (TICKSERVE_ROOT, TICKSERVE_PORT) → current value
    pub fn apply_overrides(mut self, cli_root: Option<PathBuf>, cli_port: Option<u16>) -> Self {
        let env_root = std::env::var(ENV_ROOT).ok().map(PathBuf::from);
        if let Some(root) = cli_root.or(env_root) {
            self.root_dir = root;
        }

        let env_port = std::env::var(ENV_PORT).ok().and_then(|p| match p.parse::<u16>() {
            Ok(port) => Some(port),
            Err(_) => {
                log::warn!("Ignoring {}={:?}: not a port number", ENV_PORT, p);
                None
            }
        });
        if let Some(port) = cli_port.or(env_port) {
            self.port = port;
        }
        self
    }

    /// Check invariants the server relies on.
    pub fn validate(&self) -> Result<(), ServerError> {
        if !self.root_dir.is_dir() {
            return Err(ServerError::InvalidRoot(self.root_dir.clone()));
        }
        if self.worker_threads == 0 {
            return Err(ServerError::InvalidConfig("worker_threads must be at least 1".into()));
        }
        if self.max_head_bytes < 256 {
            return Err(ServerError::InvalidConfig("max_head_bytes must be at least 256".into()));
        }
        Ok(())
    }

    /// Streaming chunk size in bytes (never below 1 KB)
    pub fn buffer_bytes(&self) -> usize {
        self.buffer_kb.max(1) * 1024
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.write_timeout_ms)
    }

    pub fn invocation_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.invocation_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
