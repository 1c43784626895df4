//! Utility functions and constants
//!
//! **Why**: Centralized helpers used across multiple modules
//!
//! **Used by**: static_files, http_server (connect URL)

/// Extension to content-type lookup
pub mod mime {
    use once_cell::sync::Lazy;
    use std::collections::HashMap;
    use std::path::Path;

    /// Content type for anything not in the table
    pub const OCTET_STREAM: &str = "application/octet-stream";

    /// Lowercase extension (no dot) -> content type
    static TABLE: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
        HashMap::from([
            ("css", "text/css"),
            ("htm", "text/html"),
            ("html", "text/html"),
            ("js", "application/javascript"),
            ("mjs", "application/javascript"),
            ("json", "application/json"),
            ("map", "application/json"),
            ("wasm", "application/wasm"),
            ("png", "image/png"),
            ("jpg", "image/jpeg"),
            ("jpeg", "image/jpeg"),
            ("gif", "image/gif"),
            ("ico", "image/x-icon"),
            ("svg", "image/svg+xml"),
            ("webp", "image/webp"),
            ("txt", "text/plain"),
            ("xml", "application/xml"),
            ("woff", "font/woff"),
            ("woff2", "font/woff2"),
            ("mp3", "audio/mpeg"),
            ("mp4", "video/mp4"),
        ])
    });

    /// Content type for a path, matched case-insensitively on its extension
    pub fn for_path(path: &Path) -> &'static str {
        path.extension()
            .and_then(|s| s.to_str())
            .and_then(|ext| TABLE.get(ext.to_ascii_lowercase().as_str()).copied())
            .unwrap_or(OCTET_STREAM)
    }

}

/// Network helpers
pub mod net {
    use std::net::{IpAddr, Ipv4Addr, UdpSocket};

    /// Best guess at this machine's LAN IPv4 address.
    ///
    /// Opens a UDP socket "towards" a public address (no packet is sent) and
    /// reads back the local side. Falls back to loopback.
    pub fn local_ipv4() -> IpAddr {
        UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .and_then(|sock| {
                sock.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
                sock.local_addr()
            })
            .map(|addr| addr.ip())
            .ok()
            .filter(|ip| ip.is_ipv4() && !ip.is_unspecified())
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}
