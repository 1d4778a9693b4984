//! The remote host/port the client targets.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A companion address as configured by the user.
///
/// Endpoints are replaced wholesale when the configuration changes; there
/// are no partial updates.  Only a valid endpoint (non-blank host, non-zero
/// port) can drive the client out of `NoConfig`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Builds an endpoint, returning `None` if it would be incomplete.
    ///
    /// Surrounding whitespace in `host` is trimmed.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use buttonbox_core::Endpoint;
    ///
    /// assert!(Endpoint::new("10.0.0.5", 5005).is_some());
    /// assert!(Endpoint::new("   ", 5005).is_none());
    /// assert!(Endpoint::new("10.0.0.5", 0).is_none());
    /// ```
    pub fn new(host: impl Into<String>, port: u16) -> Option<Self> {
        let endpoint = Self {
            host: host.into().trim().to_string(),
            port,
        };
        endpoint.is_valid().then_some(endpoint)
    }

    /// Returns `true` if the host is non-blank and the port non-zero.
    pub fn is_valid(&self) -> bool {
        !self.host.trim().is_empty() && self.port != 0
    }

    /// Formats the endpoint as a `host:port` string suitable for
    /// `tokio::net::lookup_host`.  The host is trimmed, as in
    /// [`is_valid`](Self::is_valid), and IPv6 literals are bracketed.
    pub fn authority(&self) -> String {
        let host = self.host.trim();
        if host.contains(':') && !host.starts_with('[') {
            format!("[{}]:{}", host, self.port)
        } else {
            format!("{}:{}", host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}
