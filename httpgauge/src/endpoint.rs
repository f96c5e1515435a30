use crate::error::{GaugeError, Result};
use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use tracing::debug;
use url::Url;

/// Default port for plain HTTP targets
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Benchmark target derived once from the URL; immutable for the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Host as written in the URL, used for the `Host` header
    pub host: String,
    /// TCP port, 80 unless the URL names one
    pub port: u16,
    /// Request target including the query string
    pub path: String,
}

impl Endpoint {
    /// Parse a target URL. Only the `http` scheme is accepted.
    pub fn parse(target: &str) -> Result<Self> {
        let url = Url::parse(target)
            .map_err(|e| GaugeError::InvalidUrl(format!("{}: {}", target, e)))?;

        if url.scheme() != "http" {
            return Err(GaugeError::InvalidUrl(format!(
                "unsupported scheme '{}' in {}, only http is supported",
                url.scheme(),
                target
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| GaugeError::InvalidUrl(format!("missing host in {}", target)))?
            .to_string();

        let port = url.port().unwrap_or(DEFAULT_HTTP_PORT);

        let mut path = match url.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self { host, port, path })
    }

    /// Resolve the endpoint to a socket address. Called once per run.
    pub async fn resolve(&self) -> Result<SocketAddr> {
        // IPv6 literals keep their brackets in the URL form
        let host = self.host.trim_start_matches('[').trim_end_matches(']');

        let mut addrs = tokio::net::lookup_host((host, self.port))
            .await
            .map_err(|e| GaugeError::Resolve {
                host: self.host.clone(),
                port: self.port,
                reason: e.to_string(),
            })?;

        let addr = addrs.next().ok_or_else(|| GaugeError::Resolve {
            host: self.host.clone(),
            port: self.port,
            reason: "no addresses returned".to_string(),
        })?;

        debug!(endpoint = %self, addr = %addr, "Resolved target endpoint");
        Ok(addr)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
