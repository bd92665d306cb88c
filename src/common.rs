//! Common helpers shared between the proxy coordinator and the upgrade
//! orchestrators.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Buffer size for relay and handshake-response reads.
pub const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Splits a `host:port` string into its parts.
///
/// IPv6 addresses must be bracketed (`[::1]:5222`).
pub fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let colon_pos = addr
        .rfind(':')
        .ok_or_else(|| Error::Config(format!("address must include port: '{}'", addr)))?;

    let host_part = &addr[..colon_pos];
    let port_part = &addr[colon_pos + 1..];

    // Handle IPv6 addresses in brackets
    let host = if host_part.starts_with('[') && host_part.ends_with(']') {
        &host_part[1..host_part.len() - 1]
    } else {
        host_part
    };

    if host.is_empty() {
        return Err(Error::Config(format!("address must include host: '{}'", addr)));
    }

    let port: u16 = port_part
        .parse()
        .map_err(|_| Error::Config(format!("invalid port in address '{}'", addr)))?;

    Ok((host.to_string(), port))
}

/// Shared DNS resolver wrapper reused across sessions.
pub struct DnsResolver {
    resolver: Arc<
        Mutex<
            Option<
                hickory_resolver::Resolver<hickory_resolver::name_server::TokioConnectionProvider>,
            >,
        >,
    >,
}

impl DnsResolver {
    /// Creates a new DNS resolver.
    pub fn new() -> Self {
        Self {
            resolver: Arc::new(Mutex::new(None)),
        }
    }

    /// Resolves a hostname to a SocketAddr asynchronously.
    ///
    /// The resolver is lazily initialized and reused for subsequent
    /// resolutions; IP literals short-circuit without touching DNS.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr> {
        // First try parsing as IP address
        if let Ok(ip) = host.parse::<std::net::IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }

        // Lazily initialize the resolver
        let mut resolver_guard = self.resolver.lock().await;
        if resolver_guard.is_none() {
            let resolver = hickory_resolver::Resolver::builder_tokio()
                .map_err(|e| Error::UpstreamDial(format!("failed to create DNS resolver: {}", e)))?
                .build();
            *resolver_guard = Some(resolver);
        }

        let resolver = resolver_guard.as_ref().unwrap();

        let response = resolver
            .lookup_ip(host)
            .await
            .map_err(|e| Error::UpstreamDial(format!("failed to resolve '{}': {}", host, e)))?;

        response
            .iter()
            .next()
            .map(|ip| SocketAddr::new(ip, port))
            .ok_or_else(|| Error::UpstreamDial(format!("no addresses found for '{}'", host)))
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Formats a duration in a compact human-readable format.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let nanos = d.subsec_nanos();

    if secs == 0 && nanos == 0 {
        return "0s".to_string();
    }

    let mut result = String::new();

    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs_remainder = secs % 60;

    if hours > 0 {
        result.push_str(&format!("{}h", hours));
    }
    if mins > 0 {
        result.push_str(&format!("{}m", mins));
    }
    if secs_remainder > 0 || (hours == 0 && mins == 0 && nanos == 0) {
        result.push_str(&format!("{}s", secs_remainder));
    } else if nanos > 0 && hours == 0 && mins == 0 && secs_remainder == 0 {
        let ms = nanos / 1_000_000;
        if ms > 0 {
            result.push_str(&format!("{}ms", ms));
        }
    }

    if result.is_empty() {
        "0s".to_string()
    } else {
        result
    }
}
