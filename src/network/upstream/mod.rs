/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Upstream DNS resolver configuration and connection setup
//!
//! A single upstream resolver is reached over one of three transports:
//! - **UDP**: plain DNS datagrams on a connected socket
//! - **TCP**: length-prefixed DNS messages on a TCP stream
//! - **TLS**: the TCP framing inside a rustls session (DoT)
//!
//! Connections are created by a transport specific [`ConnectionBuilder`] and
//! recycled by the reuse pool in [`pool`].

use crate::config::types::ConfigError;
use crate::network::upstream::pool::conn_tcp::TcpConnectionBuilder;
use crate::network::upstream::pool::conn_udp::UdpConnectionBuilder;
use crate::network::upstream::pool::ConnectionBuilder;
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub mod pool;
pub(crate) mod utils;

/// Supported upstream transport kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum TransportKind {
    Udp,
    Tcp,
    Tls,
}

impl TransportKind {
    /// Configuration spelling of this transport
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Udp => "udp",
            TransportKind::Tcp => "tcp",
            TransportKind::Tls => "tcp-tls",
        }
    }
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Ok(TransportKind::Udp),
            "tcp" => Ok(TransportKind::Tcp),
            "tcp-tls" | "tls" => Ok(TransportKind::Tls),
            _ => Err(ConfigError::InvalidTransport(s.to_string())),
        }
    }
}

impl TryFrom<String> for TransportKind {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Connection settings for the upstream resolver
///
/// ```yaml
/// upstream:
///   net: tcp-tls
///   remote_addr: "8.8.8.8:853"
///   tls_server_name: dns.google
/// ```
#[derive(Deserialize, Debug, Clone)]
pub struct UpstreamConfig {
    /// Transport used to reach the upstream
    pub net: TransportKind,

    /// Upstream address as `host:port`
    pub remote_addr: String,

    /// Server name for certificate validation and SNI, required for TLS
    #[serde(default)]
    pub tls_server_name: String,

    /// Skip TLS certificate verification (**INSECURE**, testing only!)
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Dial and exchange timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

const DEFAULT_TIMEOUT_MS: u64 = 5000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl UpstreamConfig {
    pub fn new(net: TransportKind, remote_addr: &str, tls_server_name: &str) -> Self {
        Self {
            net,
            remote_addr: remote_addr.to_string(),
            tls_server_name: tls_server_name.to_string(),
            insecure_skip_verify: false,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Check the configuration before any connection is attempted
    ///
    /// The transport kind itself is checked when it is parsed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.net == TransportKind::Tls && self.tls_server_name.trim().is_empty() {
            return Err(ConfigError::MissingTlsServerName);
        }

        split_host_port(&self.remote_addr)
            .ok_or_else(|| ConfigError::InvalidRemoteAddr(self.remote_addr.clone()))?;

        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidLimit("timeout_ms"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Build the connection factory matching the configured transport
    pub fn connection_builder(&self) -> Box<dyn ConnectionBuilder> {
        info!(
            net = %self.net,
            remote = %self.remote_addr,
            timeout_ms = self.timeout_ms,
            "Creating upstream connection builder"
        );
        match self.net {
            TransportKind::Udp => Box::new(UdpConnectionBuilder::new(self)),
            TransportKind::Tcp | TransportKind::Tls => Box::new(TcpConnectionBuilder::new(self)),
        }
    }
}

/// Split `host:port`, accepting bracketed IPv6 hosts
///
/// Returns `None` when the port is missing or not a number, or the host is empty.
pub(crate) fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let colon = addr.rfind(':')?;
    let (host, port) = (&addr[..colon], &addr[colon + 1..]);
    let port = port.parse::<u16>().ok()?;

    let host = if host.starts_with('[') && host.ends_with(']') {
        &host[1..host.len() - 1]
    } else if host.contains(':') {
        // unbracketed IPv6 is ambiguous
        return None;
    } else {
        host
    };

    if host.is_empty() {
        return None;
    }
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!("udp".parse::<TransportKind>(), Ok(TransportKind::Udp));
        assert_eq!("TCP".parse::<TransportKind>(), Ok(TransportKind::Tcp));
        assert_eq!("tcp-tls".parse::<TransportKind>(), Ok(TransportKind::Tls));
        assert_eq!("tls".parse::<TransportKind>(), Ok(TransportKind::Tls));
        assert_eq!(
            "doh".parse::<TransportKind>(),
            Err(ConfigError::InvalidTransport("doh".to_string()))
        );
        assert_eq!(TransportKind::Tls.to_string(), "tcp-tls");
    }

    #[test]
    fn test_validate_udp() {
        let config = UpstreamConfig::new(TransportKind::Udp, "114.114.114.114:53", "");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_tcp_without_server_name() {
        let config = UpstreamConfig::new(TransportKind::Tcp, "208.67.222.222:5353", "");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_tls_requires_server_name() {
        let config = UpstreamConfig::new(TransportKind::Tls, "8.8.8.8:853", "");
        assert_eq!(config.validate(), Err(ConfigError::MissingTlsServerName));

        let config = UpstreamConfig::new(TransportKind::Tls, "8.8.8.8:853", "  ");
        assert_eq!(config.validate(), Err(ConfigError::MissingTlsServerName));

        let config = UpstreamConfig::new(TransportKind::Tls, "8.8.8.8:853", "dns.google");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_remote_addr() {
        for bad in ["8.8.8.8", "8.8.8.8:dns", ":53", "::1:53", "8.8.8.8:70000"] {
            let config = UpstreamConfig::new(TransportKind::Udp, bad, "");
            assert_eq!(
                config.validate(),
                Err(ConfigError::InvalidRemoteAddr(bad.to_string())),
                "{bad}"
            );
        }
        for good in ["dns.google:53", "[2001:4860:4860::8888]:53", "127.0.0.1:5353"] {
            let config = UpstreamConfig::new(TransportKind::Udp, good, "");
            assert!(config.validate().is_ok(), "{good}");
        }
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = UpstreamConfig::new(TransportKind::Udp, "127.0.0.1:53", "");
        config.timeout_ms = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLimit("timeout_ms"))
        );
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("dns.google:853"), Some(("dns.google", 853)));
        assert_eq!(split_host_port("[::1]:53"), Some(("::1", 53)));
        assert_eq!(split_host_port("[::1]"), None);
    }
}
