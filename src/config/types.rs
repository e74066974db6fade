/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Configuration structure definitions
//!
//! Defines the schema for chinadns configuration files (YAML format).

use crate::client::DispatcherOptions;
use crate::network::upstream::UpstreamConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid network type {0:?}, must be one of: udp, tcp, tcp-tls")]
    InvalidTransport(String),

    #[error("no TLS server name specified")]
    MissingTlsServerName,

    #[error("invalid remote address {0:?}, expected host:port")]
    InvalidRemoteAddr(String),

    #[error("{0} must be greater than zero")]
    InvalidLimit(&'static str),

    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("Invalid listen address: {0}")]
    InvalidListenAddr(String),
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Logging configuration (level, file output)
    #[serde(default)]
    pub log: LogConfig,

    /// UDP address the listener binds to
    #[serde(default = "default_listen")]
    pub listen: String,

    /// The single upstream resolver queries are forwarded to
    pub upstream: UpstreamConfig,

    /// Worker, channel and pool limits
    #[serde(default)]
    pub dispatcher: DispatcherOptions,
}

impl AppConfig {
    /// Validate the whole configuration tree
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.log.level.to_lowercase().as_str() {
            "off" | "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(ConfigError::InvalidLogLevel(self.log.level.clone())),
        }

        if self.listen.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidListenAddr(self.listen.clone()));
        }

        self.upstream.validate()?;
        self.dispatcher.validate()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level: off, trace, debug, info, warn, error
    #[serde(default = "default_level")]
    pub level: String,

    /// Optional file path for log output (in addition to console)
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> LogConfig {
        LogConfig {
            level: default_level(),
            file: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_listen() -> String {
    "0.0.0.0:1153".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::upstream::TransportKind;

    const MINIMAL: &str = r#"
upstream:
  net: udp
  remote_addr: "114.114.114.114:53"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: AppConfig = serde_yml::from_str(MINIMAL).unwrap();
        assert_eq!(config.listen, "0.0.0.0:1153");
        assert_eq!(config.log.level, "info");
        assert_eq!(config.upstream.net, TransportKind::Udp);
        assert_eq!(config.dispatcher.result_capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
log:
  level: debug
listen: "127.0.0.1:5353"
upstream:
  net: tcp-tls
  remote_addr: "8.8.8.8:853"
  tls_server_name: dns.google
  timeout_ms: 2000
dispatcher:
  max_concurrency: 32
  result_capacity: 8
"#;
        let config: AppConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.upstream.net, TransportKind::Tls);
        assert_eq!(config.upstream.tls_server_name, "dns.google");
        assert_eq!(config.dispatcher.max_concurrency, 32);
        assert_eq!(config.dispatcher.result_capacity, 8);
        assert_eq!(config.dispatcher.error_capacity, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config: AppConfig = serde_yml::from_str(MINIMAL).unwrap();
        config.log.level = "loud".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("loud".to_string()))
        );
    }

    #[test]
    fn test_invalid_listen_addr() {
        let mut config: AppConfig = serde_yml::from_str(MINIMAL).unwrap();
        config.listen = "localhost".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidListenAddr(_))
        ));
    }

    #[test]
    fn test_unknown_transport_rejected_at_parse() {
        let yaml = r#"
upstream:
  net: quic
  remote_addr: "1.1.1.1:853"
"#;
        assert!(serde_yml::from_str::<AppConfig>(yaml).is_err());
    }
}
