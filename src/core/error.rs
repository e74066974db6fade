/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Unified error handling for chinadns
//!
//! Two layers of errors live here:
//! - [`DnsError`]: application-level failures (startup, config, runtime)
//! - [`QueryError`]: per-query failures that travel inside an `Answer` and
//!   on the dispatcher's error side channel, so they must be cheap to clone

use crate::config::types::ConfigError;
use thiserror::Error;

/// Main error type for chinadns
///
/// Can be constructed from the underlying library errors through `From`.
#[derive(Debug, Error)]
pub enum DnsError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yml::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Tokio runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl DnsError {
    /// Create a runtime error
    pub fn runtime<S: Into<String>>(msg: S) -> Self {
        DnsError::Runtime(msg.into())
    }
}

/// Per-query failure carried by an `Answer`
///
/// None of these abort the dispatcher; the query that hit one simply
/// completes with it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// A pooled connection could not be established
    #[error("dial {addr} failed: {reason}")]
    Dial { addr: String, reason: String },

    /// Network failure or malformed response during the round trip
    #[error("exchange failed: {0}")]
    Exchange(String),

    /// The result channel was at capacity when the answer was ready
    #[error("worker result channel is full")]
    ChannelFull,

    /// The query's own deadline passed before it completed
    #[error("query deadline exceeded")]
    DeadlineExceeded,

    /// The query's cancellation token fired
    #[error("query cancelled")]
    Cancelled,

    /// The dispatcher was stopped
    #[error("dispatcher stopped")]
    Stopped,
}

impl QueryError {
    pub fn dial<A: Into<String>, R: ToString>(addr: A, reason: R) -> Self {
        QueryError::Dial {
            addr: addr.into(),
            reason: reason.to_string(),
        }
    }

    pub fn exchange<S: Into<String>>(msg: S) -> Self {
        QueryError::Exchange(msg.into())
    }

    /// Whether the error comes from talking to the upstream, as opposed to
    /// local lifecycle or delivery conditions
    pub fn is_transport(&self) -> bool {
        matches!(self, QueryError::Dial { .. } | QueryError::Exchange(_))
    }
}

/// Convenient type alias for Results using DnsError
pub type Result<T> = std::result::Result<T, DnsError>;
