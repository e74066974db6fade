/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Concurrent DNS resolution client
//!
//! Callers hand [`Query`] values to a [`Dispatcher`]; every query runs on its
//! own worker task and completes with exactly one [`Answer`] on the result
//! channel. Raw per-query errors are mirrored on a second, diagnostic
//! channel.

use crate::config::types::ConfigError;
use crate::core::error::QueryError;
use hickory_proto::op::Message;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub mod dispatcher;
mod shutdown;

pub use dispatcher::Dispatcher;

/// Caller-assigned correlation ID
pub type QueryId = u64;

/// A question to resolve
#[derive(Debug, Clone)]
pub struct Query {
    pub id: QueryId,
    /// Sent to the upstream unmodified
    pub question: Message,
    pub deadline: Option<Instant>,
    pub cancel: Option<CancellationToken>,
}

impl Query {
    pub fn new(id: QueryId, question: Message) -> Self {
        Self {
            id,
            question,
            deadline: None,
            cancel: None,
        }
    }

    /// Give up on the query once `deadline` has passed
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Give up on the query when `token` is cancelled
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Outcome of one [`Query`]
///
/// Exactly one of `message` and `error` is set.
#[derive(Debug, Clone)]
pub struct Answer {
    pub id: QueryId,
    /// Upstream address the query was sent to
    pub server_addr: String,
    pub message: Option<Message>,
    pub error: Option<QueryError>,
}

impl Answer {
    pub(crate) fn success(id: QueryId, server_addr: &str, message: Message) -> Self {
        Self {
            id,
            server_addr: server_addr.to_string(),
            message: Some(message),
            error: None,
        }
    }

    pub(crate) fn failure(id: QueryId, server_addr: &str, error: QueryError) -> Self {
        Self {
            id,
            server_addr: server_addr.to_string(),
            message: None,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Message, QueryError> {
        match (self.message, self.error) {
            (_, Some(err)) => Err(err),
            (Some(message), None) => Ok(message),
            (None, None) => Err(QueryError::exchange("empty answer")),
        }
    }
}

/// Worker, channel and pool limits
///
/// ```yaml
/// dispatcher:
///   max_concurrency: 256
///   result_capacity: 100
///   error_capacity: 100
///   max_idle_conns: 64
///   idle_timeout_secs: 10
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherOptions {
    /// Workers allowed to talk to the upstream at the same time
    pub max_concurrency: usize,
    pub result_capacity: usize,
    pub error_capacity: usize,
    /// Idle connections kept for reuse
    pub max_idle_conns: usize,
    pub idle_timeout_secs: u64,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 256,
            result_capacity: 100,
            error_capacity: 100,
            max_idle_conns: 64,
            idle_timeout_secs: 10,
        }
    }
}

impl DispatcherOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("max_concurrency", self.max_concurrency as u64),
            ("result_capacity", self.result_capacity as u64),
            ("error_capacity", self.error_capacity as u64),
            ("max_idle_conns", self.max_idle_conns as u64),
            ("idle_timeout_secs", self.idle_timeout_secs),
        ];
        for (name, value) in limits {
            if value == 0 {
                return Err(ConfigError::InvalidLimit(name));
            }
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::question;

    #[test]
    fn test_default_options_are_valid() {
        let options = DispatcherOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.idle_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let options = DispatcherOptions {
            result_capacity: 0,
            ..Default::default()
        };
        assert_eq!(
            options.validate(),
            Err(ConfigError::InvalidLimit("result_capacity"))
        );

        let options = DispatcherOptions {
            max_concurrency: 0,
            ..Default::default()
        };
        assert_eq!(
            options.validate(),
            Err(ConfigError::InvalidLimit("max_concurrency"))
        );
    }

    #[test]
    fn test_answer_into_result() {
        let ok = Answer::success(1, "127.0.0.1:53", question(1, "example.com."));
        assert!(ok.is_ok());
        assert_eq!(ok.into_result().unwrap().id(), 1);

        let failed = Answer::failure(2, "127.0.0.1:53", QueryError::Cancelled);
        assert!(!failed.is_ok());
        assert_eq!(failed.into_result().unwrap_err(), QueryError::Cancelled);
    }
}
