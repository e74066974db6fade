/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Connection pooling for the upstream resolver
//!
//! Every exchange needs exclusive use of one connection, so connections are
//! borrowed from the pool, used for a single request/response round trip,
//! and given back only if that round trip succeeded.
//!
//! # Connection Types
//! - `conn_udp`: connected UDP sockets
//! - `conn_tcp`: plain TCP and DoT (DNS over TLS) streams
//!
//! # Pool
//! - `pool_reuse`: bounded idle set, lazy dialing, idle connection reaping

pub mod conn_tcp;
pub mod conn_udp;
pub mod pool_reuse;

use crate::core::error::QueryError;
use async_trait::async_trait;
use hickory_proto::op::Message;
use std::fmt::Debug;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A single transport connection to the upstream DNS server
///
/// Owned by exactly one worker while checked out of the pool.
#[async_trait]
pub trait Connection: Send + Debug + 'static {
    /// Identifier used in logs
    fn id(&self) -> u16;

    /// Send one question and wait for its answer
    ///
    /// The response ID must match the question ID. Any error leaves the
    /// connection in an unknown state; the caller must close and drop it.
    async fn exchange(&mut self, request: &Message) -> Result<Message, QueryError>;

    /// Mark this connection as closed
    ///
    /// Idempotent. The socket itself is released when the connection is dropped.
    fn close(&mut self);

    /// Whether the connection can still be used
    fn available(&self) -> bool;

    /// Probe the transport before the connection is handed out again
    ///
    /// Must not block. Stream connections use it to notice a peer that
    /// closed the connection while it sat idle.
    fn check_health(&mut self) -> bool {
        self.available()
    }

    /// Time of the last successful exchange (or of creation)
    fn last_used(&self) -> Instant;
}

/// Creates new connections on pool miss
#[async_trait]
pub trait ConnectionBuilder: Send + Sync + Debug + 'static {
    /// Dial a new connection with the given ID
    ///
    /// Failures are reported as [`QueryError::Dial`].
    async fn create_connection(&self, conn_id: u16) -> Result<Box<dyn Connection>, QueryError>;
}

/// Hands out connections and takes back the healthy ones
#[async_trait]
pub trait ConnectionPool: Send + Sync + Debug + 'static {
    /// Borrow an idle connection or dial a new one
    async fn get(&self) -> Result<Box<dyn Connection>, QueryError>;

    /// Return a connection after a successful exchange
    fn put(&self, conn: Box<dyn Connection>);

    /// Close a connection that leaves the pool for good, e.g. after a failed exchange
    fn discard(&self, conn: Box<dyn Connection>);

    /// Close idle connections that are broken or idle for too long
    async fn maintain(&self);

    /// Close every idle connection and refuse further returns
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Maintenance interval for pool cleanup
const MAINTENANCE_DURATION: Duration = Duration::from_secs(10);

/// Start background maintenance task for a connection pool
///
/// Holds only a weak reference, so the task ends once the pool is dropped or closed.
fn start_maintenance<P: ConnectionPool>(pool: &Arc<P>) {
    let weak: Weak<P> = Arc::downgrade(pool);
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(MAINTENANCE_DURATION).await;
            let Some(pool) = weak.upgrade() else {
                break;
            };
            if pool.is_closed() {
                break;
            }
            pool.maintain().await;
        }
        debug!("Pool maintenance task exiting");
    });
}
