/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

use crate::core::error::QueryError;
use crate::network::upstream::pool::{
    start_maintenance, Connection, ConnectionBuilder, ConnectionPool,
};
use async_trait::async_trait;
use crossbeam_queue::ArrayQueue;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// A reusable connection pool
/// - Dials lazily on pool miss, one connection per borrowing worker
/// - Keeps at most `max_idle` returned connections for reuse
/// - Drops connections idle beyond `idle_timeout`
#[derive(Debug)]
pub struct ReusePool {
    /// Queue holding idle connections
    connections: ArrayQueue<Box<dyn Connection>>,
    /// Connections currently open, idle or checked out
    open_count: AtomicUsize,
    /// Maximum allowed idle duration before dropping a connection
    idle_timeout: Duration,
    /// Factory to create new connections
    connection_builder: Box<dyn ConnectionBuilder>,
    /// Monotonic increasing connection id
    next_id: AtomicU16,
    closed: AtomicBool,
}

#[async_trait]
impl ConnectionPool for ReusePool {
    async fn get(&self) -> Result<Box<dyn Connection>, QueryError> {
        while let Some(mut conn) = self.connections.pop() {
            if !conn.check_health() {
                debug!(conn_id = conn.id(), "Detected unavailable connection, closing it");
                self.discard(conn);
            } else if conn.last_used().elapsed() >= self.idle_timeout {
                debug!(conn_id = conn.id(), "Idle connection expired, closing it");
                self.discard(conn);
            } else {
                debug!(conn_id = conn.id(), "Reusing existing connection");
                return Ok(conn);
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = self.connection_builder.create_connection(id).await?;
        self.open_count.fetch_add(1, Ordering::Relaxed);
        debug!(
            conn_id = id,
            open = self.open_count.load(Ordering::Relaxed),
            "Dialed new upstream connection"
        );
        Ok(conn)
    }

    fn put(&self, conn: Box<dyn Connection>) {
        if self.closed.load(Ordering::Acquire) || !conn.available() {
            debug!(conn_id = conn.id(), "Pool closed or connection unusable, closing it");
            self.discard(conn);
            return;
        }
        if let Err(conn) = self.connections.push(conn) {
            debug!(conn_id = conn.id(), "Idle queue is full, closing surplus connection");
            self.discard(conn);
        }
    }

    async fn maintain(&self) {
        let check_count = self.connections.len();
        if check_count == 0 {
            return;
        }

        let mut expired = 0usize;
        let mut invalid = 0usize;
        for _ in 0..check_count {
            let Some(mut conn) = self.connections.pop() else {
                break;
            };
            if !conn.check_health() {
                invalid += 1;
                self.discard(conn);
            } else if conn.last_used().elapsed() >= self.idle_timeout {
                expired += 1;
                self.discard(conn);
            } else if let Err(conn) = self.connections.push(conn) {
                self.discard(conn);
            }
        }

        if expired > 0 || invalid > 0 {
            debug!(
                "Reuse pool maintenance: dropped {} idle, {} invalid, {} open",
                expired,
                invalid,
                self.open_count.load(Ordering::Relaxed)
            );
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut count = 0usize;
        while let Some(conn) = self.connections.pop() {
            self.discard(conn);
            count += 1;
        }
        info!("Reuse pool closed, {} idle connections released", count);
    }

    fn discard(&self, mut conn: Box<dyn Connection>) {
        conn.close();
        let _ = self
            .open_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl ReusePool {
    /// Create a new pool and start its maintenance task
    pub fn new(
        max_idle: usize,
        idle_timeout: Duration,
        connection_builder: Box<dyn ConnectionBuilder>,
    ) -> Arc<ReusePool> {
        info!(
            "Creating ReusePool (max_idle={}, idle_timeout={:?})",
            max_idle, idle_timeout
        );

        let pool = Arc::new(Self {
            connections: ArrayQueue::new(max_idle),
            open_count: AtomicUsize::new(0),
            idle_timeout,
            connection_builder,
            next_id: AtomicU16::new(1),
            closed: AtomicBool::new(false),
        });
        start_maintenance(&pool);
        pool
    }

    /// Number of idle connections waiting for reuse
    pub fn idle_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of open connections, idle or checked out
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::Relaxed)
    }
}
