/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

use crate::core::error::QueryError;
use crate::network::transport::{recv_message_udp, send_message_udp, MAX_UDP_PAYLOAD};
use crate::network::upstream::pool::{Connection, ConnectionBuilder};
use crate::network::upstream::utils::{connect_socket, resolve_remote};
use crate::network::upstream::UpstreamConfig;
use async_trait::async_trait;
use hickory_proto::op::Message;
use std::fmt::{Debug, Formatter};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

/// A connected UDP socket used for one exchange at a time
pub struct UdpConnection {
    /// Unique connection ID (for debugging/tracing)
    id: u16,
    socket: UdpSocket,
    /// Timeout for a single round trip
    timeout: Duration,
    last_used: Instant,
    closed: bool,
    buf: Box<[u8]>,
}

impl Debug for UdpConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpConnection")
            .field("id", &self.id)
            .field("peer", &self.socket.peer_addr().ok())
            .field("closed", &self.closed)
            .finish()
    }
}

impl UdpConnection {
    fn new(conn_id: u16, socket: UdpSocket, timeout: Duration) -> Self {
        Self {
            id: conn_id,
            socket,
            timeout,
            last_used: Instant::now(),
            closed: false,
            buf: vec![0u8; MAX_UDP_PAYLOAD].into_boxed_slice(),
        }
    }

    /// Send the query and wait for the datagram carrying its ID
    ///
    /// Late or duplicated replies to earlier queries may still sit in the
    /// socket buffer; they are skipped.
    async fn round_trip(&mut self, request: &Message) -> Result<Message, QueryError> {
        send_message_udp(&self.socket, request).await?;
        loop {
            let response = recv_message_udp(&self.socket, &mut self.buf).await?;
            if response.id() == request.id() {
                return Ok(response);
            }
            debug!(
                conn_id = self.id,
                query_id = request.id(),
                stray_id = response.id(),
                "Dropping stray UDP response"
            );
        }
    }
}

#[async_trait]
impl Connection for UdpConnection {
    fn id(&self) -> u16 {
        self.id
    }

    async fn exchange(&mut self, request: &Message) -> Result<Message, QueryError> {
        if self.closed {
            return Err(QueryError::exchange(format!(
                "Cannot query on closed UDP connection (id={})",
                self.id
            )));
        }

        debug!(conn_id = self.id, query_id = request.id(), "Sending DNS query over UDP");

        match timeout(self.timeout, self.round_trip(request)).await {
            Ok(Ok(response)) => {
                self.last_used = Instant::now();
                debug!(
                    conn_id = self.id,
                    query_id = request.id(),
                    "Received DNS response over UDP"
                );
                Ok(response)
            }
            Ok(Err(e)) => {
                debug!(conn_id = self.id, error = %e, "UDP exchange failed");
                Err(e)
            }
            Err(_) => {
                debug!(
                    conn_id = self.id,
                    query_id = request.id(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "DNS query timeout over UDP"
                );
                Err(QueryError::exchange(format!(
                    "UDP query timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            debug!(conn_id = self.id, "Closing UDP connection");
            self.closed = true;
        }
    }

    fn available(&self) -> bool {
        !self.closed
    }

    fn last_used(&self) -> Instant {
        self.last_used
    }
}

/// Builder for connected UDP sockets
#[derive(Debug)]
pub struct UdpConnectionBuilder {
    remote_addr: String,
    timeout: Duration,
}

impl UdpConnectionBuilder {
    pub fn new(config: &UpstreamConfig) -> Self {
        Self {
            remote_addr: config.remote_addr.clone(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl ConnectionBuilder for UdpConnectionBuilder {
    async fn create_connection(&self, conn_id: u16) -> Result<Box<dyn Connection>, QueryError> {
        let remote = resolve_remote(&self.remote_addr).await?;
        let socket =
            connect_socket(remote).map_err(|e| QueryError::dial(&self.remote_addr, e))?;

        info!(
            conn_id,
            local_addr = ?socket.local_addr().ok(),
            remote_addr = %remote,
            "Established UDP connection to DNS server"
        );

        Ok(Box::new(UdpConnection::new(conn_id, socket, self.timeout)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::upstream::TransportKind;
    use crate::testing::{
        question, spawn_silent_udp_upstream, spawn_udp_upstream, spawn_udp_upstream_with,
    };

    fn builder(addr: std::net::SocketAddr, timeout_ms: u64) -> UdpConnectionBuilder {
        let mut config = UpstreamConfig::new(TransportKind::Udp, &addr.to_string(), "");
        config.timeout_ms = timeout_ms;
        UdpConnectionBuilder::new(&config)
    }

    #[tokio::test]
    async fn test_udp_exchange() {
        let upstream = spawn_udp_upstream().await;
        let mut conn = builder(upstream, 2000).create_connection(1).await.unwrap();

        let response = conn.exchange(&question(7, "example.com.")).await.unwrap();
        assert_eq!(response.id(), 7);
        assert!(!response.answers().is_empty());

        // the same socket serves the next exchange
        let response = conn.exchange(&question(8, "example.org.")).await.unwrap();
        assert_eq!(response.id(), 8);
        assert!(conn.available());
    }

    #[tokio::test]
    async fn test_duplicated_reply_does_not_fail_next_exchange() {
        let upstream = spawn_udp_upstream_with(2, 1).await;
        let mut conn = builder(upstream, 2000).create_connection(1).await.unwrap();

        for id in 1..=3u16 {
            let response = conn.exchange(&question(id, "example.com.")).await.unwrap();
            assert_eq!(response.id(), id);
        }
    }

    #[tokio::test]
    async fn test_large_reply_is_not_truncated() {
        let upstream = spawn_udp_upstream_with(1, 600).await;
        let mut conn = builder(upstream, 2000).create_connection(1).await.unwrap();

        let response = conn.exchange(&question(5, "example.com.")).await.unwrap();
        assert_eq!(response.answers().len(), 600);
    }

    #[tokio::test]
    async fn test_udp_exchange_timeout() {
        let upstream = spawn_silent_udp_upstream().await;
        let mut conn = builder(upstream, 100).create_connection(1).await.unwrap();

        let err = conn.exchange(&question(9, "example.com.")).await.unwrap_err();
        assert!(matches!(err, QueryError::Exchange(_)));
    }

    #[tokio::test]
    async fn test_closed_udp_connection_refuses_exchange() {
        let upstream = spawn_udp_upstream().await;
        let mut conn = builder(upstream, 2000).create_connection(1).await.unwrap();
        conn.close();
        conn.close();

        assert!(!conn.available());
        assert!(conn.exchange(&question(1, "example.com.")).await.is_err());
    }
}
