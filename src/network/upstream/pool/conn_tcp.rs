/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

use crate::core::error::QueryError;
use crate::network::transport::tcp_transport::TcpTransport;
use crate::network::upstream::pool::{Connection, ConnectionBuilder};
use crate::network::upstream::utils::{connect_stream, connect_tls, resolve_remote};
use crate::network::upstream::{TransportKind, UpstreamConfig};
use async_trait::async_trait;
use hickory_proto::op::Message;
use std::fmt::{Debug, Formatter};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

/// A persistent stream connection to the upstream DNS server
///
/// Covers both plaintext TCP and TLS (DoT); `S` is the underlying stream.
/// Exchanges are strictly sequential: write one framed query, read one
/// framed response.
pub struct TcpConnection<S> {
    id: u16,
    transport: TcpTransport<S>,
    tls: bool,
    timeout: Duration,
    last_used: Instant,
    closed: bool,
}

impl<S> Debug for TcpConnection<S> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpConnection")
            .field("id", &self.id)
            .field("tls", &self.tls)
            .field("closed", &self.closed)
            .finish()
    }
}

impl<S> TcpConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn new(conn_id: u16, stream: S, tls: bool, timeout: Duration) -> Self {
        Self {
            id: conn_id,
            transport: TcpTransport::new(stream),
            tls,
            timeout,
            last_used: Instant::now(),
            closed: false,
        }
    }

    async fn round_trip(&mut self, request: &Message) -> Result<Message, QueryError> {
        self.transport.write_message(request).await?;
        let response = self.transport.read_message().await?;
        if response.id() != request.id() {
            return Err(QueryError::exchange(format!(
                "response id {} does not match query id {}",
                response.id(),
                request.id()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl<S> Connection for TcpConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn id(&self) -> u16 {
        self.id
    }

    async fn exchange(&mut self, request: &Message) -> Result<Message, QueryError> {
        if self.closed {
            return Err(QueryError::exchange(format!(
                "Cannot query on closed TCP connection (id={})",
                self.id
            )));
        }

        debug!(
            conn_id = self.id,
            query_id = request.id(),
            tls = self.tls,
            "Sending DNS query over TCP"
        );

        match timeout(self.timeout, self.round_trip(request)).await {
            Ok(Ok(response)) => {
                self.last_used = Instant::now();
                debug!(
                    conn_id = self.id,
                    query_id = request.id(),
                    "Received DNS response over TCP"
                );
                Ok(response)
            }
            Ok(Err(e)) => {
                debug!(conn_id = self.id, error = %e, "TCP exchange failed");
                Err(e)
            }
            Err(_) => {
                debug!(
                    conn_id = self.id,
                    query_id = request.id(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "DNS query timeout over TCP"
                );
                Err(QueryError::exchange(format!(
                    "TCP query timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            debug!(conn_id = self.id, "Closing TCP connection");
            self.closed = true;
        }
    }

    fn available(&self) -> bool {
        !self.closed
    }

    fn check_health(&mut self) -> bool {
        if self.closed {
            return false;
        }
        if self.transport.is_broken() {
            debug!(conn_id = self.id, tls = self.tls, "Upstream closed idle TCP connection");
            self.close();
            return false;
        }
        true
    }

    fn last_used(&self) -> Instant {
        self.last_used
    }
}

/// Builder that establishes new TCP or TLS (DoT) DNS connections.
#[derive(Debug)]
pub struct TcpConnectionBuilder {
    remote_addr: String,
    timeout: Duration,
    tls_enabled: bool,
    server_name: String,
    insecure_skip_verify: bool,
}

impl TcpConnectionBuilder {
    pub fn new(config: &UpstreamConfig) -> Self {
        Self {
            remote_addr: config.remote_addr.clone(),
            timeout: config.timeout(),
            tls_enabled: config.net == TransportKind::Tls,
            server_name: config.tls_server_name.clone(),
            insecure_skip_verify: config.insecure_skip_verify,
        }
    }
}

#[async_trait]
impl ConnectionBuilder for TcpConnectionBuilder {
    async fn create_connection(&self, conn_id: u16) -> Result<Box<dyn Connection>, QueryError> {
        let remote = resolve_remote(&self.remote_addr).await?;
        let stream = connect_stream(remote, self.timeout).await?;

        info!(
            conn_id,
            remote = %remote,
            tls_enabled = self.tls_enabled,
            "Established TCP connection to DNS server"
        );

        if self.tls_enabled {
            let tls_stream = connect_tls(
                stream,
                self.insecure_skip_verify,
                &self.server_name,
                self.timeout,
            )
            .await?;
            Ok(Box::new(TcpConnection::new(
                conn_id,
                tls_stream,
                true,
                self.timeout,
            )))
        } else {
            Ok(Box::new(TcpConnection::new(
                conn_id,
                stream,
                false,
                self.timeout,
            )))
        }
    }
}
