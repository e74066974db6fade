/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Dial helpers for upstream connections
//!
//! Provides helper functions for:
//! - Upstream address resolution
//! - UDP socket setup
//! - TCP connection establishment
//! - TLS handshakes

use crate::core::error::QueryError;
use crate::network::tls_config::{insecure_client_config, secure_client_config};
use rustls::pki_types::ServerName;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Resolve `host:port` to the first socket address
///
/// IP literals resolve without touching the system resolver.
pub(crate) async fn resolve_remote(addr: &str) -> Result<SocketAddr, QueryError> {
    let mut addrs = lookup_host(addr)
        .await
        .map_err(|e| QueryError::dial(addr, format!("resolve failed: {e}")))?;
    let resolved = addrs
        .next()
        .ok_or_else(|| QueryError::dial(addr, "resolve returned no addresses"))?;
    debug!(remote = addr, resolved = %resolved, "Resolved upstream address");
    Ok(resolved)
}

/// Create a non-blocking UDP socket connected to the remote server
///
/// `connect()` sets the default destination so `send`/`recv` can be used and
/// datagrams from other peers are filtered by the kernel.
pub(crate) fn connect_socket(remote: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(remote), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    let _ = socket.set_reuse_address(true);

    let bind: SocketAddr = if remote.is_ipv4() {
        (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
    };
    socket.bind(&bind.into())?;
    socket.connect(&remote.into())?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
}

/// Open a TCP stream to the remote server within `conn_timeout`
///
/// TCP_NODELAY is enabled since every DNS query is a small write that must
/// go out immediately.
pub(crate) async fn connect_stream(
    remote: SocketAddr,
    conn_timeout: Duration,
) -> Result<TcpStream, QueryError> {
    let stream = match timeout(conn_timeout, TcpStream::connect(remote)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(QueryError::dial(remote.to_string(), e)),
        Err(_) => {
            return Err(QueryError::dial(
                remote.to_string(),
                format!("connect timed out after {}ms", conn_timeout.as_millis()),
            ));
        }
    };
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Upgrade a TCP stream to TLS
///
/// # Security Warning
/// Setting `skip_cert` disables certificate validation. Only use for testing!
pub(crate) async fn connect_tls(
    tcp_stream: TcpStream,
    skip_cert: bool,
    server_name: &str,
    conn_timeout: Duration,
) -> Result<TlsStream<TcpStream>, QueryError> {
    let remote = tcp_stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| server_name.to_string());

    let config = if skip_cert {
        insecure_client_config()
    } else {
        secure_client_config()
    };
    let connector = TlsConnector::from(Arc::new(config));
    let dns_name = ServerName::try_from(server_name.to_string())
        .map_err(|_| QueryError::dial(&remote, format!("invalid TLS server name {server_name:?}")))?;

    match timeout(conn_timeout, connector.connect(dns_name, tcp_stream)).await {
        Ok(Ok(s)) => Ok(s),
        Ok(Err(e)) => Err(QueryError::dial(remote, format!("TLS handshake failed: {e}"))),
        Err(_) => Err(QueryError::dial(remote, "TLS handshake timed out")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_resolve_ip_literal() {
        let addr = resolve_remote("127.0.0.1:5353").await.unwrap();
        assert_eq!(addr, "127.0.0.1:5353".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_connect_stream_refused_is_dial_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = connect_stream(addr, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, QueryError::Dial { .. }));
    }

    #[tokio::test]
    async fn test_connect_socket_sets_peer() {
        let peer: SocketAddr = "127.0.0.1:53".parse().unwrap();
        let socket = connect_socket(peer).unwrap();
        assert_eq!(socket.peer_addr().unwrap(), peer);
    }
}
