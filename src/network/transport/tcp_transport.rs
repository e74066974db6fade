/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

use crate::core::error::QueryError;
use crate::network::transport::{decode_message, encode_message};
use bytes::BytesMut;
use hickory_proto::op::Message;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Length-prefixed DNS message framing over a byte stream (RFC 1035 4.2.2)
///
/// Used for both plain TCP and TLS streams.
pub struct TcpTransport<S> {
    stream: S,
    buf: BytesMut,
}

impl<S> TcpTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(4096),
        }
    }

    pub async fn write_message(&mut self, msg: &Message) -> Result<(), QueryError> {
        let bytes = encode_message(msg)?;
        if bytes.len() > u16::MAX as usize {
            return Err(QueryError::exchange(format!(
                "DNS message too large: {} bytes (max 65535)",
                bytes.len()
            )));
        }

        // Length prefix and body go out in a single write
        let mut frame = BytesMut::with_capacity(2 + bytes.len());
        frame.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
        frame.extend_from_slice(&bytes);

        self.stream
            .write_all(&frame)
            .await
            .map_err(|e| QueryError::exchange(format!("Failed to write DNS frame: {e}")))?;
        self.stream
            .flush()
            .await
            .map_err(|e| QueryError::exchange(format!("Failed to flush DNS frame: {e}")))
    }

    /// Check without blocking whether the stream is still usable between exchanges
    ///
    /// An idle stream has nothing to read. EOF (peer close, TLS close_notify),
    /// a read error or unsolicited bytes all mean it is broken.
    pub fn is_broken(&mut self) -> bool {
        if !self.buf.is_empty() {
            return true;
        }
        let mut probe = [0u8; 1];
        let mut read_buf = ReadBuf::new(&mut probe);
        let mut cx = Context::from_waker(Waker::noop());
        match Pin::new(&mut self.stream).poll_read(&mut cx, &mut read_buf) {
            Poll::Pending => false,
            Poll::Ready(_) => true,
        }
    }

    /// Read exactly one framed message
    ///
    /// A frame that does not decode is an error, the stream is left in an
    /// unknown state and must not be reused.
    pub async fn read_message(&mut self) -> Result<Message, QueryError> {
        loop {
            if self.buf.len() >= 2 {
                let msg_len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
                if msg_len == 0 {
                    return Err(QueryError::exchange("zero length DNS frame"));
                }
                if self.buf.len() >= 2 + msg_len {
                    let frame = self.buf.split_to(2 + msg_len);
                    return decode_message(&frame[2..]);
                }
            }

            self.buf.reserve(4096);
            let n = self
                .stream
                .read_buf(&mut self.buf)
                .await
                .map_err(|e| QueryError::exchange(format!("TCP read error: {e}")))?;
            if n == 0 {
                return Err(QueryError::exchange("connection closed by upstream (EOF)"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::question;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frame_round_trip_over_duplex() {
        let (client, server) = duplex(1024);
        let mut writer = TcpTransport::new(client);
        let mut reader = TcpTransport::new(server);

        let first = question(0x1234, "example.com.");
        let second = question(0x4321, "example.org.");
        writer.write_message(&first).await.unwrap();
        writer.write_message(&second).await.unwrap();

        // both frames may arrive in one read, they must still come out one by one
        let got = reader.read_message().await.unwrap();
        assert_eq!(got.id(), 0x1234);
        assert_eq!(got.queries()[0].name().to_ascii(), "example.com.");
        let got = reader.read_message().await.unwrap();
        assert_eq!(got.id(), 0x4321);
    }

    #[tokio::test]
    async fn test_idle_stream_health() {
        let (client, server) = duplex(64);
        let mut transport = TcpTransport::new(client);
        assert!(!transport.is_broken());

        drop(server);
        assert!(transport.is_broken());
    }

    #[tokio::test]
    async fn test_unsolicited_bytes_mark_stream_broken() {
        let (client, mut server) = duplex(64);
        let mut transport = TcpTransport::new(client);
        server.write_all(&[0, 1]).await.unwrap();

        assert!(transport.is_broken());
    }

    #[tokio::test]
    async fn test_malformed_frame_is_error() {
        let (mut client, server) = duplex(64);
        let mut reader = TcpTransport::new(server);
        client.write_all(&[0, 3, 1, 2, 3]).await.unwrap();

        let err = reader.read_message().await.unwrap_err();
        assert!(matches!(err, QueryError::Exchange(_)));
    }

    #[tokio::test]
    async fn test_truncated_frame_reports_eof() {
        let (mut client, server) = duplex(64);
        let mut reader = TcpTransport::new(server);
        client.write_all(&[0, 40, 1, 2]).await.unwrap();
        drop(client);

        let err = reader.read_message().await.unwrap_err();
        assert_eq!(
            err,
            QueryError::exchange("connection closed by upstream (EOF)")
        );
    }
}
