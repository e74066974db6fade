/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! DNS transport helpers for datagram and stream oriented protocols.
//!
//! Converts between Hickory `Message` and wire bytes. Stream framing
//! (2-byte length prefix) lives in [`tcp_transport`].

use crate::core::error::QueryError;
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use std::net::SocketAddr;
use tokio::net::UdpSocket;

pub mod tcp_transport;

/// Largest datagram accepted from upstreams and clients
///
/// EDNS answers may exceed 512 bytes by far, so room for a full UDP payload
/// is kept and nothing is ever truncated on receive.
pub const MAX_UDP_PAYLOAD: usize = 65535;

/// Serialize a DNS message to wire format
pub fn encode_message(msg: &Message) -> Result<Vec<u8>, QueryError> {
    msg.to_bytes()
        .map_err(|e| QueryError::exchange(format!("Failed to serialize DNS message: {e}")))
}

/// Parse a DNS message from wire format
pub fn decode_message(buf: &[u8]) -> Result<Message, QueryError> {
    Message::from_bytes(buf)
        .map_err(|e| QueryError::exchange(format!("Invalid DNS message: {e}")))
}

/// Serialize DNS Message and send it on a connected UDP socket.
pub async fn send_message_udp(socket: &UdpSocket, msg: &Message) -> Result<usize, QueryError> {
    let bytes = encode_message(msg)?;
    socket
        .send(&bytes)
        .await
        .map_err(|e| QueryError::exchange(format!("Failed to send UDP datagram: {e}")))
}

/// Receive one datagram on a connected UDP socket and decode it.
pub async fn recv_message_udp(socket: &UdpSocket, buf: &mut [u8]) -> Result<Message, QueryError> {
    let len = socket
        .recv(buf)
        .await
        .map_err(|e| QueryError::exchange(format!("Failed to recv UDP datagram: {e}")))?;
    decode_message(&buf[..len])
}

/// Serialize DNS Message and send it to a specific peer.
pub async fn send_message_to_udp(
    socket: &UdpSocket,
    msg: &Message,
    to: SocketAddr,
) -> Result<usize, QueryError> {
    let bytes = encode_message(msg)?;
    socket
        .send_to(&bytes, to)
        .await
        .map_err(|e| QueryError::exchange(format!("Failed to send_to UDP: {e}")))
}
