/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

use crate::client::{Answer, Dispatcher, Query, QueryId};
use crate::core::error::{DnsError, QueryError, Result};
use crate::network::transport::{decode_message, send_message_to_udp, MAX_UDP_PAYLOAD};
use dashmap::DashMap;
use hickory_proto::op::{Message, MessageType, OpCode, Query as DnsQuestion, ResponseCode};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Inbound transaction waiting for its answer
#[derive(Debug)]
struct PendingRequest {
    src: SocketAddr,
    /// Message ID chosen by the client
    request_id: u16,
    queries: Vec<DnsQuestion>,
}

/// UDP front end: forwards client queries through the dispatcher
pub struct UdpServer {
    socket: Arc<UdpSocket>,
    dispatcher: Dispatcher,
    pending: Arc<DashMap<QueryId, PendingRequest>>,
    next_id: AtomicU64,
}

impl UdpServer {
    pub async fn bind(listen: &str, dispatcher: Dispatcher) -> Result<UdpServer> {
        let socket = UdpSocket::bind(listen).await?;
        Ok(UdpServer {
            socket: Arc::new(socket),
            dispatcher,
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Serve until `shutdown` fires
    ///
    /// Takes the dispatcher's result and error receivers; fails if they
    /// were already taken.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let results = self
            .dispatcher
            .take_results()
            .ok_or_else(|| DnsError::runtime("dispatcher result channel already taken"))?;
        let errors = self.dispatcher.take_errors();

        tokio::spawn(respond(self.socket.clone(), self.pending.clone(), results));
        if let Some(errors) = errors {
            tokio::spawn(log_errors(errors, self.dispatcher.server_addr().to_string()));
        }

        info!(
            listen = ?self.socket.local_addr().ok(),
            upstream = %self.dispatcher.server_addr(),
            "UDP server started"
        );

        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        loop {
            let (len, src) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                res = self.socket.recv_from(&mut buf) => match res {
                    Ok(res) => res,
                    Err(e) => {
                        warn!(error = %e, "UDP receive failed");
                        continue;
                    }
                },
            };
            self.handle_datagram(&buf[..len], src).await;
        }

        info!("UDP server stopped");
        Ok(())
    }

    async fn handle_datagram(&self, bytes: &[u8], src: SocketAddr) {
        let request = match decode_message(bytes) {
            Ok(msg) if msg.message_type() == MessageType::Query => msg,
            Ok(_) => {
                debug!(%src, "Ignoring non-query message");
                return;
            }
            Err(e) => {
                debug!(%src, error = %e, "Dropping unparsable datagram");
                return;
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            %src,
            query_id = id,
            request_id = request.id(),
            question = ?request.queries().first().map(|q| q.name().to_string()),
            "Received client query"
        );
        self.pending.insert(
            id,
            PendingRequest {
                src,
                request_id: request.id(),
                queries: request.queries().to_vec(),
            },
        );

        let query = Query::new(id, request).with_deadline(Instant::now() + self.dispatcher.timeout());
        if let Err(e) = self.dispatcher.submit(query) {
            warn!(query_id = id, error = %e, "Dispatcher rejected query");
            if let Some((_, pending)) = self.pending.remove(&id) {
                reply(&self.socket, &pending, servfail(&pending)).await;
            }
        }
    }
}

/// Complete client transactions from the dispatcher's answers
async fn respond(
    socket: Arc<UdpSocket>,
    pending: Arc<DashMap<QueryId, PendingRequest>>,
    mut results: mpsc::Receiver<Answer>,
) {
    while let Some(answer) = results.recv().await {
        let Some((_, request)) = pending.remove(&answer.id) else {
            debug!(query_id = answer.id, "No pending request for answer");
            continue;
        };
        let response = match answer.into_result() {
            Ok(mut message) => {
                message.set_id(request.request_id);
                message
            }
            Err(_) => servfail(&request),
        };
        reply(&socket, &request, response).await;
    }
    debug!("Result channel closed, responder exiting");
}

async fn log_errors(mut errors: mpsc::Receiver<QueryError>, upstream: String) {
    while let Some(e) = errors.recv().await {
        warn!(upstream = %upstream, error = %e, "Upstream query error");
    }
}

fn servfail(request: &PendingRequest) -> Message {
    let mut msg = Message::new();
    msg.set_id(request.request_id)
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_recursion_available(true)
        .set_response_code(ResponseCode::ServFail);
    msg.add_queries(request.queries.clone());
    msg
}

async fn reply(socket: &UdpSocket, request: &PendingRequest, response: Message) {
    match send_message_to_udp(socket, &response, request.src).await {
        Ok(_) => debug!(
            dst = %request.src,
            request_id = request.request_id,
            rcode = ?response.response_code(),
            "Sent response"
        ),
        Err(e) => warn!(dst = %request.src, error = %e, "Failed to send response"),
    }
}
