/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Test helpers: local mock upstreams and an in-memory connection builder

use crate::core::error::QueryError;
use crate::network::transport::tcp_transport::TcpTransport;
use crate::network::transport::{decode_message, encode_message, MAX_UDP_PAYLOAD};
use crate::network::upstream::pool::{Connection, ConnectionBuilder};
use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, OpCode, Query as DnsQuestion, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, Record, RecordType};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::time::Instant;

/// Build an A question for `name`
pub fn question(id: u16, name: &str) -> Message {
    let mut msg = Message::new();
    msg.set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true);
    msg.add_query(DnsQuestion::query(
        Name::from_ascii(name).unwrap(),
        RecordType::A,
    ));
    msg
}

/// Answer every question with a fixed A record
pub fn answer_for(request: &Message) -> Message {
    answer_with(request, 1)
}

/// Answer every question with `records` A records
pub fn answer_with(request: &Message, records: usize) -> Message {
    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(request.recursion_desired())
        .set_recursion_available(true)
        .set_response_code(ResponseCode::NoError);
    for query in request.queries() {
        response.add_query(query.clone());
        for i in 0..records {
            let rdata = if records == 1 {
                A::new(93, 184, 216, 34)
            } else {
                A::new(10, 0, (i / 256) as u8, (i % 256) as u8)
            };
            response.add_answer(Record::from_rdata(query.name().clone(), 300, RData::A(rdata)));
        }
    }
    response
}

/// UDP upstream that answers every query
pub async fn spawn_udp_upstream() -> SocketAddr {
    spawn_udp_upstream_with(1, 1).await
}

/// UDP upstream sending each reply `copies` times, with `records` answers
pub async fn spawn_udp_upstream_with(copies: usize, records: usize) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                break;
            };
            if let Ok(request) = decode_message(&buf[..len]) {
                let bytes = encode_message(&answer_with(&request, records)).unwrap();
                for _ in 0..copies {
                    let _ = socket.send_to(&bytes, peer).await;
                }
            }
        }
    });
    addr
}

/// UDP upstream that reads queries and never replies
pub async fn spawn_silent_udp_upstream() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
        while socket.recv_from(&mut buf).await.is_ok() {}
    });
    addr
}

pub struct TcpUpstream {
    pub addr: SocketAddr,
    /// Number of accepted connections
    pub accepted: Arc<AtomicUsize>,
}

/// TCP upstream answering with the standard framing
///
/// With `per_conn = Some(n)` each connection is closed after `n` answers.
pub async fn spawn_tcp_upstream(per_conn: Option<usize>) -> TcpUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut transport = TcpTransport::new(stream);
                let mut served = 0usize;
                while let Ok(request) = transport.read_message().await {
                    if transport.write_message(&answer_for(&request)).await.is_err() {
                        break;
                    }
                    served += 1;
                    if per_conn.is_some_and(|n| served >= n) {
                        break;
                    }
                }
            });
        }
    });
    TcpUpstream { addr, accepted }
}

/// An address on which nothing listens
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Shared counters for [`MockBuilder`]
#[derive(Debug, Default)]
pub struct MockBuilderState {
    dialed: AtomicUsize,
    closed: AtomicUsize,
    fail_dial: AtomicBool,
}

impl MockBuilderState {
    pub fn dialed(&self) -> usize {
        self.dialed.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_dial(&self, fail: bool) {
        self.fail_dial.store(fail, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MockBuilder {
    state: Arc<MockBuilderState>,
}

impl MockBuilder {
    pub fn new() -> (Self, Arc<MockBuilderState>) {
        let state = Arc::new(MockBuilderState::default());
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }
}

#[async_trait]
impl ConnectionBuilder for MockBuilder {
    async fn create_connection(&self, conn_id: u16) -> Result<Box<dyn Connection>, QueryError> {
        if self.state.fail_dial.load(Ordering::SeqCst) {
            return Err(QueryError::dial("mock", "refused"));
        }
        self.state.dialed.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            id: conn_id,
            closed: false,
            last_used: Instant::now(),
            state: self.state.clone(),
        }))
    }
}

/// In-memory connection that answers locally
#[derive(Debug)]
pub struct MockConnection {
    id: u16,
    closed: bool,
    last_used: Instant,
    state: Arc<MockBuilderState>,
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> u16 {
        self.id
    }

    async fn exchange(&mut self, request: &Message) -> Result<Message, QueryError> {
        if self.closed {
            return Err(QueryError::exchange("closed"));
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.last_used = Instant::now();
        Ok(answer_for(request))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn available(&self) -> bool {
        !self.closed
    }

    fn last_used(&self) -> Instant {
        self.last_used
    }
}
