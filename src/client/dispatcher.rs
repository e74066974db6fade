/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Query dispatcher
//!
//! `submit` never blocks: it spawns one worker per query and returns. A
//! worker waits for a concurrency permit, borrows a pooled connection, runs
//! a single exchange and delivers the [`Answer`]. The permit is held until
//! delivery finishes, so a slow consumer also slows down upstream traffic.

use crate::client::shutdown::{Outlets, ShutdownBarrier};
use crate::client::{Answer, DispatcherOptions, Query};
use crate::core::error::{DnsError, QueryError, Result};
use crate::network::upstream::UpstreamConfig;
use crate::network::upstream::pool::pool_reuse::ReusePool;
use crate::network::upstream::pool::ConnectionPool;
use hickory_proto::op::Message;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Concurrent DNS client for one upstream resolver
///
/// Cheap to clone; clones share the same workers, pool and channels.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    server_addr: String,
    timeout: Duration,
    pool: Arc<dyn ConnectionPool>,
    in_flight: Arc<AtomicU32>,
    permits: Arc<Semaphore>,
    barrier: ShutdownBarrier,
    results: Mutex<Option<mpsc::Receiver<Answer>>>,
    errors: Mutex<Option<mpsc::Receiver<QueryError>>>,
    handle: Handle,
}

/// Decrements the in-flight counter when a worker ends, however it ends
struct InFlightGuard(Arc<AtomicU32>);

impl InFlightGuard {
    fn enter(counter: Arc<AtomicU32>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Dispatcher {
    /// Validate the configuration and set up the pool and channels
    ///
    /// Must be called from within a tokio runtime; workers are spawned on it.
    pub fn new(upstream: UpstreamConfig, options: DispatcherOptions) -> Result<Dispatcher> {
        upstream.validate()?;
        options.validate()?;

        let handle = Handle::try_current()
            .map_err(|e| DnsError::runtime(format!("Dispatcher needs a tokio runtime: {}", e)))?;

        let pool: Arc<dyn ConnectionPool> = ReusePool::new(
            options.max_idle_conns,
            options.idle_timeout(),
            upstream.connection_builder(),
        );

        let (results_tx, results_rx) = mpsc::channel(options.result_capacity);
        let (errors_tx, errors_rx) = mpsc::channel(options.error_capacity);

        info!(
            upstream = %upstream.remote_addr,
            net = %upstream.net,
            max_concurrency = options.max_concurrency,
            result_capacity = options.result_capacity,
            error_capacity = options.error_capacity,
            "Dispatcher created"
        );

        Ok(Dispatcher {
            inner: Arc::new(Inner {
                timeout: upstream.timeout(),
                server_addr: upstream.remote_addr,
                pool,
                in_flight: Arc::new(AtomicU32::new(0)),
                permits: Arc::new(Semaphore::new(options.max_concurrency)),
                barrier: ShutdownBarrier::new(Outlets {
                    results: results_tx,
                    errors: errors_tx,
                }),
                results: Mutex::new(Some(results_rx)),
                errors: Mutex::new(Some(errors_rx)),
                handle,
            }),
        })
    }

    /// Queue a query for resolution
    ///
    /// Returns immediately. The outcome arrives on the result channel as an
    /// [`Answer`] carrying `query.id`.
    pub fn submit(&self, query: Query) -> std::result::Result<(), QueryError> {
        if self.inner.barrier.is_stopped() {
            return Err(QueryError::Stopped);
        }

        let guard = InFlightGuard::enter(self.inner.in_flight.clone());
        let inner = self.inner.clone();
        self.inner.handle.spawn(async move {
            inner.run(query).await;
            drop(guard);
        });
        Ok(())
    }

    /// Number of queries submitted but not yet completed
    pub fn concurrency(&self) -> u32 {
        self.inner.in_flight.load(Ordering::Acquire)
    }

    /// Receiver for answers; available once
    pub fn take_results(&self) -> Option<mpsc::Receiver<Answer>> {
        self.inner.results.lock().ok().and_then(|mut rx| rx.take())
    }

    /// Receiver for raw per-query errors; available once
    pub fn take_errors(&self) -> Option<mpsc::Receiver<QueryError>> {
        self.inner.errors.lock().ok().and_then(|mut rx| rx.take())
    }

    pub fn server_addr(&self) -> &str {
        &self.inner.server_addr
    }

    /// Configured upstream dial and exchange timeout
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Stop accepting queries, close both channels and the pool
    ///
    /// Waits for workers that are in the middle of delivering. Returns `true`
    /// for the call that performed the shutdown, `false` for every other call.
    pub async fn stop(&self) -> bool {
        if !self.inner.barrier.close().await {
            return false;
        }
        self.inner.pool.close();
        info!(
            in_flight = self.concurrency(),
            upstream = %self.inner.server_addr,
            "Dispatcher stopped"
        );
        true
    }
}

impl Inner {
    async fn run(&self, query: Query) {
        let (result, permit) = match self.acquire_permit(&query).await {
            Ok(permit) => (self.resolve(&query).await, Some(permit)),
            Err(e) => (Err(e), None),
        };

        let answer = match result {
            Ok(message) => Answer::success(query.id, &self.server_addr, message),
            Err(e) => {
                // surfaced to the caller on the error channel
                debug!(
                    query_id = query.id,
                    upstream = %self.server_addr,
                    transport = e.is_transport(),
                    error = %e,
                    "Query failed"
                );
                Answer::failure(query.id, &self.server_addr, e)
            }
        };
        self.deliver(answer).await;
        drop(permit);
    }

    async fn acquire_permit(
        &self,
        query: &Query,
    ) -> std::result::Result<OwnedSemaphorePermit, QueryError> {
        self.interruptible(query, async {
            self.permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| QueryError::Stopped)
        })
        .await
    }

    /// One exchange on a pooled connection
    async fn resolve(&self, query: &Query) -> std::result::Result<Message, QueryError> {
        let mut conn = self.interruptible(query, self.pool.get()).await?;

        match self
            .interruptible(query, conn.exchange(&query.question))
            .await
        {
            Ok(response) => {
                self.pool.put(conn);
                Ok(response)
            }
            Err(e) => {
                debug!(conn_id = conn.id(), query_id = query.id, "Discarding connection after failed exchange");
                self.pool.discard(conn);
                Err(e)
            }
        }
    }

    /// Race `fut` against shutdown, the query's token and its deadline
    async fn interruptible<T, F>(&self, query: &Query, fut: F) -> std::result::Result<T, QueryError>
    where
        F: Future<Output = std::result::Result<T, QueryError>>,
    {
        let cancelled = async {
            match &query.cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let deadline = async {
            match query.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.barrier.token().cancelled() => Err(QueryError::Stopped),
            _ = cancelled => Err(QueryError::Cancelled),
            _ = deadline => Err(QueryError::DeadlineExceeded),
            res = fut => res,
        }
    }

    async fn deliver(&self, answer: Answer) {
        let Some(outlets) = self.barrier.outlets().await else {
            debug!(query_id = answer.id, "Dispatcher stopped, dropping answer");
            return;
        };

        if let Some(e) = &answer.error {
            if *e != QueryError::Stopped {
                report(&outlets, e.clone());
            }
        }

        match outlets.results.try_send(answer) {
            Ok(()) => {}
            Err(TrySendError::Full(answer)) => {
                warn!(query_id = answer.id, "Result channel is full, waiting for the consumer");
                report(&outlets, QueryError::ChannelFull);
                let query_id = answer.id;
                tokio::select! {
                    biased;
                    _ = self.barrier.token().cancelled() => {
                        debug!(query_id, "Dispatcher stopping, dropping pending answer");
                    }
                    res = outlets.results.send(answer) => {
                        if res.is_err() {
                            debug!(query_id, "Result receiver dropped");
                        }
                    }
                }
            }
            Err(TrySendError::Closed(answer)) => {
                debug!(query_id = answer.id, "Result receiver dropped");
            }
        }
    }
}

/// Push a raw error on the side channel, dropping it when the channel is full
fn report(outlets: &Outlets, error: QueryError) {
    if let Err(e) = outlets.errors.try_send(error) {
        debug!(error = %e.into_inner(), "Error channel unavailable, dropping error");
    }
}
