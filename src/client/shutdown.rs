/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! One-time shutdown of the dispatcher's output channels
//!
//! Workers hold a shared stake on the channel senders for as long as they
//! deliver; `close` takes the exclusive stake and drops the senders. Since
//! the senders live only inside the lock, nothing can send once they are gone.

use crate::client::Answer;
use crate::core::error::QueryError;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Sending halves of the result and error channels
#[derive(Debug)]
pub(crate) struct Outlets {
    pub results: mpsc::Sender<Answer>,
    pub errors: mpsc::Sender<QueryError>,
}

#[derive(Debug)]
pub(crate) struct ShutdownBarrier {
    outlets: RwLock<Option<Outlets>>,
    stopped: AtomicBool,
    token: CancellationToken,
}

impl ShutdownBarrier {
    pub fn new(outlets: Outlets) -> Self {
        Self {
            outlets: RwLock::new(Some(outlets)),
            stopped: AtomicBool::new(false),
            token: CancellationToken::new(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Fires when shutdown begins
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Take a shared stake on the senders, `None` once they are closed
    pub async fn outlets(&self) -> Option<RwLockReadGuard<'_, Outlets>> {
        RwLockReadGuard::try_map(self.outlets.read().await, |outlets| outlets.as_ref()).ok()
    }

    /// Close both channels
    ///
    /// Returns `true` only for the call that actually closed them. Cancels the
    /// token first so that blocked workers let go of their stakes.
    pub async fn close(&self) -> bool {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.token.cancel();
        let mut outlets = self.outlets.write().await;
        drop(outlets.take());
        debug!("Result and error channels closed");
        true
    }
}
