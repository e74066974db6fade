/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! chinadns - concurrent DNS forwarding client
//!
//! Resolves DNS queries against a single upstream resolver reached over UDP,
//! TCP or DoT. Every query runs on its own worker, upstream connections are
//! pooled and reused, and answers come back on a bounded channel correlated
//! by a caller-assigned ID.

pub mod client;
pub mod config;
pub mod core;
pub mod network;
pub mod server;
#[cfg(test)]
mod testing;
