/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Process-level setup: command line, logging and the error types

use crate::config::types::LogConfig;
use crate::core::log::ChinaDnsLogFormatter;
use crate::core::runtime::{Options, Runtime};
use clap::Parser;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

pub mod error;
mod log;
pub mod runtime;

/// Parse the command line
pub fn init() -> Runtime {
    Runtime {
        options: Options::parse(),
        log_guard: None,
    }
}

/// Install the global subscriber
///
/// Logs go to stdout and, when `log.file` is set, to that file as well. The
/// returned guard must be kept alive so buffered lines are flushed on exit.
pub fn init_log(log: LogConfig) -> WorkerGuard {
    let (file_writer, guard) = match log.file.as_deref().map(Path::new) {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path.file_name().unwrap_or_else(|| "chinadns.log".as_ref());
            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (Some(non_blocking), guard)
        }
        // nothing to flush without a file, hand out a guard for a sink
        None => (None, tracing_appender::non_blocking(std::io::sink()).1),
    };

    let console_layer = fmt::layer()
        .event_format(ChinaDnsLogFormatter)
        .with_writer(std::io::stdout);

    let file_layer = file_writer.map(|writer| {
        fmt::layer()
            .event_format(ChinaDnsLogFormatter)
            .with_ansi(false)
            .with_writer(writer)
    });

    let filter = EnvFilter::try_new(&log.level).unwrap_or_else(|_| EnvFilter::new("info"));

    Registry::default()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    guard
}
