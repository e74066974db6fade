/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Command-line options and the process-wide runtime state

use clap::Parser;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;

pub struct Runtime {
    pub options: Options,
    /// Keeps the log writer alive until shutdown
    pub log_guard: Option<WorkerGuard>,
}

/// Command-line options for chinadns
#[derive(Parser, Clone, Debug)]
#[command(version, author = "Sven Shi <isvenshi@gmail.com>", about)]
pub struct Options {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// Log level (overrides config file): off, trace, debug, info, warn, error
    #[arg(short, long)]
    pub log_level: Option<String>,
}
