/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! chinadns entry point
//!
//! Loads the configuration, starts the UDP listener in front of the
//! dispatcher and shuts both down on Ctrl+C.

use tokio::{runtime, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use chinadns::client::Dispatcher;
use chinadns::core::error::{DnsError, Result};
use chinadns::server::UdpServer;

fn main() -> Result<()> {
    init_runtime()
}

/// Build the multi-threaded Tokio runtime and run the application on it
fn init_runtime() -> Result<()> {
    let mut tokio_runtime = runtime::Builder::new_multi_thread();
    tokio_runtime.enable_all().thread_name("chinadns-worker");
    let tokio_runtime = tokio_runtime
        .build()
        .map_err(|err| DnsError::runtime(format!("Failed to initialize Tokio runtime: {err}")))?;
    tokio_runtime.block_on(run_async_main())
}

async fn run_async_main() -> Result<()> {
    let mut runtime = chinadns::core::init();
    let options = runtime.options.clone();

    let config = match chinadns::config::init(&options.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration initialization failed: {}", e);
            std::process::exit(1);
        }
    };

    let mut log_config = config.log.clone();
    if let Some(level) = options.log_level {
        log_config.level = level;
    }
    runtime.log_guard = Some(chinadns::core::init_log(log_config));
    info!("chinadns initializing...");

    let dispatcher = match Dispatcher::new(config.upstream, config.dispatcher) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            error!("Dispatcher initialization failed: {}", e);
            std::process::exit(1);
        }
    };
    let server = UdpServer::bind(&config.listen, dispatcher.clone()).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C signal, initiating graceful shutdown"),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
            shutdown.cancel();
        }
    });

    let served = server.run(shutdown).await;
    dispatcher.stop().await;
    info!("Graceful shutdown complete");
    served
}
