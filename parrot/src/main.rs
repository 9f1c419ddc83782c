// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::too_many_arguments, clippy::new_without_default)]

//! Entry point for the `parrot` binary (§6 of the spec): loads configuration, wires up
//! an `HttpEngineClient`-backed `PCore`, and serves the OS HTTP surface over axum.

mod error;
mod http;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use config::{Cli, Config, Constants};
use engine_client::HttpEngineClient;
use log::info;
use pcore::PCore;
use task_executor::Executor;

const ENGINE_MAX_ATTEMPTS: usize = 5;
const ENGINE_INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const WORKER_THREADS: usize = 4;
const MAX_BLOCKING_THREADS: usize = 512;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = Config::load(&cli).unwrap_or_else(|e| {
        log::error!("failed to load configuration: {e}");
        std::process::exit(1);
    });

    let executor = Executor::new_owned(WORKER_THREADS, MAX_BLOCKING_THREADS).unwrap_or_else(|e| {
        log::error!("failed to start the runtime: {e}");
        std::process::exit(1);
    });

    let engine_client = Arc::new(HttpEngineClient::new(ENGINE_MAX_ATTEMPTS, ENGINE_INITIAL_BACKOFF));
    let core = Arc::new(PCore::new(&config, engine_client, executor.to_borrowed()));

    let loop_handle = executor.native_spawn({
        let core = core.clone();
        async move { core.run(Constants::OS_LOOP_INTERVAL).await }
    });

    let bind_addr: SocketAddr = format!("{}:{}", config.os.host, config.os.port)
        .parse()
        .unwrap_or_else(|e| {
            log::error!("invalid host/port {}:{}: {e}", config.os.host, config.os.port);
            std::process::exit(1);
        });
    let listener = std::net::TcpListener::bind(bind_addr).unwrap_or_else(|e| {
        log::error!("failed to bind {bind_addr}: {e}");
        std::process::exit(1);
    });

    info!("parrot listening on {bind_addr}");
    let app = http::router(core);

    executor.block_on(async {
        let serve = axum_server::from_tcp(listener)
            .expect("unable to create server from std::net::TcpListener")
            .serve(app.into_make_service());

        tokio::select! {
            result = serve => {
                if let Err(e) = result {
                    log::error!("server exited with an error: {e}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
            }
        }
    });

    loop_handle.abort();
    executor.shutdown(SHUTDOWN_TIMEOUT);
}
