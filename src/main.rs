// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use relational_auth_engine::{
    api::router, build_engine, config::AppConfig, error::ServerError, init_tracing,
    state::AppState,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_format);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig) -> Result<(), ServerError> {
    info!(?config, "Starting auth engine");

    let shutdown = CancellationToken::new();
    let engine = build_engine(&config, shutdown.clone())?;
    if config.allowed_hosts.is_empty() {
        warn!("CLERK_ALLOWED_HOSTS is unset, return URLs trust any Host header");
    }
    let app = router(AppState::new(engine).with_allowed_hosts(config.allowed_hosts.clone()));

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(
        address = %listener.local_addr()?,
        "Auth engine listening (docs at /docs)"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C and cancels background work.
async fn shutdown_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            warn!(error = %e, "Cannot listen for Ctrl-C, graceful shutdown disabled");
            std::future::pending::<()>().await;
        }
    }
    shutdown.cancel();
}
