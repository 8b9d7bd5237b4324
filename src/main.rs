// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use encrypted_power_log::{
    api::router,
    config::NodeConfig,
    engine::LocalEngine,
    ledger::RecordLedger,
    state::AppState,
    telemetry,
};

#[tokio::main]
async fn main() {
    let config = NodeConfig::from_env();
    telemetry::init(config.log_format);

    let identity = config.ledger_identity();
    if let Some(dir) = &config.data_dir {
        std::fs::create_dir_all(dir).expect("Failed to create data directory");
    }

    let engine = match config.engine_path() {
        Some(path) => {
            LocalEngine::open(identity.chain_id, &path).expect("Failed to open engine store")
        }
        None => LocalEngine::new(identity.chain_id),
    };
    let engine = Arc::new(
        engine
            .with_authorization_ttl(config.authorization_ttl)
            .with_pending_limits(config.pending_input_capacity, config.pending_input_ttl),
    );

    let (ledger, ledger_path) = match config.ledger_path() {
        Some(path) => {
            let ledger = RecordLedger::open(identity, engine.clone(), &path)
                .expect("Failed to open ledger database");
            (ledger, Some(path))
        }
        None => {
            info!("DATA_DIR not set, ledger is memory-only");
            (RecordLedger::new(identity, engine.clone()), None)
        }
    };

    let mut state = AppState::new(Arc::new(ledger), engine);
    if let Some(path) = ledger_path {
        state = state.with_ledger_path(path);
    }
    let app = router(state);

    let listener = TcpListener::bind(config.bind_addr())
        .await
        .expect("Failed to bind listen address");

    info!(
        addr = %config.bind_addr(),
        chain_id = identity.chain_id,
        contract = %identity.contract,
        "Power ledger node listening (docs at /docs)"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .expect("HTTP server failed");

    info!("Power ledger node stopped");
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    shutdown.cancel();
}
