// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Liveness and readiness probes.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::AppState;

/// Liveness body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Liveness {
    pub status: String,
}

/// State of the ledger as seen by the readiness probe.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LedgerHealth {
    /// `"ok"` when the ledger can serve requests, `"degraded"` otherwise.
    pub status: String,
    pub chain_id: u64,
    pub total_records: u64,
    /// Whether records survive a restart.
    pub persistent: bool,
    /// `"ok"` or `"missing"`; omitted for memory-only ledgers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

fn ledger_health(state: &AppState) -> LedgerHealth {
    let database = state
        .ledger_path
        .as_ref()
        .map(|path| if path.is_file() { "ok" } else { "missing" }.to_string());
    let healthy = database.as_deref().is_none_or(|db| db == "ok");

    LedgerHealth {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        chain_id: state.ledger.identity().chain_id,
        total_records: state.ledger.total_records(),
        persistent: database.is_some(),
        database,
    }
}

/// Ledger health, 503 when its database file has disappeared.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Ledger is serving", body = LedgerHealth),
        (status = 503, description = "Ledger database unavailable", body = LedgerHealth)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<LedgerHealth>) {
    let report = ledger_health(&state);
    let status = match report.status.as_str() {
        "ok" => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(report))
}

#[utoipa::path(
    get,
    path = "/health/live",
    tag = "Health",
    responses((status = 200, description = "Process is up", body = Liveness))
)]
pub async fn liveness() -> Json<Liveness> {
    Json(Liveness {
        status: "ok".into(),
    })
}

/// Same checks as [`health`], under the conventional readiness path.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Ready for traffic", body = LedgerHealth),
        (status = 503, description = "Not ready", body = LedgerHealth)
    )
)]
pub async fn readiness(state: State<AppState>) -> (StatusCode, Json<LedgerHealth>) {
    health(state).await
}
