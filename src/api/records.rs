// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Record ledger endpoints.

use alloy::primitives::Address;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    error::{ApiError, ErrorBody},
    models::{
        CountResponse, ExistsResponse, LedgerInfo, RecordId, RecordIdResponse, RecordIdsResponse,
        RecordMetadata, RecordUsageResponse, SignedSubmission, UserStats,
    },
    state::AppState,
};

/// Optional period filter for an owner's record list.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PeriodRangeQuery {
    /// Smallest period to include (inclusive).
    pub min_period: Option<u32>,
    /// Largest period to include (inclusive).
    pub max_period: Option<u32>,
}

#[utoipa::path(
    get,
    path = "/v1/ledger",
    tag = "Ledger",
    responses((status = 200, body = LedgerInfo))
)]
pub async fn ledger_info(State(state): State<AppState>) -> Json<LedgerInfo> {
    let identity = state.ledger.identity();
    Json(LedgerInfo {
        contract: identity.contract,
        chain_id: identity.chain_id,
        total_records: state.ledger.total_records(),
    })
}

#[utoipa::path(
    post,
    path = "/v1/records",
    request_body = SignedSubmission,
    tag = "Records",
    responses(
        (status = 201, body = RecordIdResponse),
        (status = 400, description = "Period outside 1..=365", body = ErrorBody),
        (status = 403, description = "Signature does not match owner", body = ErrorBody),
        (status = 422, description = "Encrypted input rejected", body = ErrorBody)
    )
)]
pub async fn add_record(
    State(state): State<AppState>,
    Json(request): Json<SignedSubmission>,
) -> Result<(StatusCode, Json<RecordIdResponse>), ApiError> {
    let record_id = state.ledger.add_record(&request)?;
    Ok((StatusCode::CREATED, Json(RecordIdResponse { record_id })))
}

#[utoipa::path(
    get,
    path = "/v1/records/{record_id}",
    params(("record_id" = u64, Path, description = "Record id")),
    tag = "Records",
    responses(
        (status = 200, body = RecordMetadata),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn get_record_metadata(
    State(state): State<AppState>,
    Path(record_id): Path<RecordId>,
) -> Result<Json<RecordMetadata>, ApiError> {
    Ok(Json(state.ledger.record_metadata(record_id)?))
}

#[utoipa::path(
    get,
    path = "/v1/records/{record_id}/usage",
    params(("record_id" = u64, Path, description = "Record id")),
    tag = "Records",
    responses(
        (status = 200, body = RecordUsageResponse),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn get_record_usage(
    State(state): State<AppState>,
    Path(record_id): Path<RecordId>,
) -> Result<Json<RecordUsageResponse>, ApiError> {
    let usage = state.ledger.record_usage(record_id)?;
    Ok(Json(RecordUsageResponse { usage }))
}

#[utoipa::path(
    get,
    path = "/v1/records/{record_id}/exists",
    params(("record_id" = u64, Path, description = "Record id")),
    tag = "Records",
    responses((status = 200, body = ExistsResponse))
)]
pub async fn record_exists(
    State(state): State<AppState>,
    Path(record_id): Path<RecordId>,
) -> Json<ExistsResponse> {
    Json(ExistsResponse {
        exists: state.ledger.record_exists(record_id),
    })
}

#[utoipa::path(
    get,
    path = "/v1/owners/{owner}/records",
    params(
        ("owner" = String, Path, description = "Owner address"),
        PeriodRangeQuery
    ),
    tag = "Owners",
    responses((status = 200, body = RecordIdsResponse))
)]
pub async fn list_user_records(
    State(state): State<AppState>,
    Path(owner): Path<Address>,
    Query(range): Query<PeriodRangeQuery>,
) -> Json<RecordIdsResponse> {
    let record_ids = match (range.min_period, range.max_period) {
        (None, None) => state.ledger.user_records(&owner),
        (min, max) => state.ledger.user_records_in_period_range(
            &owner,
            min.unwrap_or(0),
            max.unwrap_or(u32::MAX),
        ),
    };
    Json(RecordIdsResponse { record_ids })
}

#[utoipa::path(
    get,
    path = "/v1/owners/{owner}/records/count",
    params(("owner" = String, Path, description = "Owner address")),
    tag = "Owners",
    responses((status = 200, body = CountResponse))
)]
pub async fn user_record_count(
    State(state): State<AppState>,
    Path(owner): Path<Address>,
) -> Json<CountResponse> {
    Json(CountResponse {
        count: state.ledger.user_record_count(&owner),
    })
}

#[utoipa::path(
    get,
    path = "/v1/owners/{owner}/records/{index}",
    params(
        ("owner" = String, Path, description = "Owner address"),
        ("index" = u64, Path, description = "Zero-based position in the owner's records")
    ),
    tag = "Owners",
    responses(
        (status = 200, body = RecordIdResponse),
        (status = 404, body = ErrorBody)
    )
)]
pub async fn user_record_by_index(
    State(state): State<AppState>,
    Path((owner, index)): Path<(Address, u64)>,
) -> Result<Json<RecordIdResponse>, ApiError> {
    let record_id = state.ledger.user_record_by_index(&owner, index)?;
    Ok(Json(RecordIdResponse { record_id }))
}

#[utoipa::path(
    get,
    path = "/v1/owners/{owner}/stats",
    params(("owner" = String, Path, description = "Owner address")),
    tag = "Owners",
    responses((status = 200, body = UserStats))
)]
pub async fn user_stats(
    State(state): State<AppState>,
    Path(owner): Path<Address>,
) -> Json<UserStats> {
    Json(state.ledger.user_stats(&owner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::{identity, signed_submission, signer};
    use crate::ledger::LedgerError;

    async fn submit(state: &AppState, key: u8, usage: u32, period: u32) -> RecordId {
        let submission = signed_submission(&state.engine, &signer(key), usage, period);
        let (status, Json(response)) = add_record(State(state.clone()), Json(submission))
            .await
            .expect("record accepted");
        assert_eq!(status, StatusCode::CREATED);
        response.record_id
    }

    #[tokio::test]
    async fn add_record_then_read_back() {
        let state = AppState::in_memory(identity());
        let id = submit(&state, 1, 15_000, 1).await;
        assert_eq!(id, 1);

        let Json(meta) = get_record_metadata(State(state.clone()), Path(id))
            .await
            .unwrap();
        assert_eq!(meta.owner, signer(1).address());
        assert_eq!(meta.period, 1);

        let Json(exists) = record_exists(State(state.clone()), Path(id)).await;
        assert!(exists.exists);

        let Json(info) = ledger_info(State(state.clone())).await;
        assert_eq!(info.total_records, 1);
        assert_eq!(info.contract, identity().contract);
    }

    #[tokio::test]
    async fn invalid_period_is_bad_request() {
        let state = AppState::in_memory(identity());
        let submission = signed_submission(&state.engine, &signer(1), 100, 0);

        let err = add_record(State(state.clone()), Json(submission))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.ledger_error, Some(LedgerError::InvalidPeriod(0)));
    }

    #[tokio::test]
    async fn owner_queries() {
        let state = AppState::in_memory(identity());
        for (key, period) in [(1, 1), (2, 5), (1, 3), (1, 9)] {
            submit(&state, key, 100, period).await;
        }
        let alice = signer(1).address();

        let Json(all) =
            list_user_records(State(state.clone()), Path(alice), Query(PeriodRangeQuery::default()))
                .await;
        assert_eq!(all.record_ids, vec![1, 3, 4]);

        let Json(ranged) = list_user_records(
            State(state.clone()),
            Path(alice),
            Query(PeriodRangeQuery {
                min_period: Some(2),
                max_period: Some(9),
            }),
        )
        .await;
        assert_eq!(ranged.record_ids, vec![3, 4]);

        let Json(lower_only) = list_user_records(
            State(state.clone()),
            Path(alice),
            Query(PeriodRangeQuery {
                min_period: Some(4),
                max_period: None,
            }),
        )
        .await;
        assert_eq!(lower_only.record_ids, vec![4]);

        let Json(count) = user_record_count(State(state.clone()), Path(alice)).await;
        assert_eq!(count.count, 3);

        let Json(second) = user_record_by_index(State(state.clone()), Path((alice, 1)))
            .await
            .unwrap();
        assert_eq!(second.record_id, 3);

        let err = user_record_by_index(State(state.clone()), Path((alice, 3)))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let Json(stats) = user_stats(State(state.clone()), Path(alice)).await;
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.total_period, 13);
    }

    #[tokio::test]
    async fn missing_record_is_not_found() {
        let state = AppState::in_memory(identity());
        let err = get_record_usage(State(state.clone()), Path(5))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.error_code, "record_not_found");

        let Json(exists) = record_exists(State(state), Path(0)).await;
        assert!(!exists.exists);
    }
}
