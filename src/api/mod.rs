// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    http::HeaderName,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    engine::AuthorizationArtifact,
    error::ErrorBody,
    models::{
        CountResponse, DecryptRequest, DecryptResponse, EncryptRequest, EncryptedInput,
        ExistsResponse, LedgerInfo, Record, RecordIdResponse, RecordIdsResponse, RecordMetadata,
        RecordSubmission, RecordUsageResponse, SignedSubmission, UserStats,
    },
    state::AppState,
};

pub mod engine;
pub mod health;
pub mod records;

const REQUEST_ID_HEADER: &str = "x-request-id";

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/ledger", get(records::ledger_info))
        .route("/records", post(records::add_record))
        .route("/records/{record_id}", get(records::get_record_metadata))
        .route("/records/{record_id}/usage", get(records::get_record_usage))
        .route("/records/{record_id}/exists", get(records::record_exists))
        .route("/owners/{owner}/records", get(records::list_user_records))
        .route(
            "/owners/{owner}/records/count",
            get(records::user_record_count),
        )
        .route(
            "/owners/{owner}/records/{index}",
            get(records::user_record_by_index),
        )
        .route("/owners/{owner}/stats", get(records::user_stats))
        .route("/engine/inputs", post(engine::encrypt_input))
        .route("/engine/decrypt", post(engine::decrypt))
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id))
                .layer(CorsLayer::permissive()),
        )
}

#[derive(OpenApi)]
#[openapi(
    paths(
        records::ledger_info,
        records::add_record,
        records::get_record_metadata,
        records::get_record_usage,
        records::record_exists,
        records::list_user_records,
        records::user_record_count,
        records::user_record_by_index,
        records::user_stats,
        engine::encrypt_input,
        engine::decrypt,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            Record,
            RecordMetadata,
            RecordSubmission,
            SignedSubmission,
            EncryptedInput,
            UserStats,
            LedgerInfo,
            RecordIdResponse,
            RecordUsageResponse,
            ExistsResponse,
            CountResponse,
            RecordIdsResponse,
            EncryptRequest,
            DecryptRequest,
            DecryptResponse,
            AuthorizationArtifact,
            ErrorBody,
            health::LedgerHealth,
            health::Liveness
        )
    ),
    tags(
        (name = "Ledger", description = "Ledger identity and totals"),
        (name = "Records", description = "Encrypted usage records"),
        (name = "Owners", description = "Per-owner record index and statistics"),
        (name = "Engine", description = "Development encryption engine"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    use crate::ledger::tests::{identity, signed_submission, signer};

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value, bool) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let has_request_id = response.headers().contains_key(REQUEST_ID_HEADER);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body, has_request_id)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn submit_and_query_over_http() {
        let state = AppState::in_memory(identity());
        let alice = signer(1);
        let submission = signed_submission(&state.engine, &alice, 15_000, 30);
        let app = router(state);

        let request = Request::builder()
            .method("POST")
            .uri("/v1/records")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&submission).unwrap()))
            .unwrap();
        let (status, body, has_request_id) = send(app.clone(), request).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["record_id"], 1);
        assert!(has_request_id);

        let (status, body, _) = send(app.clone(), get("/v1/records/1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["period"], 30);

        let owner_uri = format!("/v1/owners/{}/records?min_period=10&max_period=40", alice.address());
        let (_, body, _) = send(app.clone(), get(&owner_uri)).await;
        assert_eq!(body["record_ids"], serde_json::json!([1]));

        let (_, body, _) = send(
            app.clone(),
            get(&format!("/v1/owners/{}/stats", alice.address())),
        )
        .await;
        assert_eq!(body["total_period"], 30);
    }

    #[tokio::test]
    async fn errors_carry_codes() {
        let app = router(AppState::in_memory(identity()));

        let (status, body, _) = send(app.clone(), get("/v1/records/3/usage")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "record_not_found");

        let uri = format!("/v1/owners/{}/records/0", signer(1).address());
        let (status, body, _) = send(app, get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_code"], "index_out_of_range");
    }

    #[tokio::test]
    async fn health_and_docs_are_served() {
        let app = router(AppState::in_memory(identity()));

        let (status, body, _) = send(app.clone(), get("/health/live")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body, _) = send(app, get("/api-doc/openapi.json")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/v1/records"].is_object());
    }
}
