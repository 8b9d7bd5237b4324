// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Development engine endpoints.
//!
//! Lets remote clients encrypt inputs the ledger will accept and decrypt
//! ciphertexts with a signed authorization, without a real coprocessor.

use axum::{extract::State, Json};

use crate::{
    error::{ApiError, ErrorBody},
    models::{DecryptRequest, DecryptResponse, EncryptRequest, EncryptedInput},
    state::AppState,
};

#[utoipa::path(
    post,
    path = "/v1/engine/inputs",
    request_body = EncryptRequest,
    tag = "Engine",
    responses((status = 200, body = EncryptedInput))
)]
pub async fn encrypt_input(
    State(state): State<AppState>,
    Json(request): Json<EncryptRequest>,
) -> Json<EncryptedInput> {
    Json(
        state
            .engine
            .encrypt_value(request.contract, request.account, request.value),
    )
}

#[utoipa::path(
    post,
    path = "/v1/engine/decrypt",
    request_body = DecryptRequest,
    tag = "Engine",
    responses(
        (status = 200, body = DecryptResponse),
        (status = 403, description = "Authorization refused", body = ErrorBody),
        (status = 404, description = "Unknown ciphertext", body = ErrorBody)
    )
)]
pub async fn decrypt(
    State(state): State<AppState>,
    Json(request): Json<DecryptRequest>,
) -> Result<Json<DecryptResponse>, ApiError> {
    let value = state
        .engine
        .decrypt_value(request.handle, request.contract, &request.artifact)?;
    Ok(Json(DecryptResponse { value }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{AuthorizationArtifact, EngineHandle};
    use crate::ledger::tests::{identity, signer, CONTRACT};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn encrypt_then_decrypt_over_handlers() {
        let state = AppState::in_memory(identity());
        let alice = signer(1);

        let Json(input) = encrypt_input(
            State(state.clone()),
            Json(EncryptRequest {
                contract: CONTRACT,
                account: alice.address(),
                value: 2_550,
            }),
        )
        .await;

        let artifact = state
            .engine
            .create_authorization(CONTRACT, alice.address(), &alice)
            .await
            .unwrap();
        let Json(response) = decrypt(
            State(state.clone()),
            Json(DecryptRequest {
                handle: input.handle,
                contract: CONTRACT,
                artifact,
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.value, 2_550);
    }

    #[tokio::test]
    async fn foreign_authorization_is_forbidden() {
        let state = AppState::in_memory(identity());
        let alice = signer(1);
        let bob = signer(2);
        let input = state.engine.encrypt_value(CONTRACT, alice.address(), 10);

        let artifact: AuthorizationArtifact = state
            .engine
            .create_authorization(CONTRACT, bob.address(), &bob)
            .await
            .unwrap();
        let err = decrypt(
            State(state),
            Json(DecryptRequest {
                handle: input.handle,
                contract: CONTRACT,
                artifact,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.error_code, "unauthorized");
    }
}
