// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP error responses.
//!
//! Every failure leaves a handler as an [`ApiError`] and is rendered as an
//! [`ErrorBody`]. Ledger failures keep the original [`LedgerError`] so remote
//! clients can rebuild it exactly.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::engine::EngineError;
use crate::ledger::LedgerError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error_code: &'static str,
    pub message: String,
    pub ledger_error: Option<LedgerError>,
}

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    /// Stable snake_case code, e.g. `record_not_found`.
    pub error_code: String,
    /// Serialized ledger error, present when the ledger rejected the call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub ledger_error: Option<LedgerError>,
}

impl ApiError {
    pub fn new(status: StatusCode, error_code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error_code,
            message: message.into(),
            ledger_error: None,
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let status = match &err {
            LedgerError::InvalidPeriod(_) => StatusCode::BAD_REQUEST,
            LedgerError::InvalidCiphertext(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::RecordNotFound(_) | LedgerError::IndexOutOfRange { .. } => {
                StatusCode::NOT_FOUND
            }
            LedgerError::Unauthorized(_) => StatusCode::FORBIDDEN,
            LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LedgerError::Transport(_) => StatusCode::BAD_GATEWAY,
        };
        let (code, message) = (err.error_code(), err.to_string());
        Self {
            ledger_error: Some(err),
            ..Self::new(status, code, message)
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let (status, code) = match &err {
            EngineError::UnsupportedNetwork(_) => (StatusCode::BAD_REQUEST, "unsupported_network"),
            EngineError::InvalidInput(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_input"),
            EngineError::UnknownCiphertext(_) => (StatusCode::NOT_FOUND, "unknown_ciphertext"),
            EngineError::Unauthorized(_) => (StatusCode::FORBIDDEN, "unauthorized"),
            EngineError::Signing(_) => (StatusCode::BAD_REQUEST, "signing_error"),
            EngineError::Transport(_) => (StatusCode::BAD_GATEWAY, "transport_error"),
            EngineError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        };
        Self::new(status, code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = self.status.as_u16(),
                error_code = self.error_code,
                error = %self.message,
                "Request failed"
            );
        }

        let body = ErrorBody {
            error: self.message,
            error_code: self.error_code.to_string(),
            ledger_error: self.ledger_error,
        };
        (self.status, Json(body)).into_response()
    }
}
