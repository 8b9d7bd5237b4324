// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Client-side errors.

use crate::ledger::LedgerError;

/// Why a submission failed after local validation passed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionFailure {
    #[error("encryption failed: {0}")]
    Engine(String),

    #[error("owner signature failed: {0}")]
    Signing(String),

    /// Rejected or not reached by the ledger; carried verbatim.
    #[error(transparent)]
    Ledger(LedgerError),
}

/// Errors returned by the decryption orchestrator.
///
/// A result discarded because the account or network changed is not an
/// error; it is reported as [`Completion::Stale`](super::Completion::Stale).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrchestratorError {
    /// Caller input or session preconditions violated. Nothing was sent.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Another submission from this session has not settled yet.
    #[error("A submission is already in flight")]
    SubmissionInFlight,

    #[error("Submission failed: {0}")]
    Submission(SubmissionFailure),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Authorization could not be created, or was refused by the engine.
    #[error("Authorization error: {0}")]
    Authorization(String),

    #[error("Engine error: {0}")]
    Engine(String),
}

impl OrchestratorError {
    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            OrchestratorError::Validation(_) => "validation_error",
            OrchestratorError::SubmissionInFlight => "submission_in_flight",
            OrchestratorError::Submission(_) => "submission_error",
            OrchestratorError::Ledger(e) => e.error_code(),
            OrchestratorError::Authorization(_) => "authorization_error",
            OrchestratorError::Engine(_) => "engine_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_keep_their_code() {
        let err = OrchestratorError::from(LedgerError::RecordNotFound(4));
        assert_eq!(err.error_code(), "record_not_found");
        assert_eq!(err.to_string(), "Record not found: 4");
    }

    #[test]
    fn submission_wraps_ledger_rejection_verbatim() {
        let err = OrchestratorError::Submission(SubmissionFailure::Ledger(
            LedgerError::InvalidPeriod(400),
        ));
        assert_eq!(err.error_code(), "submission_error");
        assert_eq!(
            err.to_string(),
            "Submission failed: Invalid period: 400 (expected 1..=365 days)"
        );
    }
}
