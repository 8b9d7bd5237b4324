// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Client
//!
//! Everything a user-facing application needs to write and read encrypted
//! usage records: the [`DecryptionOrchestrator`], the authorization cache it
//! relies on, and transports to an in-process or remote ledger.

pub mod auth_cache;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod session;
pub mod transport;

pub use auth_cache::{AuthorizationCache, AuthorizationKey, DEFAULT_CACHE_CAPACITY};
pub use error::{OrchestratorError, SubmissionFailure};
pub use http::{HttpEngineBinder, HttpLedger};
pub use orchestrator::DecryptionOrchestrator;
pub use session::{
    identity_feed, Completion, ConnectedAccount, EngineStatus, IdentityFeed, IdentityPublisher,
    Operation, RecordView, SessionIdentity, SessionSnapshot,
};
pub use transport::LedgerTransport;
