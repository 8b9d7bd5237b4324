// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request/response boundary to the record ledger.
//!
//! Writes are committed or rejected; reads are point-in-time. The in-process
//! [`RecordLedger`] implements the trait directly, [`HttpLedger`] reaches a
//! remote node.
//!
//! [`HttpLedger`]: super::http::HttpLedger

use alloy::primitives::Address;
use async_trait::async_trait;

use crate::ledger::{LedgerResult, RecordLedger};
use crate::models::{CiphertextHandle, RecordId, RecordMetadata, SignedSubmission, UserStats};

#[async_trait]
pub trait LedgerTransport: Send + Sync {
    async fn add_record(&self, submission: SignedSubmission) -> LedgerResult<RecordId>;

    async fn record_metadata(&self, id: RecordId) -> LedgerResult<RecordMetadata>;

    async fn record_usage(&self, id: RecordId) -> LedgerResult<CiphertextHandle>;

    async fn user_record_count(&self, owner: Address) -> LedgerResult<u64>;

    async fn user_record_by_index(&self, owner: Address, index: u64) -> LedgerResult<RecordId>;

    async fn user_records(&self, owner: Address) -> LedgerResult<Vec<RecordId>>;

    async fn user_records_in_period_range(
        &self,
        owner: Address,
        min_period: u32,
        max_period: u32,
    ) -> LedgerResult<Vec<RecordId>>;

    async fn user_stats(&self, owner: Address) -> LedgerResult<UserStats>;

    async fn total_records(&self) -> LedgerResult<u64>;

    async fn record_exists(&self, id: RecordId) -> LedgerResult<bool>;
}

#[async_trait]
impl LedgerTransport for RecordLedger {
    async fn add_record(&self, submission: SignedSubmission) -> LedgerResult<RecordId> {
        RecordLedger::add_record(self, &submission)
    }

    async fn record_metadata(&self, id: RecordId) -> LedgerResult<RecordMetadata> {
        RecordLedger::record_metadata(self, id)
    }

    async fn record_usage(&self, id: RecordId) -> LedgerResult<CiphertextHandle> {
        RecordLedger::record_usage(self, id)
    }

    async fn user_record_count(&self, owner: Address) -> LedgerResult<u64> {
        Ok(RecordLedger::user_record_count(self, &owner))
    }

    async fn user_record_by_index(&self, owner: Address, index: u64) -> LedgerResult<RecordId> {
        RecordLedger::user_record_by_index(self, &owner, index)
    }

    async fn user_records(&self, owner: Address) -> LedgerResult<Vec<RecordId>> {
        Ok(RecordLedger::user_records(self, &owner))
    }

    async fn user_records_in_period_range(
        &self,
        owner: Address,
        min_period: u32,
        max_period: u32,
    ) -> LedgerResult<Vec<RecordId>> {
        Ok(RecordLedger::user_records_in_period_range(
            self, &owner, min_period, max_period,
        ))
    }

    async fn user_stats(&self, owner: Address) -> LedgerResult<UserStats> {
        Ok(RecordLedger::user_stats(self, &owner))
    }

    async fn total_records(&self) -> LedgerResult<u64> {
        Ok(RecordLedger::total_records(self))
    }

    async fn record_exists(&self, id: RecordId) -> LedgerResult<bool> {
        Ok(RecordLedger::record_exists(self, id))
    }
}
