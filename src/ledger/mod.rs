// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Record Ledger
//!
//! The authoritative store for encrypted usage records. It assigns record
//! ids, keeps an index of record ids per owner, aggregates per-owner
//! statistics and answers range queries. The usage payload is an opaque
//! ciphertext handle; its validity is delegated to the engine's
//! [`InputVerifier`].
//!
//! ## Consistency
//!
//! All state lives behind one lock. `add_record` checks the period and the
//! owner signature outside the lock. Under a single write guard it then
//! verifies and consumes the input, assigns the id and timestamp, persists
//! (when a database is attached) and updates records, owner index and
//! statistics. A failed commit hands the input back to the verifier.
//! Readers observe either none or all of a write.
//!
//! Timestamps are `max(now, previous + 1)`, so ids and timestamps both
//! increase strictly with submission order.

pub mod database;

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use alloy::primitives::{Address, Signature};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::{EngineError, InputVerifier};
use crate::models::{
    is_valid_period, CiphertextHandle, Record, RecordId, RecordMetadata, SignedSubmission,
    UserStats, MISSING_RECORD_ID,
};

pub use database::{LedgerDatabase, LedgerDbError};

/// Errors surfaced by ledger operations, locally or across a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum LedgerError {
    #[error("Invalid period: {0} (expected 1..=365 days)")]
    InvalidPeriod(u32),

    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("Index {index} out of range for {count} records")]
    IndexOutOfRange { index: u64, count: u64 },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl LedgerError {
    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::InvalidPeriod(_) => "invalid_period",
            LedgerError::InvalidCiphertext(_) => "invalid_ciphertext",
            LedgerError::RecordNotFound(_) => "record_not_found",
            LedgerError::IndexOutOfRange { .. } => "index_out_of_range",
            LedgerError::Unauthorized(_) => "unauthorized",
            LedgerError::Storage(_) => "storage_error",
            LedgerError::Transport(_) => "transport_error",
        }
    }
}

impl From<LedgerDbError> for LedgerError {
    fn from(e: LedgerDbError) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Chain and contract address a ledger answers for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerIdentity {
    pub chain_id: u64,
    pub contract: Address,
}

#[derive(Default)]
struct LedgerState {
    /// `records[i]` has id `i + 1`.
    records: Vec<Record>,
    owner_index: HashMap<Address, Vec<RecordId>>,
    stats: HashMap<Address, UserStats>,
    last_timestamp: u64,
}

impl LedgerState {
    fn next_id(&self) -> RecordId {
        self.records.len() as RecordId + 1
    }

    fn next_timestamp(&self, now: u64) -> u64 {
        now.max(self.last_timestamp + 1)
    }

    fn apply(&mut self, record: Record) {
        self.owner_index
            .entry(record.owner)
            .or_default()
            .push(record.id);
        self.stats
            .entry(record.owner)
            .or_default()
            .include(record.period);
        self.last_timestamp = self.last_timestamp.max(record.timestamp);
        self.records.push(record);
    }

    fn record(&self, id: RecordId) -> LedgerResult<&Record> {
        if id == MISSING_RECORD_ID {
            return Err(LedgerError::RecordNotFound(id));
        }
        usize::try_from(id - 1)
            .ok()
            .and_then(|idx| self.records.get(idx))
            .ok_or(LedgerError::RecordNotFound(id))
    }

    fn owner_ids(&self, owner: &Address) -> &[RecordId] {
        self.owner_index
            .get(owner)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Encrypted usage record ledger.
pub struct RecordLedger {
    identity: LedgerIdentity,
    verifier: Arc<dyn InputVerifier>,
    state: RwLock<LedgerState>,
    db: Option<LedgerDatabase>,
}

impl RecordLedger {
    /// Create an empty, memory-only ledger.
    pub fn new(identity: LedgerIdentity, verifier: Arc<dyn InputVerifier>) -> Self {
        Self {
            identity,
            verifier,
            state: RwLock::new(LedgerState::default()),
            db: None,
        }
    }

    /// Open a ledger persisted at `path`, replaying stored records.
    pub fn open(
        identity: LedgerIdentity,
        verifier: Arc<dyn InputVerifier>,
        path: &Path,
    ) -> LedgerResult<Self> {
        let db = LedgerDatabase::open(path)?;
        let mut state = LedgerState::default();
        for record in db.load_records()? {
            state.apply(record);
        }

        info!(
            path = %path.display(),
            records = state.records.len(),
            "Record ledger opened"
        );

        Ok(Self {
            identity,
            verifier,
            state: RwLock::new(state),
            db: Some(db),
        })
    }

    pub fn identity(&self) -> LedgerIdentity {
        self.identity
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recover the account that signed `signed`, which must be the claimed owner.
    fn authenticate(&self, signed: &SignedSubmission) -> LedgerResult<Address> {
        let submission = &signed.submission;
        let digest = submission.signing_digest(self.identity.chain_id, self.identity.contract);

        let signature = Signature::from_raw(signed.signature.as_ref())
            .map_err(|e| LedgerError::Unauthorized(format!("malformed owner signature: {e}")))?;
        let signer = signature
            .recover_address_from_msg(digest.as_slice())
            .map_err(|e| LedgerError::Unauthorized(format!("unrecoverable owner signature: {e}")))?;

        if signer != submission.owner {
            return Err(LedgerError::Unauthorized(format!(
                "submission for {} signed by {signer}",
                submission.owner
            )));
        }
        Ok(signer)
    }

    /// Store a new record owned by the submission's signer.
    pub fn add_record(&self, signed: &SignedSubmission) -> LedgerResult<RecordId> {
        let submission = &signed.submission;
        if !is_valid_period(submission.period) {
            return Err(LedgerError::InvalidPeriod(submission.period));
        }

        let owner = self.authenticate(signed)?;
        let input = &submission.input;

        let mut state = self.write();
        self.verifier
            .verify_input(input, self.identity.contract, owner)
            .map_err(|e| LedgerError::InvalidCiphertext(e.to_string()))?;
        self.verifier
            .consume_input(&input.handle)
            .map_err(|e| match e {
                EngineError::Storage(reason) => LedgerError::Storage(reason),
                other => LedgerError::InvalidCiphertext(other.to_string()),
            })?;

        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
        let record = Record {
            id: state.next_id(),
            owner,
            timestamp: state.next_timestamp(now),
            period: submission.period,
            usage: input.handle,
        };

        if let Some(db) = &self.db {
            if let Err(e) = db.append_record(&record) {
                self.verifier.restore_input(&input.handle);
                return Err(e.into());
            }
        }

        let id = record.id;
        state.apply(record);

        info!(
            record_id = id,
            owner = %owner,
            period = submission.period,
            "Record added"
        );
        Ok(id)
    }

    /// `(owner, timestamp, period)` of a record.
    pub fn record_metadata(&self, id: RecordId) -> LedgerResult<RecordMetadata> {
        Ok(self.read().record(id)?.metadata())
    }

    /// Encrypted usage of a record. Decrypting it requires an authorization.
    pub fn record_usage(&self, id: RecordId) -> LedgerResult<CiphertextHandle> {
        Ok(self.read().record(id)?.usage)
    }

    pub fn record(&self, id: RecordId) -> LedgerResult<Record> {
        self.read().record(id).cloned()
    }

    pub fn user_record_count(&self, owner: &Address) -> u64 {
        self.read().owner_ids(owner).len() as u64
    }

    pub fn user_record_by_index(&self, owner: &Address, index: u64) -> LedgerResult<RecordId> {
        let state = self.read();
        let ids = state.owner_ids(owner);
        usize::try_from(index)
            .ok()
            .and_then(|idx| ids.get(idx))
            .copied()
            .ok_or(LedgerError::IndexOutOfRange {
                index,
                count: ids.len() as u64,
            })
    }

    /// All of the owner's record ids in submission order.
    pub fn user_records(&self, owner: &Address) -> Vec<RecordId> {
        self.read().owner_ids(owner).to_vec()
    }

    /// Owner's record ids whose period lies in `[min_period, max_period]`,
    /// in submission order.
    pub fn user_records_in_period_range(
        &self,
        owner: &Address,
        min_period: u32,
        max_period: u32,
    ) -> Vec<RecordId> {
        let state = self.read();
        let matches: Vec<RecordId> = state
            .owner_ids(owner)
            .iter()
            .copied()
            .filter(|id| {
                state
                    .record(*id)
                    .map(|r| (min_period..=max_period).contains(&r.period))
                    .unwrap_or(false)
            })
            .collect();

        debug!(
            owner = %owner,
            min_period,
            max_period,
            matches = matches.len(),
            "Period range query"
        );
        matches
    }

    pub fn user_stats(&self, owner: &Address) -> UserStats {
        self.read().stats.get(owner).copied().unwrap_or_default()
    }

    pub fn total_records(&self) -> u64 {
        self.read().records.len() as u64
    }

    pub fn record_exists(&self, id: RecordId) -> bool {
        self.read().record(id).is_ok()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::LocalEngine;
    use crate::models::RecordSubmission;
    use alloy::primitives::Bytes;
    use alloy::signers::{local::PrivateKeySigner, SignerSync};

    pub(crate) const CONTRACT: Address = Address::repeat_byte(0x42);
    pub(crate) const CHAIN_ID: u64 = 31337;

    pub(crate) fn identity() -> LedgerIdentity {
        LedgerIdentity {
            chain_id: CHAIN_ID,
            contract: CONTRACT,
        }
    }

    pub(crate) fn signer(byte: u8) -> PrivateKeySigner {
        PrivateKeySigner::from_slice(&[byte; 32]).unwrap()
    }

    pub(crate) fn signed_submission(
        engine: &LocalEngine,
        signer: &PrivateKeySigner,
        scaled_usage: u32,
        period: u32,
    ) -> SignedSubmission {
        let submission = RecordSubmission {
            owner: signer.address(),
            input: engine.encrypt_value(CONTRACT, signer.address(), scaled_usage),
            period,
        };
        let digest = submission.signing_digest(CHAIN_ID, CONTRACT);
        let signature = signer.sign_message_sync(digest.as_slice()).unwrap();
        SignedSubmission {
            submission,
            signature: Bytes::copy_from_slice(&signature.as_bytes()),
        }
    }

    fn ledger() -> (Arc<LocalEngine>, RecordLedger) {
        let engine = Arc::new(LocalEngine::new(CHAIN_ID));
        let ledger = RecordLedger::new(identity(), engine.clone());
        (engine, ledger)
    }

    #[test]
    fn fresh_ledger_is_empty() {
        let (_, ledger) = ledger();
        let anyone = Address::repeat_byte(0x99);

        assert_eq!(ledger.total_records(), 0);
        assert_eq!(ledger.user_stats(&anyone), UserStats::default());
        assert!(!ledger.record_exists(0));
        assert!(!ledger.record_exists(999));
        assert!(ledger.user_records(&anyone).is_empty());
    }

    #[test]
    fn add_record_assigns_sequential_ids_and_metadata() {
        let (engine, ledger) = ledger();
        let alice = signer(1);

        let id = ledger
            .add_record(&signed_submission(&engine, &alice, 15_000, 1))
            .unwrap();
        assert_eq!(id, 1);

        let meta = ledger.record_metadata(id).unwrap();
        assert_eq!(meta.owner, alice.address());
        assert_eq!(meta.period, 1);
        assert!(meta.timestamp > 0);
        assert_eq!(ledger.user_record_count(&alice.address()), 1);
        assert_eq!(ledger.user_record_by_index(&alice.address(), 0).unwrap(), 1);
        assert!(ledger.record_exists(1));
    }

    #[test]
    fn ids_and_timestamps_increase_across_interleaved_owners() {
        let (engine, ledger) = ledger();
        let alice = signer(1);
        let bob = signer(2);

        let mut ids = Vec::new();
        for (who, period) in [(&alice, 1), (&bob, 2), (&alice, 3), (&bob, 4), (&alice, 5)] {
            ids.push(
                ledger
                    .add_record(&signed_submission(&engine, who, 100, period))
                    .unwrap(),
            );
        }

        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(ledger.total_records(), 5);
        assert_eq!(ledger.user_records(&alice.address()), vec![1, 3, 5]);
        assert_eq!(ledger.user_records(&bob.address()), vec![2, 4]);

        let timestamps: Vec<u64> = ids
            .iter()
            .map(|id| ledger.record_metadata(*id).unwrap().timestamp)
            .collect();
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));

        for id in 1..=5 {
            assert!(ledger.record_exists(id));
        }
        assert!(!ledger.record_exists(6));
    }

    #[test]
    fn stats_match_recomputation() {
        let (engine, ledger) = ledger();
        let alice = signer(1);
        let periods = [1, 2, 30, 365, 7];

        for period in periods {
            ledger
                .add_record(&signed_submission(&engine, &alice, 100, period))
                .unwrap();
        }

        let stats = ledger.user_stats(&alice.address());
        let recomputed: u64 = ledger
            .user_records(&alice.address())
            .iter()
            .map(|id| u64::from(ledger.record_metadata(*id).unwrap().period))
            .sum();
        assert_eq!(stats.total_records, periods.len() as u64);
        assert_eq!(stats.total_period, recomputed);
        assert_eq!(stats.total_period, 405);
    }

    #[test]
    fn period_range_filters_in_submission_order() {
        let (engine, ledger) = ledger();
        let alice = signer(1);

        for (usage, period) in [(100, 1), (150, 2), (200, 3), (250, 4)] {
            ledger
                .add_record(&signed_submission(&engine, &alice, usage * 100, period))
                .unwrap();
        }

        let owner = alice.address();
        assert_eq!(ledger.user_records_in_period_range(&owner, 2, 3), vec![2, 3]);
        assert_eq!(ledger.user_records(&owner), vec![1, 2, 3, 4]);
        assert!(ledger.user_records_in_period_range(&owner, 10, 20).is_empty());
        assert!(ledger.user_records_in_period_range(&owner, 3, 2).is_empty());
    }

    #[test]
    fn invalid_period_rejected_without_effect() {
        let (engine, ledger) = ledger();
        let alice = signer(1);

        for period in [0, 366] {
            let err = ledger
                .add_record(&signed_submission(&engine, &alice, 100, period))
                .unwrap_err();
            assert_eq!(err, LedgerError::InvalidPeriod(period));
        }
        assert_eq!(ledger.total_records(), 0);
        assert_eq!(ledger.user_stats(&alice.address()), UserStats::default());
    }

    #[test]
    fn replayed_or_foreign_input_is_invalid_ciphertext() {
        let (engine, ledger) = ledger();
        let alice = signer(1);
        let signed = signed_submission(&engine, &alice, 100, 1);

        ledger.add_record(&signed).unwrap();
        assert!(matches!(
            ledger.add_record(&signed),
            Err(LedgerError::InvalidCiphertext(_))
        ));

        // Input produced by another engine context.
        let other_engine = LocalEngine::new(CHAIN_ID);
        assert!(matches!(
            ledger.add_record(&signed_submission(&other_engine, &alice, 100, 1)),
            Err(LedgerError::InvalidCiphertext(_))
        ));
        assert_eq!(ledger.total_records(), 1);
    }

    #[test]
    fn submission_signed_by_someone_else_is_unauthorized() {
        let (engine, ledger) = ledger();
        let alice = signer(1);
        let mallory = signer(3);

        let mut signed = signed_submission(&engine, &mallory, 100, 1);
        signed.submission.owner = alice.address();

        assert!(matches!(
            ledger.add_record(&signed),
            Err(LedgerError::Unauthorized(_))
        ));
        assert_eq!(ledger.user_record_count(&alice.address()), 0);
    }

    #[test]
    fn reads_of_missing_records_fail() {
        let (engine, ledger) = ledger();
        let alice = signer(1);
        ledger
            .add_record(&signed_submission(&engine, &alice, 100, 1))
            .unwrap();

        assert_eq!(
            ledger.record_metadata(0).unwrap_err(),
            LedgerError::RecordNotFound(0)
        );
        assert_eq!(
            ledger.record_usage(2).unwrap_err(),
            LedgerError::RecordNotFound(2)
        );
        assert_eq!(
            ledger.user_record_by_index(&alice.address(), 1).unwrap_err(),
            LedgerError::IndexOutOfRange { index: 1, count: 1 }
        );
    }

    #[test]
    fn record_usage_returns_submitted_handle() {
        let (engine, ledger) = ledger();
        let alice = signer(1);
        let signed = signed_submission(&engine, &alice, 100, 1);
        let handle = signed.submission.input.handle;

        let id = ledger.add_record(&signed).unwrap();
        assert_eq!(ledger.record_usage(id).unwrap(), handle);
    }

    #[test]
    fn failed_commit_leaves_input_usable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(LocalEngine::new(CHAIN_ID));
        let alice = signer(1);

        // In-memory state one record ahead of the database: the next append
        // breaks the id sequence and fails.
        let mut state = LedgerState::default();
        state.apply(Record {
            id: 1,
            owner: alice.address(),
            timestamp: 1,
            period: 1,
            usage: CiphertextHandle::new([9; 32]),
        });
        let ledger = RecordLedger {
            identity: identity(),
            verifier: engine.clone(),
            state: RwLock::new(state),
            db: Some(LedgerDatabase::open(&dir.path().join("ledger.redb")).unwrap()),
        };

        let signed = signed_submission(&engine, &alice, 100, 3);
        assert!(matches!(
            ledger.add_record(&signed),
            Err(LedgerError::Storage(_))
        ));
        assert_eq!(ledger.total_records(), 1);
        assert_eq!(ledger.user_stats(&alice.address()).total_period, 1);

        // The identical submission is still accepted elsewhere.
        let fresh = RecordLedger::new(identity(), engine.clone());
        assert_eq!(fresh.add_record(&signed).unwrap(), 1);
    }

    #[tokio::test]
    async fn persisted_records_decrypt_after_restart() {
        use crate::engine::EngineHandle;

        let dir = tempfile::tempdir().unwrap();
        let ledger_path = dir.path().join("ledger.redb");
        let engine_path = dir.path().join("engine.redb");
        let alice = signer(1);

        {
            let engine = Arc::new(LocalEngine::open(CHAIN_ID, &engine_path).unwrap());
            let ledger = RecordLedger::open(identity(), engine.clone(), &ledger_path).unwrap();
            ledger
                .add_record(&signed_submission(&engine, &alice, 4_250, 30))
                .unwrap();
        }

        let engine = Arc::new(LocalEngine::open(CHAIN_ID, &engine_path).unwrap());
        let ledger = RecordLedger::open(identity(), engine.clone(), &ledger_path).unwrap();
        let artifact = engine
            .create_authorization(CONTRACT, alice.address(), &alice)
            .await
            .unwrap();

        let handle = ledger.record_usage(1).unwrap();
        let value = engine
            .authorized_decrypt(handle, CONTRACT, &artifact)
            .await
            .unwrap();
        assert_eq!(value, 4_250);
    }

    #[test]
    fn persisted_ledger_replays_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.redb");
        let engine = Arc::new(LocalEngine::new(CHAIN_ID));
        let alice = signer(1);
        let bob = signer(2);

        {
            let ledger = RecordLedger::open(identity(), engine.clone(), &path).unwrap();
            ledger
                .add_record(&signed_submission(&engine, &alice, 100, 2))
                .unwrap();
            ledger
                .add_record(&signed_submission(&engine, &bob, 100, 5))
                .unwrap();
            ledger
                .add_record(&signed_submission(&engine, &alice, 100, 9))
                .unwrap();
        }

        let reopened = RecordLedger::open(identity(), engine.clone(), &path).unwrap();
        assert_eq!(reopened.total_records(), 3);
        assert_eq!(reopened.user_records(&alice.address()), vec![1, 3]);
        assert_eq!(
            reopened.user_stats(&alice.address()),
            UserStats {
                total_records: 2,
                total_period: 11
            }
        );

        let id = reopened
            .add_record(&signed_submission(&engine, &bob, 100, 1))
            .unwrap();
        assert_eq!(id, 4);
        assert!(
            reopened.record_metadata(4).unwrap().timestamp
                > reopened.record_metadata(3).unwrap().timestamp
        );
    }
}
