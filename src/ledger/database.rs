// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded record database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `records`: record id → serialized Record
//! - `ledger_meta`: key → value (`last_record_id`)
//!
//! Owner indices and statistics are derived from `records` when the ledger
//! is opened, so the database never holds a second copy that could diverge.

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::models::{Record, RecordId};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: record id → serialized Record (JSON bytes).
const RECORDS: TableDefinition<u64, &[u8]> = TableDefinition::new("records");

/// Ledger state: key → value.
const LEDGER_META: TableDefinition<&str, u64> = TableDefinition::new("ledger_meta");

const LAST_RECORD_ID: &str = "last_record_id";

// =============================================================================
// Error Type
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LedgerDbError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),

    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("record sequence broken: expected id {expected}, got {found}")]
    Sequence { expected: RecordId, found: RecordId },

    #[error("record counter at {counter} but {stored} records stored")]
    CounterMismatch { counter: RecordId, stored: RecordId },
}

pub type LedgerDbResult<T> = Result<T, LedgerDbError>;

// =============================================================================
// LedgerDatabase
// =============================================================================

/// Durable append-only record store.
pub struct LedgerDatabase {
    db: Database,
}

impl LedgerDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> LedgerDbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(RECORDS)?;
            let _ = write_txn.open_table(LEDGER_META)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    /// Append a record and advance the id counter in one transaction.
    ///
    /// The record id must directly follow the last stored id.
    pub fn append_record(&self, record: &Record) -> LedgerDbResult<()> {
        let json = serde_json::to_vec(record)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut meta = write_txn.open_table(LEDGER_META)?;
            let last = meta.get(LAST_RECORD_ID)?.map(|v| v.value()).unwrap_or(0);
            if record.id != last + 1 {
                return Err(LedgerDbError::Sequence {
                    expected: last + 1,
                    found: record.id,
                });
            }

            let mut records = write_txn.open_table(RECORDS)?;
            records.insert(record.id, json.as_slice())?;
            meta.insert(LAST_RECORD_ID, record.id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// All records in id order.
    ///
    /// Fails if the stored ids are not `1..=n` or disagree with the counter.
    pub fn load_records(&self) -> LedgerDbResult<Vec<Record>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(RECORDS)?;
        let meta = read_txn.open_table(LEDGER_META)?;
        let counter = meta.get(LAST_RECORD_ID)?.map(|v| v.value()).unwrap_or(0);

        let mut records = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let record: Record = serde_json::from_slice(value.value())?;
            let expected = records.len() as RecordId + 1;
            if key.value() != expected || record.id != expected {
                return Err(LedgerDbError::Sequence {
                    expected,
                    found: key.value(),
                });
            }
            records.push(record);
        }

        let stored = records.len() as RecordId;
        if counter != stored {
            return Err(LedgerDbError::CounterMismatch { counter, stored });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CiphertextHandle;
    use alloy::primitives::Address;

    fn record(id: RecordId, period: u32) -> Record {
        Record {
            id,
            owner: Address::repeat_byte(0x11),
            timestamp: 1_700_000_000 + id,
            period,
            usage: CiphertextHandle::new([id as u8; 32]),
        }
    }

    #[test]
    fn append_and_reload_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.redb");

        {
            let db = LedgerDatabase::open(&path).unwrap();
            db.append_record(&record(1, 3)).unwrap();
            db.append_record(&record(2, 5)).unwrap();
        }

        let db = LedgerDatabase::open(&path).unwrap();
        let records = db.load_records().unwrap();
        assert_eq!(records, vec![record(1, 3), record(2, 5)]);
    }

    #[test]
    fn append_rejects_gaps_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDatabase::open(&dir.path().join("ledger.redb")).unwrap();

        let err = db.append_record(&record(2, 1)).unwrap_err();
        assert!(matches!(
            err,
            LedgerDbError::Sequence {
                expected: 1,
                found: 2
            }
        ));
        assert!(db.load_records().unwrap().is_empty());
    }

    #[test]
    fn load_rejects_counter_ahead_of_records() {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDatabase::open(&dir.path().join("ledger.redb")).unwrap();
        db.append_record(&record(1, 3)).unwrap();

        let write_txn = db.db.begin_write().unwrap();
        {
            let mut meta = write_txn.open_table(LEDGER_META).unwrap();
            meta.insert(LAST_RECORD_ID, 5).unwrap();
        }
        write_txn.commit().unwrap();

        assert!(matches!(
            db.load_records(),
            Err(LedgerDbError::CounterMismatch {
                counter: 5,
                stored: 1
            })
        ));
    }
}
