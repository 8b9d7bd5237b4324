// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Durable table of consumed ciphertexts for the development engine.
//!
//! ## Table Layout
//!
//! - `ciphertexts`: handle (32 bytes) → serialized ciphertext
//!
//! Only ciphertexts referenced by a stored record are written here; pending
//! inputs live in memory and are lost on restart.

use std::collections::HashMap;
use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use super::local::StoredCiphertext;
use crate::models::CiphertextHandle;

/// Consumed ciphertexts: handle bytes → serialized StoredCiphertext (JSON bytes).
const CIPHERTEXTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("ciphertexts");

#[derive(Debug, thiserror::Error)]
pub enum CiphertextStoreError {
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

    #[error("stored handle has {0} bytes, expected 32")]
    MalformedHandle(usize),
}

pub type CiphertextStoreResult<T> = Result<T, CiphertextStoreError>;

pub struct CiphertextStore {
    db: Database,
}

impl CiphertextStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> CiphertextStoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(CIPHERTEXTS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    pub fn insert(
        &self,
        handle: &CiphertextHandle,
        ciphertext: &StoredCiphertext,
    ) -> CiphertextStoreResult<()> {
        let json = serde_json::to_vec(ciphertext)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CIPHERTEXTS)?;
            table.insert(handle.as_bytes().as_slice(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn remove(&self, handle: &CiphertextHandle) -> CiphertextStoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CIPHERTEXTS)?;
            table.remove(handle.as_bytes().as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn load(&self) -> CiphertextStoreResult<HashMap<CiphertextHandle, StoredCiphertext>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CIPHERTEXTS)?;

        let mut ciphertexts = HashMap::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            let bytes: [u8; 32] = key
                .value()
                .try_into()
                .map_err(|_| CiphertextStoreError::MalformedHandle(key.value().len()))?;
            let ciphertext: StoredCiphertext = serde_json::from_slice(value.value())?;
            ciphertexts.insert(CiphertextHandle::new(bytes), ciphertext);
        }
        Ok(ciphertexts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    fn ciphertext(value: u32) -> StoredCiphertext {
        StoredCiphertext {
            value,
            contract: Address::repeat_byte(0x42),
            account: Address::repeat_byte(0x11),
        }
    }

    #[test]
    fn insert_remove_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.redb");
        let kept = CiphertextHandle::new([1; 32]);
        let dropped = CiphertextHandle::new([2; 32]);

        {
            let store = CiphertextStore::open(&path).unwrap();
            store.insert(&kept, &ciphertext(150)).unwrap();
            store.insert(&dropped, &ciphertext(9)).unwrap();
            store.remove(&dropped).unwrap();
        }

        let loaded = CiphertextStore::open(&path).unwrap().load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get(&kept), Some(&ciphertext(150)));
    }
}
