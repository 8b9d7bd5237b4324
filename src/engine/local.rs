// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-process engine for development nodes and tests.
//!
//! Stands in for the homomorphic coprocessor: values are held in a table
//! keyed by an unpredictable 32-byte handle, and the access rules of the real
//! engine are enforced (input proofs bound to contract and account, single
//! use of each input, signed and unexpired authorizations, per-account
//! access). Nothing here is confidential against the process itself.
//!
//! Fresh inputs wait in a bounded pending table until a ledger consumes
//! them. Unsubmitted inputs expire after the pending TTL or are evicted
//! least recently used once the table is full. Consumed ciphertexts are
//! kept for the engine's lifetime and, with [`LocalEngine::open`], in a
//! redb file across restarts.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use hmac::digest::{Key, KeyInit};
use hmac::{Hmac, Mac};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::store::CiphertextStore;
use super::{
    AccountSigner, AuthorizationArtifact, EngineBinder, EngineError, EngineHandle, InputVerifier,
    NetworkConfig,
};
use crate::models::{CiphertextHandle, EncryptedInput, InputProof};

type HmacSha256 = Hmac<Sha256>;

/// Default validity window of issued authorizations (1 day).
pub const DEFAULT_AUTHORIZATION_TTL: Duration = Duration::from_secs(86_400);

/// Default number of encrypted inputs awaiting submission.
pub const DEFAULT_PENDING_CAPACITY: usize = 4_096;

/// Default lifetime of an unsubmitted input (1 hour).
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(3_600);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCiphertext {
    pub value: u32,
    pub contract: Address,
    /// Only this account may decrypt.
    pub account: Address,
}

struct PendingInput {
    ciphertext: StoredCiphertext,
    created_at: i64,
}

struct Tables {
    pending: LruCache<CiphertextHandle, PendingInput>,
    /// Referenced by stored records; never evicted.
    consumed: HashMap<CiphertextHandle, StoredCiphertext>,
}

/// Development engine bound to a single chain.
pub struct LocalEngine {
    chain_id: u64,
    proof_key: Key<HmacSha256>,
    authorization_ttl: Duration,
    pending_ttl: Duration,
    tables: Mutex<Tables>,
    store: Option<CiphertextStore>,
}

impl LocalEngine {
    pub fn new(chain_id: u64) -> Self {
        Self::with_consumed(chain_id, HashMap::new(), None)
    }

    /// Open an engine whose consumed ciphertexts are persisted at `path`.
    pub fn open(chain_id: u64, path: &Path) -> Result<Self, EngineError> {
        let store = CiphertextStore::open(path).map_err(|e| EngineError::Storage(e.to_string()))?;
        let consumed = store
            .load()
            .map_err(|e| EngineError::Storage(e.to_string()))?;

        info!(
            path = %path.display(),
            ciphertexts = consumed.len(),
            "Engine ciphertext store opened"
        );
        Ok(Self::with_consumed(chain_id, consumed, Some(store)))
    }

    fn with_consumed(
        chain_id: u64,
        consumed: HashMap<CiphertextHandle, StoredCiphertext>,
        store: Option<CiphertextStore>,
    ) -> Self {
        let mut proof_key = Key::<HmacSha256>::default();
        for chunk in proof_key.chunks_exact_mut(32) {
            chunk.copy_from_slice(&Sha256::digest(uuid::Uuid::new_v4().as_bytes()));
        }

        Self {
            chain_id,
            proof_key,
            authorization_ttl: DEFAULT_AUTHORIZATION_TTL,
            pending_ttl: DEFAULT_PENDING_TTL,
            tables: Mutex::new(Tables {
                pending: LruCache::new(
                    NonZeroUsize::new(DEFAULT_PENDING_CAPACITY).unwrap_or(NonZeroUsize::MIN),
                ),
                consumed,
            }),
            store,
        }
    }

    /// Override the validity window of issued authorizations.
    pub fn with_authorization_ttl(mut self, ttl: Duration) -> Self {
        self.authorization_ttl = ttl;
        self
    }

    /// Bound the inputs awaiting submission.
    pub fn with_pending_limits(mut self, capacity: usize, ttl: Duration) -> Self {
        let tables = self.tables.get_mut().unwrap_or_else(PoisonError::into_inner);
        tables
            .pending
            .resize(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN));
        self.pending_ttl = ttl;
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Number of ciphertexts held by the engine, pending or consumed.
    pub fn ciphertext_count(&self) -> usize {
        let tables = self.tables();
        tables.pending.len() + tables.consumed.len()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, pending: &PendingInput, now: i64) -> bool {
        let ttl = i64::try_from(self.pending_ttl.as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(pending.created_at) >= ttl
    }

    fn input_mac(
        &self,
        handle: &CiphertextHandle,
        contract: Address,
        account: Address,
    ) -> HmacSha256 {
        let mut mac = <HmacSha256 as KeyInit>::new(&self.proof_key);
        mac.update(&self.chain_id.to_be_bytes());
        mac.update(handle.as_bytes());
        mac.update(contract.as_slice());
        mac.update(account.as_slice());
        mac
    }

    /// Encrypt synchronously; see [`EngineHandle::encrypt`].
    pub fn encrypt_value(&self, contract: Address, account: Address, value: u32) -> EncryptedInput {
        let mut hasher = Sha256::new();
        hasher.update(self.chain_id.to_be_bytes());
        hasher.update(contract.as_slice());
        hasher.update(account.as_slice());
        hasher.update(value.to_be_bytes());
        hasher.update(uuid::Uuid::new_v4().as_bytes());
        let handle = CiphertextHandle::new(hasher.finalize().into());

        let proof = self.input_mac(&handle, contract, account).finalize().into_bytes();

        let now = chrono::Utc::now().timestamp();
        let mut tables = self.tables();
        loop {
            let expired = tables
                .pending
                .peek_lru()
                .is_some_and(|(_, oldest)| self.is_expired(oldest, now));
            if !expired {
                break;
            }
            tables.pending.pop_lru();
        }
        let evicted = tables.pending.push(
            handle,
            PendingInput {
                ciphertext: StoredCiphertext {
                    value,
                    contract,
                    account,
                },
                created_at: now,
            },
        );
        if let Some((evicted, _)) = evicted {
            debug!(handle = %evicted, "Evicted unsubmitted input");
        }

        EncryptedInput {
            handle,
            proof: InputProof(Bytes::copy_from_slice(&proof)),
        }
    }

    /// Decrypt synchronously; see [`EngineHandle::authorized_decrypt`].
    pub fn decrypt_value(
        &self,
        handle: CiphertextHandle,
        contract: Address,
        artifact: &AuthorizationArtifact,
    ) -> Result<u32, EngineError> {
        let now = chrono::Utc::now().timestamp();
        artifact.validate(self.chain_id, contract, now)?;

        let tables = self.tables();
        let stored = tables
            .consumed
            .get(&handle)
            .or_else(|| {
                tables
                    .pending
                    .peek(&handle)
                    .filter(|pending| !self.is_expired(pending, now))
                    .map(|pending| &pending.ciphertext)
            })
            .ok_or(EngineError::UnknownCiphertext(handle))?;

        if stored.contract != contract {
            return Err(EngineError::Unauthorized(format!(
                "ciphertext {handle} does not belong to contract {contract}"
            )));
        }
        if stored.account != artifact.account {
            return Err(EngineError::Unauthorized(format!(
                "account {} may not decrypt ciphertext {handle}",
                artifact.account
            )));
        }

        Ok(stored.value)
    }
}

impl InputVerifier for LocalEngine {
    fn verify_input(
        &self,
        input: &EncryptedInput,
        contract: Address,
        caller: Address,
    ) -> Result<(), EngineError> {
        self.input_mac(&input.handle, contract, caller)
            .verify_slice(input.proof.as_slice())
            .map_err(|_| {
                EngineError::InvalidInput(format!(
                    "proof does not bind {} to contract {contract} and caller {caller}",
                    input.handle
                ))
            })?;

        let tables = self.tables();
        if tables.consumed.contains_key(&input.handle) {
            return Err(EngineError::InvalidInput(format!(
                "input {} was already submitted",
                input.handle
            )));
        }
        let now = chrono::Utc::now().timestamp();
        match tables.pending.peek(&input.handle) {
            Some(pending) if !self.is_expired(pending, now) => Ok(()),
            _ => Err(EngineError::UnknownCiphertext(input.handle)),
        }
    }

    fn consume_input(&self, handle: &CiphertextHandle) -> Result<(), EngineError> {
        let mut tables = self.tables();
        let pending = tables
            .pending
            .pop(handle)
            .ok_or(EngineError::UnknownCiphertext(*handle))?;

        if let Some(store) = &self.store {
            if let Err(e) = store.insert(handle, &pending.ciphertext) {
                tables.pending.put(*handle, pending);
                return Err(EngineError::Storage(e.to_string()));
            }
        }
        tables.consumed.insert(*handle, pending.ciphertext);
        Ok(())
    }

    fn restore_input(&self, handle: &CiphertextHandle) {
        let mut tables = self.tables();
        let Some(ciphertext) = tables.consumed.remove(handle) else {
            return;
        };
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(handle) {
                warn!(handle = %handle, error = %e, "Failed to drop restored input from store");
            }
        }
        tables.pending.put(
            *handle,
            PendingInput {
                ciphertext,
                created_at: chrono::Utc::now().timestamp(),
            },
        );
    }
}
#[async_trait]
impl EngineHandle for LocalEngine {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn encrypt(
        &self,
        contract: Address,
        account: Address,
        value: u32,
    ) -> Result<EncryptedInput, EngineError> {
        Ok(self.encrypt_value(contract, account, value))
    }

    async fn create_authorization(
        &self,
        contract: Address,
        account: Address,
        signer: &dyn AccountSigner,
    ) -> Result<AuthorizationArtifact, EngineError> {
        AuthorizationArtifact::issue(
            signer,
            account,
            self.chain_id,
            vec![contract],
            chrono::Utc::now().timestamp(),
            self.authorization_ttl,
        )
        .await
    }

    async fn authorized_decrypt(
        &self,
        handle: CiphertextHandle,
        contract: Address,
        artifact: &AuthorizationArtifact,
    ) -> Result<u32, EngineError> {
        self.decrypt_value(handle, contract, artifact)
    }
}

/// Binder over a fixed set of [`LocalEngine`]s, one per chain.
#[derive(Default, Clone)]
pub struct LocalEngineBinder {
    engines: HashMap<u64, Arc<LocalEngine>>,
}

impl LocalEngineBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_engine(mut self, engine: Arc<LocalEngine>) -> Self {
        self.engines.insert(engine.chain_id(), engine);
        self
    }
}

#[async_trait]
impl EngineBinder for LocalEngineBinder {
    async fn bind_to_network(
        &self,
        network: &NetworkConfig,
    ) -> Result<Arc<dyn EngineHandle>, EngineError> {
        let engine: Arc<dyn EngineHandle> = self
            .engines
            .get(&network.chain_id)
            .cloned()
            .ok_or(EngineError::UnsupportedNetwork(network.chain_id))?;
        Ok(engine)
    }
}
