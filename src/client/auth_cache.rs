// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU cache for decryption authorization artifacts.
//!
//! Holds one artifact per (chain, contract, account) in process memory.
//! Expired artifacts are treated as absent and evicted when looked up.
//! Nothing is persisted.
//!
//! [`AuthorizationCache::invalidate_all`] advances an epoch. An artifact
//! whose creation started under an earlier epoch is returned to its caller
//! but never stored.

use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use alloy::primitives::Address;
use lru::LruCache;
use tracing::debug;

use crate::engine::AuthorizationArtifact;

/// Default number of cached artifacts.
pub const DEFAULT_CACHE_CAPACITY: usize = 64;

/// Cache key: one artifact per network, contract and account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AuthorizationKey {
    pub chain_id: u64,
    pub contract: Address,
    pub account: Address,
}

/// In-process LRU cache of authorization artifacts.
pub struct AuthorizationCache {
    cache: Mutex<LruCache<AuthorizationKey, AuthorizationArtifact>>,
    /// Advanced under the `cache` lock.
    epoch: AtomicU64,
    /// Serializes check-then-create per key.
    key_locks: Mutex<HashMap<AuthorizationKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Default for AuthorizationCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl AuthorizationCache {
    /// Create a new cache holding at most `capacity` artifacts.
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            epoch: AtomicU64::new(0),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Current invalidation epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Get the artifact for `key`.
    ///
    /// Returns `None` if not cached or expired.
    pub fn get(&self, key: &AuthorizationKey) -> Option<AuthorizationArtifact> {
        self.get_at(key, chrono::Utc::now().timestamp())
    }

    fn get_at(&self, key: &AuthorizationKey, now: i64) -> Option<AuthorizationArtifact> {
        let mut cache = self.cache.lock().ok()?;
        if let Some(artifact) = cache.get(key) {
            if artifact.is_valid_at(now) {
                return Some(artifact.clone());
            }
            cache.pop(key);
            debug!(
                chain_id = key.chain_id,
                account = %key.account,
                "Evicted expired authorization"
            );
        }
        None
    }

    /// Store the artifact for `key`, replacing any previous one.
    pub fn put(&self, key: AuthorizationKey, artifact: AuthorizationArtifact) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, artifact);
        }
    }

    /// Invalidate the artifact for a specific key.
    pub fn invalidate(&self, key: &AuthorizationKey) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.pop(key);
        }
    }

    /// Drop every cached artifact and advance the epoch.
    pub fn invalidate_all(&self) {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.clear();
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    /// Store `artifact` unless the cache was invalidated since `epoch`.
    fn put_in_epoch(
        &self,
        key: AuthorizationKey,
        artifact: AuthorizationArtifact,
        epoch: u64,
    ) -> bool {
        let Ok(mut cache) = self.cache.lock() else {
            return false;
        };
        if self.epoch.load(Ordering::Acquire) != epoch {
            return false;
        }
        cache.put(key, artifact);
        true
    }

    pub fn len(&self) -> usize {
        self.cache.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached artifact for `key`, or create and cache one.
    ///
    /// Concurrent callers for the same key are serialized, so at most one
    /// `create` runs per key at a time and later callers see its result.
    /// A failed `create` caches nothing.
    pub async fn get_or_create<F, Fut, E>(
        &self,
        key: AuthorizationKey,
        create: F,
    ) -> Result<AuthorizationArtifact, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AuthorizationArtifact, E>>,
    {
        self.get_or_create_in(key, self.epoch(), create).await
    }

    /// Like [`get_or_create`](Self::get_or_create), for a caller that
    /// observed the cache at `epoch`. A created artifact is only stored if
    /// nothing invalidated the cache since then.
    pub async fn get_or_create_in<F, Fut, E>(
        &self,
        key: AuthorizationKey,
        epoch: u64,
        create: F,
    ) -> Result<AuthorizationArtifact, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AuthorizationArtifact, E>>,
    {
        let lock = self.key_lock(key);
        let guard = lock.lock_owned().await;

        let result = match self.get(&key) {
            Some(artifact) => Ok(artifact),
            None => match create().await {
                Ok(artifact) => {
                    if !self.put_in_epoch(key, artifact.clone(), epoch) {
                        debug!(
                            chain_id = key.chain_id,
                            account = %key.account,
                            "Not caching authorization created before invalidation"
                        );
                    }
                    Ok(artifact)
                }
                Err(e) => Err(e),
            },
        };

        drop(guard);
        self.release_key_lock(&key);
        result
    }

    fn key_lock(&self, key: AuthorizationKey) -> Arc<tokio::sync::Mutex<()>> {
        match self.key_locks.lock() {
            Ok(mut locks) => locks.entry(key).or_default().clone(),
            // Poisoned map: fall back to an unshared lock.
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn release_key_lock(&self, key: &AuthorizationKey) {
        if let Ok(mut locks) = self.key_locks.lock() {
            if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
                locks.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use alloy::primitives::Bytes;

    fn key(chain_id: u64, account: u8) -> AuthorizationKey {
        AuthorizationKey {
            chain_id,
            contract: Address::repeat_byte(0x42),
            account: Address::repeat_byte(account),
        }
    }

    fn artifact(key: &AuthorizationKey, issued_at: i64, valid_for_secs: u64) -> AuthorizationArtifact {
        AuthorizationArtifact {
            account: key.account,
            contracts: vec![key.contract],
            chain_id: key.chain_id,
            issued_at,
            valid_for_secs,
            signature: Bytes::from_static(&[0u8; 65]),
        }
    }

    fn fresh(key: &AuthorizationKey) -> AuthorizationArtifact {
        artifact(key, chrono::Utc::now().timestamp(), 300)
    }

    #[test]
    fn cache_put_and_get() {
        let cache = AuthorizationCache::new(10);
        let k = key(31337, 1);

        assert!(cache.get(&k).is_none());
        cache.put(k, fresh(&k));

        let result = cache.get(&k).unwrap();
        assert_eq!(result.account, k.account);
    }

    #[test]
    fn cache_invalidate() {
        let cache = AuthorizationCache::new(10);
        let k = key(31337, 1);
        cache.put(k, fresh(&k));
        assert!(cache.get(&k).is_some());

        cache.invalidate(&k);
        assert!(cache.get(&k).is_none());
    }

    #[test]
    fn cache_invalidate_all() {
        let cache = AuthorizationCache::new(10);
        for account in 1..=3 {
            let k = key(31337, account);
            cache.put(k, fresh(&k));
        }
        assert_eq!(cache.len(), 3);

        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn expired_entries_are_absent_and_evicted() {
        let cache = AuthorizationCache::new(10);
        let k = key(31337, 1);
        cache.put(k, artifact(&k, 1_000, 60));

        assert!(cache.get_at(&k, 1_030).is_some());
        assert!(cache.get_at(&k, 1_060).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn distinct_tuples_do_not_collide() {
        let cache = AuthorizationCache::new(10);
        let local = key(31337, 1);
        let sepolia = key(11155111, 1);
        let other_account = key(31337, 2);
        cache.put(local, fresh(&local));

        assert!(cache.get(&sepolia).is_none());
        assert!(cache.get(&other_account).is_none());
        assert_eq!(cache.get(&local).unwrap().chain_id, 31337);
    }

    #[tokio::test]
    async fn get_or_create_runs_create_once_per_key() {
        let cache = Arc::new(AuthorizationCache::new(10));
        let k = key(31337, 1);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                let calls = &calls;
                cache
                    .get_or_create(k, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Ok::<_, String>(fresh(&k))
                    })
                    .await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.key_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalidation_during_create_is_not_undone() {
        let cache = AuthorizationCache::new(10);
        let k = key(31337, 1);
        let epoch = cache.epoch();

        let cache_ref = &cache;
        let artifact = cache
            .get_or_create(k, move || async move {
                cache_ref.invalidate_all();
                Ok::<_, String>(fresh(&k))
            })
            .await
            .unwrap();

        assert_eq!(artifact.account, k.account);
        assert!(cache.is_empty());
        assert_eq!(cache.epoch(), epoch + 1);
    }

    #[tokio::test]
    async fn outdated_epoch_is_not_stored() {
        let cache = AuthorizationCache::new(10);
        let k = key(31337, 1);
        let observed = cache.epoch();
        cache.invalidate_all();

        let create = move || async move { Ok::<_, String>(fresh(&k)) };
        cache.get_or_create_in(k, observed, create).await.unwrap();
        assert!(cache.get(&k).is_none());

        cache
            .get_or_create_in(k, cache.epoch(), create)
            .await
            .unwrap();
        assert!(cache.get(&k).is_some());
    }

    #[tokio::test]
    async fn failed_create_caches_nothing() {
        let cache = AuthorizationCache::new(10);
        let k = key(31337, 1);

        let result = cache
            .get_or_create(k, || async { Err::<AuthorizationArtifact, _>("rejected") })
            .await;
        assert_eq!(result.unwrap_err(), "rejected");
        assert!(cache.get(&k).is_none());
    }
}
