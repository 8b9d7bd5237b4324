// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session identity and the read-only state exposed to the UI layer.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use alloy::primitives::Address;
use tokio::sync::watch;

use crate::engine::{AccountSigner, NetworkConfig};
use crate::models::{unscale_usage, CiphertextHandle, RecordId, RecordMetadata, UserStats};

/// The (network, account) pair every in-flight operation is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    pub chain_id: u64,
    pub account: Address,
}

/// A connected wallet as reported by the identity feed.
#[derive(Clone)]
pub struct ConnectedAccount {
    pub network: NetworkConfig,
    pub account: Address,
    /// Absent for read-only connections.
    pub signer: Option<Arc<dyn AccountSigner>>,
}

impl ConnectedAccount {
    /// Connection able to sign, for the signer's own account.
    pub fn with_signer(network: NetworkConfig, signer: Arc<dyn AccountSigner>) -> Self {
        Self {
            network,
            account: signer.address(),
            signer: Some(signer),
        }
    }

    /// Connection that can read and decrypt-request but not sign.
    pub fn read_only(network: NetworkConfig, account: Address) -> Self {
        Self {
            network,
            account,
            signer: None,
        }
    }

    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity {
            chain_id: self.network.chain_id,
            account: self.account,
        }
    }
}

impl std::fmt::Debug for ConnectedAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectedAccount")
            .field("network", &self.network.name)
            .field("chain_id", &self.network.chain_id)
            .field("account", &self.account)
            .field("can_sign", &self.signer.is_some())
            .finish()
    }
}

/// Sender half of the session identity feed.
pub type IdentityPublisher = watch::Sender<Option<ConnectedAccount>>;

/// Receiver half of the session identity feed.
pub type IdentityFeed = watch::Receiver<Option<ConnectedAccount>>;

/// Create an identity feed starting disconnected.
pub fn identity_feed() -> (IdentityPublisher, IdentityFeed) {
    watch::channel(None)
}

/// Result of an asynchronous operation that may be superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion<T> {
    Fulfilled(T),
    /// The account or network changed before the result could be applied;
    /// nothing was mutated.
    Stale,
}

impl<T> Completion<T> {
    pub fn fulfilled(self) -> Option<T> {
        match self {
            Completion::Fulfilled(value) => Some(value),
            Completion::Stale => None,
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Completion::Stale)
    }
}

/// Engine binding lifecycle as seen by the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineStatus {
    Idle,
    Binding,
    Ready,
    Failed(String),
}

/// Operations that report busy/error state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operation {
    EngineBinding,
    Submit,
    Load,
    Decrypt,
}

/// A loaded record with its optional decrypted value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordView {
    pub id: RecordId,
    pub owner: Address,
    pub timestamp: u64,
    pub period: u32,
    pub usage: CiphertextHandle,
    /// Plaintext usage × 100, once decrypted in this session.
    pub decrypted: Option<u32>,
}

impl RecordView {
    pub(crate) fn new(id: RecordId, metadata: RecordMetadata, usage: CiphertextHandle) -> Self {
        Self {
            id,
            owner: metadata.owner,
            timestamp: metadata.timestamp,
            period: metadata.period,
            usage,
            decrypted: None,
        }
    }

    /// Decrypted usage in kWh.
    pub fn decrypted_kwh(&self) -> Option<f64> {
        self.decrypted.map(unscale_usage)
    }
}

/// Point-in-time copy of the session state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub identity: Option<SessionIdentity>,
    pub engine: EngineStatus,
    pub records: Vec<RecordView>,
    pub stats: Option<UserStats>,
    pub submitting: bool,
    pub loading: bool,
    pub decrypting: BTreeSet<RecordId>,
    pub errors: BTreeMap<Operation, String>,
}

impl SessionSnapshot {
    pub fn decrypted_count(&self) -> usize {
        self.records.iter().filter(|r| r.decrypted.is_some()).count()
    }

    /// Sum of decrypted usage, in kWh.
    pub fn total_decrypted_kwh(&self) -> f64 {
        let scaled: u64 = self
            .records
            .iter()
            .filter_map(|r| r.decrypted)
            .map(u64::from)
            .sum();
        scaled as f64 / 100.0
    }

    pub fn can_submit(&self) -> bool {
        self.identity.is_some() && self.engine == EngineStatus::Ready && !self.submitting
    }

    pub fn can_load(&self) -> bool {
        self.identity.is_some() && self.engine == EngineStatus::Ready && !self.loading
    }

    pub fn record(&self, id: RecordId) -> Option<&RecordView> {
        self.records.iter().find(|r| r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(id: RecordId, decrypted: Option<u32>) -> RecordView {
        RecordView {
            id,
            owner: Address::ZERO,
            timestamp: 1,
            period: 1,
            usage: CiphertextHandle::new([id as u8; 32]),
            decrypted,
        }
    }

    #[test]
    fn snapshot_totals_only_count_decrypted_records() {
        let snapshot = SessionSnapshot {
            identity: None,
            engine: EngineStatus::Idle,
            records: vec![view(1, Some(15_000)), view(2, None), view(3, Some(2_550))],
            stats: None,
            submitting: false,
            loading: false,
            decrypting: BTreeSet::new(),
            errors: BTreeMap::new(),
        };

        assert_eq!(snapshot.decrypted_count(), 2);
        assert!((snapshot.total_decrypted_kwh() - 175.5).abs() < 1e-9);
        assert_eq!(snapshot.record(3).unwrap().decrypted_kwh(), Some(25.5));
        assert!(!snapshot.can_submit());
    }

    #[test]
    fn completion_accessors() {
        assert_eq!(Completion::Fulfilled(3).fulfilled(), Some(3));
        assert!(Completion::<u32>::Stale.is_stale());
        assert_eq!(Completion::<u32>::Stale.fulfilled(), None);
    }
}
