// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encryption engine binding.
//!
//! The homomorphic engine is an external collaborator. This module fixes the
//! narrow contract the rest of the crate relies on:
//! - [`EngineBinder`] binds an engine context to one network
//! - [`EngineHandle`] encrypts inputs, issues decryption authorizations and
//!   performs authorized decryption
//! - [`InputVerifier`] is the check the ledger delegates input proofs to
//! - [`AccountSigner`] is the account's interactive signing capability
//!
//! [`local::LocalEngine`] implements all of them in-process for development
//! nodes and tests.

pub mod authorization;
pub mod local;
pub mod store;

use std::sync::Arc;

use alloy::{
    primitives::{Address, Signature},
    signers::{local::PrivateKeySigner, SignerSync},
};
use async_trait::async_trait;

use crate::models::{CiphertextHandle, EncryptedInput};

pub use authorization::AuthorizationArtifact;
pub use local::{LocalEngine, LocalEngineBinder};

/// Chain ID of a local Hardhat/Anvil development node.
pub const LOCAL_CHAIN_ID: u64 = 31337;

/// Chain ID of the Sepolia testnet.
pub const SEPOLIA_CHAIN_ID: u64 = 11155111;

/// Network an engine context is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Network name for display
    pub name: String,
    /// Chain ID
    pub chain_id: u64,
    /// Endpoint of the node serving this network
    pub rpc_url: String,
}

impl NetworkConfig {
    pub fn new(name: impl Into<String>, chain_id: u64, rpc_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            chain_id,
            rpc_url: rpc_url.into(),
        }
    }

    /// Local development node on the default port.
    pub fn local_dev() -> Self {
        Self::new("Local Development", LOCAL_CHAIN_ID, "http://localhost:8080")
    }
}

/// Errors that can occur inside the engine binding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Unsupported network: chain {0}")]
    UnsupportedNetwork(u64),

    #[error("Invalid encrypted input: {0}")]
    InvalidInput(String),

    #[error("Unknown ciphertext handle: {0}")]
    UnknownCiphertext(CiphertextHandle),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Engine transport error: {0}")]
    Transport(String),

    #[error("Engine storage error: {0}")]
    Storage(String),
}

/// Binds an engine context to a network.
#[async_trait]
pub trait EngineBinder: Send + Sync {
    async fn bind_to_network(
        &self,
        network: &NetworkConfig,
    ) -> Result<Arc<dyn EngineHandle>, EngineError>;
}

/// An engine context bound to one network.
#[async_trait]
pub trait EngineHandle: Send + Sync {
    /// Chain the context was bound to.
    fn chain_id(&self) -> u64;

    /// Encrypt `value` for `contract`, on behalf of `account`.
    async fn encrypt(
        &self,
        contract: Address,
        account: Address,
        value: u32,
    ) -> Result<EncryptedInput, EngineError>;

    /// Obtain a decryption authorization for `account` on `contract`.
    ///
    /// May prompt the account holder for a signature.
    async fn create_authorization(
        &self,
        contract: Address,
        account: Address,
        signer: &dyn AccountSigner,
    ) -> Result<AuthorizationArtifact, EngineError>;

    /// Decrypt `handle` with an authorization scoped to `contract`.
    async fn authorized_decrypt(
        &self,
        handle: CiphertextHandle,
        contract: Address,
        artifact: &AuthorizationArtifact,
    ) -> Result<u32, EngineError>;
}

/// Validation of encrypted inputs, delegated to by the ledger on writes.
///
/// The ledger verifies, then consumes once it is about to store the record,
/// and restores the input if the record fails to commit.
pub trait InputVerifier: Send + Sync {
    /// Check that `input` was produced for `contract` by `caller` and has
    /// not been used yet. Has no side effects.
    fn verify_input(
        &self,
        input: &EncryptedInput,
        contract: Address,
        caller: Address,
    ) -> Result<(), EngineError>;

    /// Mark a verified input as used by a stored record.
    fn consume_input(&self, handle: &CiphertextHandle) -> Result<(), EngineError>;

    /// Undo [`consume_input`](Self::consume_input) for a record that did not commit.
    fn restore_input(&self, handle: &CiphertextHandle);
}

/// Signing capability of a connected account.
#[async_trait]
pub trait AccountSigner: Send + Sync {
    fn address(&self) -> Address;

    /// EIP-191 personal-sign over `message`.
    async fn sign_message(&self, message: &[u8]) -> Result<Signature, EngineError>;
}

#[async_trait]
impl AccountSigner for PrivateKeySigner {
    fn address(&self) -> Address {
        PrivateKeySigner::address(self)
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Signature, EngineError> {
        self.sign_message_sync(message)
            .map_err(|e| EngineError::Signing(e.to_string()))
    }
}

/// Create a signer from a hex-encoded private key (with or without `0x`).
pub fn signer_from_hex(private_key_hex: &str) -> Result<PrivateKeySigner, EngineError> {
    let key_bytes = alloy::hex::decode(private_key_hex)
        .map_err(|e| EngineError::Signing(format!("Invalid private key: {e}")))?;

    PrivateKeySigner::from_slice(&key_bytes)
        .map_err(|e| EngineError::Signing(format!("Invalid private key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn private_key_signer_signs_recoverable_messages() {
        let signer = signer_from_hex(&"11".repeat(32)).unwrap();
        let signature = AccountSigner::sign_message(&signer, b"hello").await.unwrap();
        let recovered = signature.recover_address_from_msg(b"hello").unwrap();
        assert_eq!(recovered, AccountSigner::address(&signer));
    }

    #[test]
    fn signer_from_hex_rejects_garbage() {
        assert!(matches!(
            signer_from_hex("not-hex"),
            Err(EngineError::Signing(_))
        ));
        assert!(signer_from_hex(&format!("0x{}", "22".repeat(32))).is_ok());
    }
}
