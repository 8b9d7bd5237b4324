// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Decryption authorization artifacts.
//!
//! An artifact is a personal-sign signature by the account over a statement
//! naming the chain, the contracts and a validity window. Engines accept it
//! as proof that the account asked to decrypt its own ciphertexts.

use std::time::Duration;

use alloy::primitives::{Address, Bytes, Signature};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{AccountSigner, EngineError};

/// Time-bounded permission to decrypt an account's ciphertexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthorizationArtifact {
    /// Account the permission was signed by.
    #[schema(value_type = String)]
    pub account: Address,
    /// Contracts whose ciphertexts may be decrypted.
    #[schema(value_type = Vec<String>)]
    pub contracts: Vec<Address>,
    pub chain_id: u64,
    /// Start of the validity window (seconds since epoch).
    pub issued_at: i64,
    /// Length of the validity window in seconds.
    pub valid_for_secs: u64,
    /// 65-byte personal-sign signature over [`AuthorizationArtifact::statement`].
    #[schema(value_type = String)]
    pub signature: Bytes,
}

impl AuthorizationArtifact {
    /// Ask `signer` to sign a new artifact for `contracts`.
    ///
    /// Fails with `Unauthorized` when the signer is not `account`.
    pub async fn issue(
        signer: &dyn AccountSigner,
        account: Address,
        chain_id: u64,
        contracts: Vec<Address>,
        issued_at: i64,
        valid_for: Duration,
    ) -> Result<Self, EngineError> {
        if signer.address() != account {
            return Err(EngineError::Unauthorized(format!(
                "signer {} cannot authorize for account {account}",
                signer.address()
            )));
        }

        let valid_for_secs = valid_for.as_secs();
        let statement = statement(account, chain_id, &contracts, issued_at, valid_for_secs);
        let signature = signer.sign_message(statement.as_bytes()).await?;

        Ok(Self {
            account,
            contracts,
            chain_id,
            issued_at,
            valid_for_secs,
            signature: Bytes::copy_from_slice(&signature.as_bytes()),
        })
    }

    /// The text the account signs.
    pub fn statement(&self) -> String {
        statement(
            self.account,
            self.chain_id,
            &self.contracts,
            self.issued_at,
            self.valid_for_secs,
        )
    }

    /// First second at which the artifact is no longer valid.
    pub fn expires_at(&self) -> i64 {
        self.issued_at
            .saturating_add(i64::try_from(self.valid_for_secs).unwrap_or(i64::MAX))
    }

    pub fn is_valid_at(&self, now: i64) -> bool {
        self.issued_at <= now && now < self.expires_at()
    }

    pub fn covers(&self, contract: Address) -> bool {
        self.contracts.contains(&contract)
    }

    /// Check that the signature was produced by `account`.
    pub fn verify_signature(&self) -> Result<(), EngineError> {
        let signature = Signature::from_raw(self.signature.as_ref())
            .map_err(|e| EngineError::Unauthorized(format!("malformed signature: {e}")))?;
        let recovered = signature
            .recover_address_from_msg(self.statement().as_bytes())
            .map_err(|e| EngineError::Unauthorized(format!("unrecoverable signature: {e}")))?;

        if recovered == self.account {
            Ok(())
        } else {
            Err(EngineError::Unauthorized(format!(
                "authorization signed by {recovered}, not {}",
                self.account
            )))
        }
    }

    /// Full acceptance check used by engines before decrypting.
    pub fn validate(&self, chain_id: u64, contract: Address, now: i64) -> Result<(), EngineError> {
        if self.chain_id != chain_id {
            return Err(EngineError::Unauthorized(format!(
                "authorization issued for chain {}, engine is on chain {chain_id}",
                self.chain_id
            )));
        }
        if !self.is_valid_at(now) {
            return Err(EngineError::Unauthorized("authorization expired".to_string()));
        }
        if !self.covers(contract) {
            return Err(EngineError::Unauthorized(format!(
                "authorization does not cover contract {contract}"
            )));
        }
        self.verify_signature()
    }
}

fn statement(
    account: Address,
    chain_id: u64,
    contracts: &[Address],
    issued_at: i64,
    valid_for_secs: u64,
) -> String {
    let contracts = contracts
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "Authorize decryption of encrypted power usage\n\
         account: {account}\n\
         chain: {chain_id}\n\
         contracts: {contracts}\n\
         issued: {issued_at}\n\
         valid-for: {valid_for_secs}"
    )
}
