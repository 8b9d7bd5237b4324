// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Ledger Data Models
//!
//! Records, ciphertext handles and the request/response structures shared by
//! the ledger, the HTTP API and the client transports. Wire types derive
//! `Serialize`, `Deserialize` and `ToSchema`; address and handle fields are
//! documented as hex strings.
//!
//! ## Fixed-point usage values
//!
//! Usage is encrypted as an unsigned 32-bit integer holding kWh × 100, so two
//! decimal digits survive the round trip. [`scale_usage`] performs the
//! conversion (round half to even) and enforces the accepted input range.

use alloy::primitives::{keccak256, Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::engine::AuthorizationArtifact;

/// Ledger-assigned record identity. `0` is reserved and never assigned.
pub type RecordId = u64;

/// The reserved id meaning "record does not exist".
pub const MISSING_RECORD_ID: RecordId = 0;

/// Shortest period a record may cover, in days.
pub const MIN_PERIOD_DAYS: u32 = 1;

/// Longest period a record may cover, in days.
pub const MAX_PERIOD_DAYS: u32 = 365;

/// Fixed-point factor applied to kWh values before encryption.
pub const USAGE_SCALE: u32 = 100;

/// Smallest accepted usage value (kWh).
pub const MIN_USAGE_KWH: f64 = 0.01;

/// Largest accepted usage value (kWh).
pub const MAX_USAGE_KWH: f64 = 10_000.0;

/// Whether `period` lies in `[MIN_PERIOD_DAYS, MAX_PERIOD_DAYS]`.
pub fn is_valid_period(period: u32) -> bool {
    (MIN_PERIOD_DAYS..=MAX_PERIOD_DAYS).contains(&period)
}

/// Convert a kWh reading into the encrypted fixed-point representation.
///
/// Rounds half to even after multiplying by [`USAGE_SCALE`].
pub fn scale_usage(kwh: f64) -> Result<u32, String> {
    if !kwh.is_finite() || kwh <= 0.0 {
        return Err("usage must be a number greater than 0".to_string());
    }
    if kwh > MAX_USAGE_KWH {
        return Err(format!("usage must not exceed {MAX_USAGE_KWH} kWh"));
    }
    let scaled = (kwh * f64::from(USAGE_SCALE)).round_ties_even();
    if scaled < MIN_USAGE_KWH * f64::from(USAGE_SCALE) {
        return Err(format!("usage must be at least {MIN_USAGE_KWH} kWh"));
    }
    // Bounded by MAX_USAGE_KWH * USAGE_SCALE, well inside u32.
    Ok(scaled as u32)
}

/// Inverse of [`scale_usage`], for display.
pub fn unscale_usage(scaled: u32) -> f64 {
    f64::from(scaled) / f64::from(USAGE_SCALE)
}

// =============================================================================
// Ciphertext Types
// =============================================================================

/// Opaque reference to an encrypted value inside an engine context.
///
/// The ledger stores and returns it but never interprets its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CiphertextHandle(pub B256);

impl CiphertextHandle {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(B256::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0 .0
    }
}

impl std::fmt::Display for CiphertextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Proof accompanying a freshly encrypted input.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputProof(pub Bytes);

impl InputProof {
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_ref()
    }
}

/// Ciphertext handle plus the proof binding it to a contract and account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EncryptedInput {
    /// Handle of the encrypted value (0x-prefixed, 32 bytes).
    #[schema(value_type = String)]
    pub handle: CiphertextHandle,
    /// Input proof (0x-prefixed hex).
    #[schema(value_type = String)]
    pub proof: InputProof,
}

// =============================================================================
// Records
// =============================================================================

/// A stored usage record. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Record {
    pub id: RecordId,
    #[schema(value_type = String)]
    pub owner: Address,
    /// Ledger-observed creation time (seconds since epoch).
    pub timestamp: u64,
    /// Days covered by the reading.
    pub period: u32,
    /// Encrypted usage value.
    #[schema(value_type = String)]
    pub usage: CiphertextHandle,
}

impl Record {
    pub fn metadata(&self) -> RecordMetadata {
        RecordMetadata {
            owner: self.owner,
            timestamp: self.timestamp,
            period: self.period,
        }
    }
}

/// Public, unencrypted part of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RecordMetadata {
    #[schema(value_type = String)]
    pub owner: Address,
    pub timestamp: u64,
    pub period: u32,
}

/// Aggregated per-owner statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UserStats {
    pub total_records: u64,
    /// Sum of `period` over the owner's records.
    pub total_period: u64,
}

impl UserStats {
    /// Mean period per record, `0.0` without records.
    pub fn average_period(&self) -> f64 {
        if self.total_records == 0 {
            0.0
        } else {
            self.total_period as f64 / self.total_records as f64
        }
    }

    pub(crate) fn include(&mut self, period: u32) {
        self.total_records += 1;
        self.total_period += u64::from(period);
    }
}

// =============================================================================
// Submissions
// =============================================================================

/// Unsigned `addRecord` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RecordSubmission {
    /// Account claiming ownership; must match the signature.
    #[schema(value_type = String)]
    pub owner: Address,
    pub input: EncryptedInput,
    pub period: u32,
}

impl RecordSubmission {
    /// Digest the owner signs to authorize the write on one ledger.
    pub fn signing_digest(&self, chain_id: u64, contract: Address) -> B256 {
        let mut buf = Vec::with_capacity(32 + 8 + 20 + 20 + 32 + 32 + 4);
        buf.extend_from_slice(b"encrypted-power-log/add-record");
        buf.extend_from_slice(&chain_id.to_be_bytes());
        buf.extend_from_slice(contract.as_slice());
        buf.extend_from_slice(self.owner.as_slice());
        buf.extend_from_slice(self.input.handle.as_bytes());
        buf.extend_from_slice(keccak256(self.input.proof.as_slice()).as_slice());
        buf.extend_from_slice(&self.period.to_be_bytes());
        keccak256(buf)
    }
}

/// `addRecord` payload with the owner's personal-sign signature over
/// [`RecordSubmission::signing_digest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SignedSubmission {
    pub submission: RecordSubmission,
    /// 65-byte `r || s || v` signature (0x-prefixed hex).
    #[schema(value_type = String)]
    pub signature: Bytes,
}

// =============================================================================
// API Responses
// =============================================================================

/// Identity and size of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LedgerInfo {
    #[schema(value_type = String)]
    pub contract: Address,
    pub chain_id: u64,
    pub total_records: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RecordIdResponse {
    pub record_id: RecordId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RecordUsageResponse {
    #[schema(value_type = String)]
    pub usage: CiphertextHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExistsResponse {
    pub exists: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RecordIdsResponse {
    pub record_ids: Vec<RecordId>,
}

// =============================================================================
// Development Engine
// =============================================================================

/// Request body for encrypting a value with the development engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct EncryptRequest {
    #[schema(value_type = String)]
    pub contract: Address,
    #[schema(value_type = String)]
    pub account: Address,
    /// Usage × 100.
    pub value: u32,
}

/// Request body for an authorized decryption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DecryptRequest {
    #[schema(value_type = String)]
    pub handle: CiphertextHandle,
    #[schema(value_type = String)]
    pub contract: Address,
    pub artifact: AuthorizationArtifact,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DecryptResponse {
    pub value: u32,
}
