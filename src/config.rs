// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the typed configuration loaded
//! from them at startup. Unparseable values fall back to the default with a
//! warning.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Directory holding `ledger.redb` and `engine.redb` | unset (memory only) |
//! | `LEDGER_CONTRACT` | Address the ledger answers for | `0x5FbD…0aa3` |
//! | `CHAIN_ID` | Chain id of the ledger and local engine | `31337` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,encrypted_power_log=debug,tower_http=info` |
//! | `AUTHORIZATION_TTL_SECS` | Validity of issued decryption authorizations | `86400` |
//! | `AUTHORIZATION_CACHE_CAPACITY` | Max cached authorizations per client | `64` |
//! | `PENDING_INPUT_CAPACITY` | Max encrypted inputs awaiting submission | `4096` |
//! | `PENDING_INPUT_TTL_SECS` | Lifetime of an unsubmitted input | `3600` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{address, Address};
use tracing::warn;

use crate::engine::LOCAL_CHAIN_ID;
use crate::ledger::LedgerIdentity;

pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";

/// Directory for the ledger database. When unset the ledger is memory-only.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

pub const LEDGER_CONTRACT_ENV: &str = "LEDGER_CONTRACT";
pub const CHAIN_ID_ENV: &str = "CHAIN_ID";

/// `json` for structured output, anything else for human-readable logs.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

pub const AUTHORIZATION_TTL_ENV: &str = "AUTHORIZATION_TTL_SECS";
pub const AUTHORIZATION_CACHE_CAPACITY_ENV: &str = "AUTHORIZATION_CACHE_CAPACITY";
pub const PENDING_INPUT_CAPACITY_ENV: &str = "PENDING_INPUT_CAPACITY";
pub const PENDING_INPUT_TTL_ENV: &str = "PENDING_INPUT_TTL_SECS";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;

/// First contract deployed by the default dev account on a fresh local chain.
pub const DEFAULT_LEDGER_CONTRACT: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");

pub const DEFAULT_AUTHORIZATION_TTL_SECS: u64 = 86_400;
pub const DEFAULT_PENDING_INPUT_CAPACITY: usize = 4_096;
pub const DEFAULT_PENDING_INPUT_TTL_SECS: u64 = 3_600;

/// File name of the ledger database inside `DATA_DIR`.
pub const LEDGER_DB_FILE: &str = "ledger.redb";

/// File name of the development engine's ciphertext store inside `DATA_DIR`.
pub const ENGINE_DB_FILE: &str = "engine.redb";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Configuration of the ledger node binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: Option<PathBuf>,
    pub contract: Address,
    pub chain_id: u64,
    pub log_format: LogFormat,
    pub authorization_ttl: Duration,
    pub pending_input_capacity: usize,
    pub pending_input_ttl: Duration,
}

impl NodeConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            host: lookup(HOST_ENV).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse_or(&lookup, PORT_ENV, DEFAULT_PORT),
            data_dir: lookup(DATA_DIR_ENV)
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            contract: parse_or(&lookup, LEDGER_CONTRACT_ENV, DEFAULT_LEDGER_CONTRACT),
            chain_id: parse_or(&lookup, CHAIN_ID_ENV, LOCAL_CHAIN_ID),
            log_format: lookup(LOG_FORMAT_ENV)
                .map(|raw| LogFormat::parse(&raw))
                .unwrap_or_default(),
            authorization_ttl: Duration::from_secs(parse_or(
                &lookup,
                AUTHORIZATION_TTL_ENV,
                DEFAULT_AUTHORIZATION_TTL_SECS,
            )),
            pending_input_capacity: parse_or(
                &lookup,
                PENDING_INPUT_CAPACITY_ENV,
                DEFAULT_PENDING_INPUT_CAPACITY,
            ),
            pending_input_ttl: Duration::from_secs(parse_or(
                &lookup,
                PENDING_INPUT_TTL_ENV,
                DEFAULT_PENDING_INPUT_TTL_SECS,
            )),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Database path, if the ledger is persistent.
    pub fn ledger_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(LEDGER_DB_FILE))
    }

    /// Engine ciphertext store path, persistent alongside the ledger.
    pub fn engine_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(ENGINE_DB_FILE))
    }

    pub fn ledger_identity(&self) -> LedgerIdentity {
        LedgerIdentity {
            chain_id: self.chain_id,
            contract: self.contract,
        }
    }
}

/// Configuration of a client-side decryption orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Ledger contract whose ciphertexts are encrypted for and decrypted from.
    pub contract: Address,
    pub authorization_cache_capacity: usize,
    /// Validity window requested for new authorizations.
    pub authorization_ttl: Duration,
}

impl OrchestratorConfig {
    pub fn new(contract: Address) -> Self {
        Self {
            contract,
            authorization_cache_capacity: crate::client::DEFAULT_CACHE_CAPACITY,
            authorization_ttl: Duration::from_secs(DEFAULT_AUTHORIZATION_TTL_SECS),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::new(DEFAULT_LEDGER_CONTRACT);
        Self {
            contract: parse_or(&lookup, LEDGER_CONTRACT_ENV, defaults.contract),
            authorization_cache_capacity: parse_or(
                &lookup,
                AUTHORIZATION_CACHE_CAPACITY_ENV,
                defaults.authorization_cache_capacity,
            ),
            authorization_ttl: Duration::from_secs(parse_or(
                &lookup,
                AUTHORIZATION_TTL_ENV,
                DEFAULT_AUTHORIZATION_TTL_SECS,
            )),
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = key, value = %raw, "Invalid configuration value, using default");
            default
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn node_defaults() {
        let config = NodeConfig::from_lookup(lookup(&[]));
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.ledger_path(), None);
        assert_eq!(config.chain_id, LOCAL_CHAIN_ID);
        assert_eq!(config.contract, DEFAULT_LEDGER_CONTRACT);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.authorization_ttl, Duration::from_secs(86_400));
        assert_eq!(config.pending_input_capacity, 4_096);
        assert_eq!(config.pending_input_ttl, Duration::from_secs(3_600));
    }

    #[test]
    fn node_reads_overrides() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "9000"),
            ("DATA_DIR", "/var/lib/power"),
            ("CHAIN_ID", "11155111"),
            ("LEDGER_CONTRACT", "0x4242424242424242424242424242424242424242"),
            ("LOG_FORMAT", "JSON"),
            ("PENDING_INPUT_CAPACITY", "16"),
            ("PENDING_INPUT_TTL_SECS", "60"),
        ]));
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
        assert_eq!(
            config.ledger_path(),
            Some(PathBuf::from("/var/lib/power/ledger.redb"))
        );
        assert_eq!(
            config.engine_path(),
            Some(PathBuf::from("/var/lib/power/engine.redb"))
        );
        assert_eq!(config.pending_input_capacity, 16);
        assert_eq!(config.pending_input_ttl, Duration::from_secs(60));
        assert_eq!(config.ledger_identity().chain_id, 11155111);
        assert_eq!(config.contract, Address::repeat_byte(0x42));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("PORT", "eighty"),
            ("CHAIN_ID", "-1"),
            ("LEDGER_CONTRACT", "not-an-address"),
            ("DATA_DIR", "  "),
        ]));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.chain_id, LOCAL_CHAIN_ID);
        assert_eq!(config.contract, DEFAULT_LEDGER_CONTRACT);
        assert_eq!(config.data_dir, None);
    }

    #[test]
    fn orchestrator_config_from_lookup() {
        let config = OrchestratorConfig::from_lookup(lookup(&[
            ("AUTHORIZATION_CACHE_CAPACITY", "8"),
            ("AUTHORIZATION_TTL_SECS", "600"),
        ]));
        assert_eq!(config.contract, DEFAULT_LEDGER_CONTRACT);
        assert_eq!(config.authorization_cache_capacity, 8);
        assert_eq!(config.authorization_ttl, Duration::from_secs(600));
    }
}
