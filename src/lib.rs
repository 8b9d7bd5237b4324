// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encrypted Power Log - Private Household Usage Ledger
//!
//! Households submit homomorphically encrypted power-usage figures to a
//! record ledger that stores them without ever seeing plaintext. Only the
//! submitting account can later decrypt its own figures, through a signed,
//! time-bounded authorization.
//!
//! ## Modules
//!
//! - `ledger` - Record ledger with owner index, stats and redb persistence
//! - `engine` - Encryption engine contract and the local development engine
//! - `client` - Decryption orchestrator, authorization cache, transports
//! - `api` - HTTP API handlers (Axum)

pub mod api;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod models;
pub mod state;
pub mod telemetry;
