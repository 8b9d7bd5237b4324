// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::LocalEngine;
use crate::ledger::{LedgerIdentity, RecordLedger};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<RecordLedger>,
    /// Development engine; also the ledger's input verifier.
    pub engine: Arc<LocalEngine>,
    /// Location of the ledger database, if persistent.
    pub ledger_path: Option<PathBuf>,
}

impl AppState {
    pub fn new(ledger: Arc<RecordLedger>, engine: Arc<LocalEngine>) -> Self {
        Self {
            ledger,
            engine,
            ledger_path: None,
        }
    }

    pub fn with_ledger_path(mut self, path: PathBuf) -> Self {
        self.ledger_path = Some(path);
        self
    }

    /// Memory-only ledger backed by a fresh development engine.
    pub fn in_memory(identity: LedgerIdentity) -> Self {
        let engine = Arc::new(LocalEngine::new(identity.chain_id));
        let ledger = Arc::new(RecordLedger::new(identity, engine.clone()));
        Self::new(ledger, engine)
    }
}
