// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Decryption Orchestrator
//!
//! Client-side coordinator between a connected account, the encryption
//! engine and the record ledger. It binds an engine context per network,
//! submits encrypted records, loads the account's records and decrypts them
//! on request.
//!
//! ## Staleness
//!
//! Every identity change bumps a generation counter and resets the session.
//! Each operation captures a [`Ticket`] (generation plus identity) when it
//! starts and re-checks it before applying results, so a result produced for
//! a previous account or network is reported as [`Completion::Stale`] and
//! never reaches the session state.
//!
//! ## Concurrency
//!
//! - At most one submission runs at a time; a second is rejected with
//!   [`OrchestratorError::SubmissionInFlight`].
//! - Concurrent decrypt requests for the same record share one engine call.
//! - Authorization artifacts are created at most once per
//!   (chain, contract, account) and reused until they expire.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alloy::primitives::{Address, Bytes};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::auth_cache::{AuthorizationCache, AuthorizationKey};
use super::error::{OrchestratorError, SubmissionFailure};
use super::session::{
    Completion, ConnectedAccount, EngineStatus, IdentityFeed, Operation, RecordView,
    SessionIdentity, SessionSnapshot,
};
use super::transport::LedgerTransport;
use crate::config::OrchestratorConfig;
use crate::engine::{EngineBinder, EngineError, EngineHandle, NetworkConfig};
use crate::ledger::{LedgerError, LedgerResult};
use crate::models::{
    is_valid_period, scale_usage, CiphertextHandle, RecordId, RecordSubmission, SignedSubmission,
    UserStats, MAX_PERIOD_DAYS, MIN_PERIOD_DAYS,
};

type DecryptOutcome = Result<Completion<u32>, OrchestratorError>;

enum EngineState {
    Idle,
    Binding,
    Ready(Arc<dyn EngineHandle>),
    Failed(String),
}

impl EngineState {
    fn status(&self) -> EngineStatus {
        match self {
            EngineState::Idle => EngineStatus::Idle,
            EngineState::Binding => EngineStatus::Binding,
            EngineState::Ready(_) => EngineStatus::Ready,
            EngineState::Failed(reason) => EngineStatus::Failed(reason.clone()),
        }
    }
}

/// Identity and engine captured at the start of an operation.
#[derive(Clone)]
struct Ticket {
    generation: u64,
    identity: SessionIdentity,
    account: ConnectedAccount,
    engine: Arc<dyn EngineHandle>,
    /// Authorization cache epoch; artifacts created for an older one are not cached.
    auth_epoch: u64,
}

struct SessionState {
    generation: u64,
    account: Option<ConnectedAccount>,
    engine: EngineState,
    records: Vec<RecordView>,
    stats: Option<UserStats>,
    loading: bool,
    decrypting: BTreeSet<RecordId>,
    errors: BTreeMap<Operation, String>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            generation: 0,
            account: None,
            engine: EngineState::Idle,
            records: Vec::new(),
            stats: None,
            loading: false,
            decrypting: BTreeSet::new(),
            errors: BTreeMap::new(),
        }
    }

    fn identity(&self) -> Option<SessionIdentity> {
        self.account.as_ref().map(ConnectedAccount::identity)
    }

    fn is_current(&self, ticket: &Ticket) -> bool {
        self.generation == ticket.generation && self.identity() == Some(ticket.identity)
    }

    fn ticket(&self, auth_epoch: u64) -> Result<Ticket, OrchestratorError> {
        let account = self
            .account
            .clone()
            .ok_or_else(|| OrchestratorError::Validation("No account connected".into()))?;
        let EngineState::Ready(engine) = &self.engine else {
            return Err(OrchestratorError::Validation(
                "Encryption engine is not ready".into(),
            ));
        };

        Ok(Ticket {
            generation: self.generation,
            identity: account.identity(),
            account,
            engine: engine.clone(),
            auth_epoch,
        })
    }
}

enum IdentityChange {
    Unchanged,
    Disconnected,
    Bind { generation: u64, network: NetworkConfig },
}

struct InFlight {
    generation: u64,
    outcome: Shared<BoxFuture<'static, DecryptOutcome>>,
}

/// Releases the submission slot on drop.
struct SubmitGuard<'a>(&'a AtomicBool);

impl<'a> SubmitGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SubmitGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Inner {
    contract: Address,
    binder: Arc<dyn EngineBinder>,
    ledger: Arc<dyn LedgerTransport>,
    auth_cache: AuthorizationCache,
    session: Mutex<SessionState>,
    /// Lock order: `session` before `in_flight`.
    in_flight: Mutex<HashMap<RecordId, InFlight>>,
    submitting: AtomicBool,
}

/// Client-side orchestrator for one user session.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct DecryptionOrchestrator {
    inner: Arc<Inner>,
}

impl DecryptionOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        binder: Arc<dyn EngineBinder>,
        ledger: Arc<dyn LedgerTransport>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                contract: config.contract,
                binder,
                ledger,
                auth_cache: AuthorizationCache::new(config.authorization_cache_capacity),
                session: Mutex::new(SessionState::new()),
                in_flight: Mutex::new(HashMap::new()),
                submitting: AtomicBool::new(false),
            }),
        }
    }

    pub fn contract(&self) -> Address {
        self.inner.contract
    }

    pub fn authorization_cache(&self) -> &AuthorizationCache {
        &self.inner.auth_cache
    }

    fn session(&self) -> MutexGuard<'_, SessionState> {
        self.inner
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<RecordId, InFlight>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, ticket: &Ticket) -> bool {
        self.session().is_current(ticket)
    }

    fn ticket(&self) -> Result<Ticket, OrchestratorError> {
        // Identity changes invalidate the cache under the session lock.
        self.session().ticket(self.inner.auth_cache.epoch())
    }

    /// Apply `update` if `ticket` is still current. Returns whether it was.
    fn update_current(&self, ticket: &Ticket, update: impl FnOnce(&mut SessionState)) -> bool {
        let mut state = self.session();
        if !state.is_current(ticket) {
            return false;
        }
        update(&mut state);
        true
    }

    fn record_outcome<T>(
        &self,
        ticket: &Ticket,
        operation: Operation,
        result: &Result<T, OrchestratorError>,
    ) {
        self.update_current(ticket, |state| match result {
            Ok(_) => {
                state.errors.remove(&operation);
            }
            Err(e) => {
                state.errors.insert(operation, e.to_string());
            }
        });
    }

    /// Point-in-time copy of the session state.
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.session();
        SessionSnapshot {
            identity: state.identity(),
            engine: state.engine.status(),
            records: state.records.clone(),
            stats: state.stats,
            submitting: self.inner.submitting.load(Ordering::Acquire),
            loading: state.loading,
            decrypting: state.decrypting.clone(),
            errors: state.errors.clone(),
        }
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Reset the session for `account` and start a new generation.
    ///
    /// Reconnecting the same identity only refreshes the signer, unless the
    /// previous binding failed.
    fn apply_identity(&self, account: Option<ConnectedAccount>) -> IdentityChange {
        let mut state = self.session();

        let same_identity = state.identity() == account.as_ref().map(ConnectedAccount::identity);
        if same_identity && !matches!(state.engine, EngineState::Failed(_)) {
            state.account = account;
            return IdentityChange::Unchanged;
        }

        state.generation += 1;
        state.records.clear();
        state.stats = None;
        state.loading = false;
        state.decrypting.clear();
        state.errors.clear();
        state.engine = match &account {
            Some(_) => EngineState::Binding,
            None => EngineState::Idle,
        };
        let network = account.as_ref().map(|a| a.network.clone());
        state.account = account;
        let generation = state.generation;

        self.inner.auth_cache.invalidate_all();
        self.in_flight().clear();

        info!(
            generation,
            identity = ?state.identity(),
            "Session identity changed"
        );

        match network {
            Some(network) => IdentityChange::Bind {
                generation,
                network,
            },
            None => IdentityChange::Disconnected,
        }
    }

    async fn bind_engine(
        &self,
        generation: u64,
        network: NetworkConfig,
    ) -> Result<Completion<()>, OrchestratorError> {
        debug!(chain_id = network.chain_id, network = %network.name, "Binding engine");
        let bound = self.inner.binder.bind_to_network(&network).await;

        let mut state = self.session();
        if state.generation != generation {
            debug!(chain_id = network.chain_id, "Discarding superseded engine binding");
            return Ok(Completion::Stale);
        }

        match bound {
            Ok(engine) => {
                state.engine = EngineState::Ready(engine);
                state.errors.remove(&Operation::EngineBinding);
                info!(chain_id = network.chain_id, "Engine ready");
                Ok(Completion::Fulfilled(()))
            }
            Err(e) => {
                let reason = e.to_string();
                state.engine = EngineState::Failed(reason.clone());
                state.errors.insert(Operation::EngineBinding, reason.clone());
                warn!(chain_id = network.chain_id, error = %reason, "Engine binding failed");
                Err(OrchestratorError::Engine(reason))
            }
        }
    }

    /// Switch the session to `account` (or disconnect) and bind the engine.
    ///
    /// Any operation still running for the previous identity completes as
    /// [`Completion::Stale`].
    pub async fn connect(
        &self,
        account: Option<ConnectedAccount>,
    ) -> Result<Completion<()>, OrchestratorError> {
        match self.apply_identity(account) {
            IdentityChange::Unchanged | IdentityChange::Disconnected => {
                Ok(Completion::Fulfilled(()))
            }
            IdentityChange::Bind {
                generation,
                network,
            } => self.bind_engine(generation, network).await,
        }
    }

    fn spawn_connect(&self, account: Option<ConnectedAccount>) {
        if let IdentityChange::Bind {
            generation,
            network,
        } = self.apply_identity(account)
        {
            let this = self.clone();
            tokio::spawn(async move {
                // Failures are recorded in the session state.
                let _ = this.bind_engine(generation, network).await;
            });
        }
    }

    /// Follow the identity feed until it closes or `shutdown` fires.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(orchestrator.clone().run(feed, shutdown.clone()));
    /// ```
    pub async fn run(self, mut feed: IdentityFeed, shutdown: CancellationToken) {
        info!(contract = %self.inner.contract, "Decryption orchestrator starting");

        let initial = feed.borrow_and_update().clone();
        self.spawn_connect(initial);

        loop {
            tokio::select! {
                changed = feed.changed() => {
                    if changed.is_err() {
                        info!("Identity feed closed, decryption orchestrator stopping");
                        return;
                    }
                    let account = feed.borrow_and_update().clone();
                    self.spawn_connect(account);
                }
                _ = shutdown.cancelled() => {
                    info!("Decryption orchestrator shutting down");
                    return;
                }
            }
        }
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Encrypt `usage_kwh`, submit it with `period_days` and refresh the
    /// record list.
    ///
    /// Inputs are validated before anything is sent. Returns the new record
    /// id once the ledger accepted it, or `Stale` if the identity changed
    /// before the submission was sent.
    pub async fn submit_record(
        &self,
        usage_kwh: f64,
        period_days: u32,
    ) -> Result<Completion<RecordId>, OrchestratorError> {
        let scaled = scale_usage(usage_kwh).map_err(OrchestratorError::Validation)?;
        if !is_valid_period(period_days) {
            return Err(OrchestratorError::Validation(format!(
                "Period must be between {MIN_PERIOD_DAYS} and {MAX_PERIOD_DAYS} days, got {period_days}"
            )));
        }

        let ticket = self.ticket()?;
        if ticket.account.signer.is_none() {
            return Err(OrchestratorError::Validation(format!(
                "Account {} is connected read-only",
                ticket.identity.account
            )));
        }

        let _guard =
            SubmitGuard::acquire(&self.inner.submitting).ok_or(OrchestratorError::SubmissionInFlight)?;

        let result = self.submit_with(&ticket, scaled, period_days).await;
        if let Ok(Completion::Fulfilled(_)) | Err(_) = &result {
            self.record_outcome(&ticket, Operation::Submit, &result);
        }

        if let Ok(Completion::Fulfilled(record_id)) = &result {
            match self.load_with(&ticket).await {
                Ok(Completion::Fulfilled(_)) => {}
                Ok(Completion::Stale) => {
                    debug!(record_id, "Identity changed before post-submit refresh");
                }
                Err(e) => {
                    warn!(record_id, error = %e, "Post-submit refresh failed");
                }
            }
        }
        result
    }

    async fn submit_with(
        &self,
        ticket: &Ticket,
        scaled_usage: u32,
        period: u32,
    ) -> Result<Completion<RecordId>, OrchestratorError> {
        let contract = self.inner.contract;
        let owner = ticket.identity.account;
        let Some(signer) = &ticket.account.signer else {
            return Err(OrchestratorError::Validation(format!(
                "Account {owner} is connected read-only"
            )));
        };

        let input = ticket
            .engine
            .encrypt(contract, owner, scaled_usage)
            .await
            .map_err(|e| OrchestratorError::Submission(SubmissionFailure::Engine(e.to_string())))?;

        let submission = RecordSubmission {
            owner,
            input,
            period,
        };
        let digest = submission.signing_digest(ticket.identity.chain_id, contract);
        let signature = signer
            .sign_message(digest.as_slice())
            .await
            .map_err(|e| OrchestratorError::Submission(SubmissionFailure::Signing(e.to_string())))?;

        if !self.is_current(ticket) {
            debug!(owner = %owner, "Identity changed before submission was sent");
            return Ok(Completion::Stale);
        }

        let record_id = self
            .inner
            .ledger
            .add_record(SignedSubmission {
                submission,
                signature: Bytes::copy_from_slice(&signature.as_bytes()),
            })
            .await
            .map_err(|e| OrchestratorError::Submission(SubmissionFailure::Ledger(e)))?;

        info!(record_id, owner = %owner, period, "Record submitted");
        Ok(Completion::Fulfilled(record_id))
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Replace the record list and stats with the connected account's
    /// records. Returns how many records were loaded.
    ///
    /// The list is replaced wholesale; values decrypted for the previous
    /// list are dropped with it.
    pub async fn load_user_records(&self) -> Result<Completion<usize>, OrchestratorError> {
        let ticket = self.ticket()?;
        self.load_with(&ticket).await
    }

    async fn load_with(&self, ticket: &Ticket) -> Result<Completion<usize>, OrchestratorError> {
        if !self.update_current(ticket, |state| state.loading = true) {
            return Ok(Completion::Stale);
        }

        let fetched = self.fetch_records(ticket.identity.account).await;

        let mut state = self.session();
        if !state.is_current(ticket) {
            debug!(account = %ticket.identity.account, "Discarding stale record list");
            return Ok(Completion::Stale);
        }
        state.loading = false;

        match fetched {
            Ok((records, stats)) => {
                let count = records.len();
                state.records = records;
                state.stats = Some(stats);
                state.errors.remove(&Operation::Load);
                debug!(account = %ticket.identity.account, count, "Loaded user records");
                Ok(Completion::Fulfilled(count))
            }
            Err(e) => {
                let err = OrchestratorError::Ledger(e);
                state.errors.insert(Operation::Load, err.to_string());
                Err(err)
            }
        }
    }

    async fn fetch_records(&self, owner: Address) -> LedgerResult<(Vec<RecordView>, UserStats)> {
        let ledger = &self.inner.ledger;
        let ids = ledger.user_records(owner).await?;

        let records = futures::future::try_join_all(ids.into_iter().map(|id| async move {
            let (metadata, usage) =
                futures::try_join!(ledger.record_metadata(id), ledger.record_usage(id))?;
            Ok::<_, LedgerError>(RecordView::new(id, metadata, usage))
        }))
        .await?;

        let stats = ledger.user_stats(owner).await?;
        Ok((records, stats))
    }

    /// Ids of the connected account's records with a period in
    /// `[min_period, max_period]`.
    pub async fn records_in_period_range(
        &self,
        min_period: u32,
        max_period: u32,
    ) -> Result<Completion<Vec<RecordId>>, OrchestratorError> {
        let ticket = self.ticket()?;
        let ids = self
            .inner
            .ledger
            .user_records_in_period_range(ticket.identity.account, min_period, max_period)
            .await?;

        if !self.is_current(&ticket) {
            return Ok(Completion::Stale);
        }
        Ok(Completion::Fulfilled(ids))
    }

    // =========================================================================
    // Decryption
    // =========================================================================

    /// Decrypt the usage of `record_id` for the connected account.
    ///
    /// Already decrypted records return immediately. Concurrent calls for
    /// the same record share one engine request, which runs as its own task
    /// and settles even if every caller goes away. Records outside the
    /// loaded list are looked up on the ledger; decrypting someone else's
    /// record fails with an authorization error.
    pub async fn decrypt_record(&self, record_id: RecordId) -> DecryptOutcome {
        let (ticket, loaded_handle) = {
            let state = self.session();
            let ticket = state.ticket(self.inner.auth_cache.epoch())?;
            let view = state.records.iter().find(|r| r.id == record_id);
            if let Some(value) = view.and_then(|v| v.decrypted) {
                return Ok(Completion::Fulfilled(value));
            }
            (ticket, view.map(|v| v.usage))
        };

        let generation = ticket.generation;
        let outcome = {
            let mut in_flight = self.in_flight();
            match in_flight.get(&record_id) {
                Some(entry) if entry.generation == generation => {
                    debug!(record_id, "Joining in-flight decryption");
                    entry.outcome.clone()
                }
                _ => {
                    // Spawned while holding `in_flight`, so the task cannot
                    // release its entry before it is inserted.
                    let task =
                        tokio::spawn(self.clone().decrypt_task(ticket, record_id, loaded_handle));
                    let outcome = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(OrchestratorError::Engine(format!(
                                "decryption task failed: {e}"
                            )))
                        })
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(
                        record_id,
                        InFlight {
                            generation,
                            outcome: outcome.clone(),
                        },
                    );
                    outcome
                }
            }
        };

        outcome.await
    }

    async fn decrypt_task(
        self,
        ticket: Ticket,
        record_id: RecordId,
        loaded_handle: Option<CiphertextHandle>,
    ) -> DecryptOutcome {
        self.update_current(&ticket, |state| {
            state.decrypting.insert(record_id);
        });

        let result = match loaded_handle {
            Some(handle) => self.authorize_and_decrypt(&ticket, handle).await,
            None => match self.inner.ledger.record_usage(record_id).await {
                Ok(handle) => self.authorize_and_decrypt(&ticket, handle).await,
                Err(e) => Err(OrchestratorError::Ledger(e)),
            },
        };

        let outcome = self.commit_decryption(&ticket, record_id, result);
        self.release_in_flight(record_id, ticket.generation);
        outcome
    }

    async fn authorize_and_decrypt(&self, ticket: &Ticket, handle: CiphertextHandle) -> DecryptOutcome {
        let contract = self.inner.contract;
        let account = ticket.identity.account;
        let key = AuthorizationKey {
            chain_id: ticket.identity.chain_id,
            contract,
            account,
        };

        let engine = &ticket.engine;
        let signer = ticket.account.signer.as_deref();
        let artifact = self
            .inner
            .auth_cache
            .get_or_create_in(key, ticket.auth_epoch, move || async move {
                let signer = signer.ok_or_else(|| {
                    OrchestratorError::Authorization(format!(
                        "Account {account} cannot sign a decryption authorization"
                    ))
                })?;
                debug!(account = %account, "Requesting decryption authorization");
                engine
                    .create_authorization(contract, account, signer)
                    .await
                    .map_err(|e| OrchestratorError::Authorization(e.to_string()))
            })
            .await?;

        if !self.is_current(ticket) {
            return Ok(Completion::Stale);
        }

        match ticket
            .engine
            .authorized_decrypt(handle, contract, &artifact)
            .await
        {
            Ok(value) => Ok(Completion::Fulfilled(value)),
            Err(EngineError::Unauthorized(reason)) => {
                self.inner.auth_cache.invalidate(&key);
                Err(OrchestratorError::Authorization(reason))
            }
            Err(e) => Err(OrchestratorError::Engine(e.to_string())),
        }
    }

    fn commit_decryption(
        &self,
        ticket: &Ticket,
        record_id: RecordId,
        result: DecryptOutcome,
    ) -> DecryptOutcome {
        let mut state = self.session();
        if !state.is_current(ticket) {
            debug!(record_id, "Discarding stale decryption");
            return Ok(Completion::Stale);
        }
        state.decrypting.remove(&record_id);

        match result {
            Ok(Completion::Fulfilled(value)) => {
                if let Some(view) = state.records.iter_mut().find(|r| r.id == record_id) {
                    view.decrypted = Some(value);
                }
                state.errors.remove(&Operation::Decrypt);
                debug!(record_id, "Record decrypted");
                Ok(Completion::Fulfilled(value))
            }
            Ok(Completion::Stale) => Ok(Completion::Stale),
            Err(e) => {
                state.errors.insert(Operation::Decrypt, e.to_string());
                Err(e)
            }
        }
    }

    fn release_in_flight(&self, record_id: RecordId, generation: u64) {
        let mut in_flight = self.in_flight();
        if in_flight
            .get(&record_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            in_flight.remove(&record_id);
        }
    }
}
