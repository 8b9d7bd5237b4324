// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # HTTP Transport
//!
//! [`HttpLedger`] implements [`LedgerTransport`] against a ledger node's
//! `/v1` API. [`HttpEngineBinder`] binds to the development engine exposed by
//! the same node: encryption and decryption run on the node, authorizations
//! are signed locally by the connected account.
//!
//! Ledger errors cross the wire in the `ledger_error` field of the error body
//! and are returned unchanged; anything else becomes a transport error.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::transport::LedgerTransport;
use crate::engine::{
    AccountSigner, AuthorizationArtifact, EngineBinder, EngineError, EngineHandle, NetworkConfig,
};
use crate::error::ErrorBody;
use crate::ledger::{LedgerError, LedgerResult};
use crate::models::{
    CiphertextHandle, CountResponse, DecryptRequest, DecryptResponse, EncryptRequest,
    EncryptedInput, ExistsResponse, LedgerInfo, RecordId, RecordIdResponse, RecordIdsResponse,
    RecordMetadata, RecordUsageResponse, SignedSubmission, UserStats,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug)]
enum NodeFailure {
    Request(String),
    Rejected {
        status: StatusCode,
        body: Option<ErrorBody>,
    },
    Decode(String),
}

impl std::fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeFailure::Request(e) => write!(f, "request failed: {e}"),
            NodeFailure::Rejected {
                status,
                body: Some(body),
            } => write!(f, "node returned {status}: {}", body.error),
            NodeFailure::Rejected { status, body: None } => write!(f, "node returned {status}"),
            NodeFailure::Decode(e) => write!(f, "invalid response: {e}"),
        }
    }
}

impl From<NodeFailure> for LedgerError {
    fn from(failure: NodeFailure) -> Self {
        match failure {
            NodeFailure::Rejected {
                body:
                    Some(ErrorBody {
                        ledger_error: Some(err),
                        ..
                    }),
                ..
            } => err,
            other => LedgerError::Transport(other.to_string()),
        }
    }
}

impl From<NodeFailure> for EngineError {
    fn from(failure: NodeFailure) -> Self {
        if let NodeFailure::Rejected {
            body: Some(body), ..
        } = &failure
        {
            match body.error_code.as_str() {
                "unauthorized" => return EngineError::Unauthorized(body.error.clone()),
                "invalid_input" => return EngineError::InvalidInput(body.error.clone()),
                _ => {}
            }
        }
        EngineError::Transport(failure.to_string())
    }
}

/// JSON client for one node.
#[derive(Clone)]
struct NodeClient {
    http: Client,
    base_url: String,
}

impl NodeClient {
    fn new(base_url: &str) -> Result<Self, String> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, NodeFailure> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| NodeFailure::Request(e.to_string()))?;
        Self::decode(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, NodeFailure> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| NodeFailure::Request(e.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, NodeFailure> {
        let status = response.status();
        if !status.is_success() {
            let body = response.json::<ErrorBody>().await.ok();
            return Err(NodeFailure::Rejected { status, body });
        }
        response
            .json()
            .await
            .map_err(|e| NodeFailure::Decode(e.to_string()))
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// Ledger transport over a node's HTTP API.
#[derive(Clone)]
pub struct HttpLedger {
    node: NodeClient,
}

impl HttpLedger {
    pub fn new(base_url: &str) -> LedgerResult<Self> {
        let node = NodeClient::new(base_url).map_err(LedgerError::Transport)?;
        Ok(Self { node })
    }

    /// Contract, chain and record total of the remote ledger.
    pub async fn info(&self) -> LedgerResult<LedgerInfo> {
        Ok(self.node.get("/v1/ledger").await?)
    }
}

#[async_trait]
impl LedgerTransport for HttpLedger {
    async fn add_record(&self, submission: SignedSubmission) -> LedgerResult<RecordId> {
        let response: RecordIdResponse = self.node.post("/v1/records", &submission).await?;
        Ok(response.record_id)
    }

    async fn record_metadata(&self, id: RecordId) -> LedgerResult<RecordMetadata> {
        Ok(self.node.get(&format!("/v1/records/{id}")).await?)
    }

    async fn record_usage(&self, id: RecordId) -> LedgerResult<CiphertextHandle> {
        let response: RecordUsageResponse =
            self.node.get(&format!("/v1/records/{id}/usage")).await?;
        Ok(response.usage)
    }

    async fn user_record_count(&self, owner: Address) -> LedgerResult<u64> {
        let response: CountResponse = self
            .node
            .get(&format!("/v1/owners/{owner}/records/count"))
            .await?;
        Ok(response.count)
    }

    async fn user_record_by_index(&self, owner: Address, index: u64) -> LedgerResult<RecordId> {
        let response: RecordIdResponse = self
            .node
            .get(&format!("/v1/owners/{owner}/records/{index}"))
            .await?;
        Ok(response.record_id)
    }

    async fn user_records(&self, owner: Address) -> LedgerResult<Vec<RecordId>> {
        let response: RecordIdsResponse =
            self.node.get(&format!("/v1/owners/{owner}/records")).await?;
        Ok(response.record_ids)
    }

    async fn user_records_in_period_range(
        &self,
        owner: Address,
        min_period: u32,
        max_period: u32,
    ) -> LedgerResult<Vec<RecordId>> {
        let response: RecordIdsResponse = self
            .node
            .get(&format!(
                "/v1/owners/{owner}/records?min_period={min_period}&max_period={max_period}"
            ))
            .await?;
        Ok(response.record_ids)
    }

    async fn user_stats(&self, owner: Address) -> LedgerResult<UserStats> {
        Ok(self.node.get(&format!("/v1/owners/{owner}/stats")).await?)
    }

    async fn total_records(&self) -> LedgerResult<u64> {
        Ok(self.info().await?.total_records)
    }

    async fn record_exists(&self, id: RecordId) -> LedgerResult<bool> {
        let response: ExistsResponse = self.node.get(&format!("/v1/records/{id}/exists")).await?;
        Ok(response.exists)
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Binds to the development engine of the node at `network.rpc_url`.
#[derive(Debug, Clone)]
pub struct HttpEngineBinder {
    authorization_ttl: Duration,
}

impl HttpEngineBinder {
    pub fn new(authorization_ttl: Duration) -> Self {
        Self { authorization_ttl }
    }
}

#[async_trait]
impl EngineBinder for HttpEngineBinder {
    async fn bind_to_network(
        &self,
        network: &NetworkConfig,
    ) -> Result<Arc<dyn EngineHandle>, EngineError> {
        let node = NodeClient::new(&network.rpc_url).map_err(EngineError::Transport)?;
        let info: LedgerInfo = node.get("/v1/ledger").await?;
        if info.chain_id != network.chain_id {
            debug!(
                expected = network.chain_id,
                found = info.chain_id,
                url = %network.rpc_url,
                "Node serves a different chain"
            );
            return Err(EngineError::UnsupportedNetwork(network.chain_id));
        }

        let engine: Arc<dyn EngineHandle> = Arc::new(HttpEngine {
            node,
            chain_id: info.chain_id,
            authorization_ttl: self.authorization_ttl,
        });
        Ok(engine)
    }
}

struct HttpEngine {
    node: NodeClient,
    chain_id: u64,
    authorization_ttl: Duration,
}

#[async_trait]
impl EngineHandle for HttpEngine {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn encrypt(
        &self,
        contract: Address,
        account: Address,
        value: u32,
    ) -> Result<EncryptedInput, EngineError> {
        let request = EncryptRequest {
            contract,
            account,
            value,
        };
        Ok(self.node.post("/v1/engine/inputs", &request).await?)
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
        let request = DecryptRequest {
            handle,
            contract,
            artifact: artifact.clone(),
        };
        let response: DecryptResponse = self.node.post("/v1/engine/decrypt", &request).await?;
        Ok(response.value)
    }
}
