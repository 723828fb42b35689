//! HTTP client for the chain gateway service.
//!
//! The gateway is a small signer/RPC sidecar that holds the house key, decrypts custodial keys,
//! and talks to the chain. Endpoints (relative to the configured base URL):
//!
//! - `GET balance/{address}` -> `{"amount": u64}`
//! - `GET transactions/{signature}` -> `{"failed": bool, "transfers": [..]}`, 404 if unknown
//! - `GET transactions/{signature}/status` -> `{"status": "pending" | "confirmed" | ..}`
//! - `POST transfers` -> `{"signature": ..}`; 4xx means nothing was broadcast
//! - `POST wallets` -> `{"address": .., "encrypted_key": ..}`
//!
//! A 5xx reply other than 504 means the gateway did not broadcast anything.

use anyhow::Context;
use growbet_execution::{
    ChainError, ChainGateway, ChainTransaction, KeyProvider, ProvisionedWallet, TransferInfo,
    TransferRequest, TransferSource, TxStatus,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceBody {
    pub amount: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferBody {
    pub destination: String,
    pub amount: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionBody {
    pub failed: bool,
    pub transfers: Vec<TransferBody>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Pending,
    Confirmed,
    Finalized,
    Failed,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusBody {
    pub status: StatusKind,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceBody {
    Custodial {
        address: String,
        encrypted_key: String,
    },
    House,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitBody {
    pub source: SourceBody,
    pub destination: String,
    pub amount: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignatureBody {
    pub signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletBody {
    pub address: String,
    pub encrypted_key: String,
}

impl From<StatusKind> for TxStatus {
    fn from(kind: StatusKind) -> Self {
        match kind {
            StatusKind::Pending => TxStatus::Pending,
            StatusKind::Confirmed => TxStatus::Confirmed,
            StatusKind::Finalized => TxStatus::Finalized,
            StatusKind::Failed => TxStatus::Failed,
        }
    }
}

impl From<&TransferRequest> for SubmitBody {
    fn from(request: &TransferRequest) -> Self {
        let source = match &request.source {
            TransferSource::Custodial {
                address,
                encrypted_key,
            } => SourceBody::Custodial {
                address: address.clone(),
                encrypted_key: encrypted_key.clone(),
            },
            TransferSource::House => SourceBody::House,
        };
        Self {
            source,
            destination: request.destination.clone(),
            amount: request.amount,
        }
    }
}

fn read_error(err: reqwest::Error) -> ChainError {
    if err.is_timeout() {
        ChainError::Timeout
    } else {
        ChainError::Rpc(err.to_string())
    }
}

/// Only a failed connection proves a submission never left this process.
fn submit_error(err: reqwest::Error) -> ChainError {
    if err.is_connect() {
        ChainError::Rpc(err.to_string())
    } else {
        ChainError::Timeout
    }
}

#[derive(Clone)]
pub struct HttpChainGateway {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl HttpChainGateway {
    pub fn new(base: Url, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build gateway http client")?;
        if base.cannot_be_a_base() {
            anyhow::bail!("gateway url cannot be a base: {base}");
        }
        Ok(Self {
            client,
            base,
            token,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get(&self, segments: &[&str]) -> Result<Response, ChainError> {
        let url = self.endpoint(segments);
        debug!(%url, "gateway request");
        self.authorize(self.client.get(url))
            .send()
            .await
            .map_err(read_error)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ChainError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::GATEWAY_TIMEOUT => ChainError::Timeout,
                _ => ChainError::Rpc(format!("{status}: {body}")),
            });
        }
        response.json().await.map_err(read_error)
    }
}

impl ChainGateway for HttpChainGateway {
    async fn get_address_balance(&self, address: &str) -> Result<u64, ChainError> {
        let response = self.get(&["balance", address]).await?;
        let body: BalanceBody = Self::decode(response).await?;
        Ok(body.amount)
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<ChainTransaction>, ChainError> {
        let response = self.get(&["transactions", signature]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: TransactionBody = Self::decode(response).await?;
        Ok(Some(ChainTransaction {
            failed: body.failed,
            transfers: body
                .transfers
                .into_iter()
                .map(|t| TransferInfo {
                    destination: t.destination,
                    amount: t.amount,
                })
                .collect(),
        }))
    }

    async fn submit_transfer(&self, request: &TransferRequest) -> Result<String, ChainError> {
        let url = self.endpoint(&["transfers"]);
        let response = self
            .authorize(self.client.post(url))
            .json(&SubmitBody::from(request))
            .send()
            .await
            .map_err(submit_error)?;
        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, %body, destination = %request.destination, amount = request.amount, "transfer rejected by gateway");
            return Err(ChainError::Rejected(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::GATEWAY_TIMEOUT => ChainError::Timeout,
                _ => ChainError::Rpc(format!("{status}: {body}")),
            });
        }
        // The transfer was broadcast. Losing the signature now is indistinguishable from a timeout.
        let body: SignatureBody = response.json().await.map_err(|_| ChainError::Timeout)?;
        Ok(body.signature)
    }

    async fn get_transaction_status(&self, signature: &str) -> Result<TxStatus, ChainError> {
        let response = self.get(&["transactions", signature, "status"]).await?;
        let body: StatusBody = Self::decode(response).await?;
        Ok(body.status.into())
    }
}

impl KeyProvider for HttpChainGateway {
    async fn generate(&self) -> anyhow::Result<ProvisionedWallet> {
        let url = self.endpoint(&["wallets"]);
        let response = self
            .authorize(self.client.post(url))
            .send()
            .await
            .context("request custodial wallet")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("wallet provisioning failed: {status}: {body}");
        }
        let body: WalletBody = response.json().await.context("decode wallet")?;
        Ok(ProvisionedWallet {
            address: body.address,
            encrypted_key: body.encrypted_key,
        })
    }
}
