//! Boundary to the external blockchain and key custody.

use std::future::Future;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    /// The call did not complete in time. For a submission this means the transfer may or may
    /// not have been broadcast.
    #[error("request timed out")]
    Timeout,
    /// Transport or node error before anything was submitted.
    #[error("rpc error: {0}")]
    Rpc(String),
    /// Hard failure (for example not enough reserve for fees). Never retried.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Timeout | ChainError::Rpc(_))
    }
}

/// One token movement inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    pub destination: String,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub failed: bool,
    pub transfers: Vec<TransferInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Confirmed,
    Finalized,
    Failed,
}

impl TxStatus {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, TxStatus::Confirmed | TxStatus::Finalized)
    }
}

/// Which wallet pays for an outbound transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferSource {
    /// A user's custodial wallet, signed with its encrypted key.
    Custodial {
        address: String,
        encrypted_key: String,
    },
    /// The house wallet that holds wager escrow.
    House,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub source: TransferSource,
    pub destination: String,
    pub amount: u64,
}

/// Fallible blockchain RPC. Every call may time out; callers bound them with their own timeout.
pub trait ChainGateway: Send + Sync + 'static {
    fn get_address_balance(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<u64, ChainError>> + Send;

    /// `Ok(None)` if the transaction is unknown.
    fn get_transaction(
        &self,
        signature: &str,
    ) -> impl Future<Output = Result<Option<ChainTransaction>, ChainError>> + Send;

    /// Submits with a fresh blockhash and returns the signature.
    fn submit_transfer(
        &self,
        request: &TransferRequest,
    ) -> impl Future<Output = Result<String, ChainError>> + Send;

    fn get_transaction_status(
        &self,
        signature: &str,
    ) -> impl Future<Output = Result<TxStatus, ChainError>> + Send;
}

/// A freshly generated custodial keypair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedWallet {
    pub address: String,
    pub encrypted_key: String,
}

/// Generates and encrypts custodial keys. Encryption itself is the provider's concern.
pub trait KeyProvider: Send + Sync + 'static {
    fn generate(&self) -> impl Future<Output = anyhow::Result<ProvisionedWallet>> + Send;
}
