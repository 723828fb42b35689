use serde::{Deserialize, Serialize};

use crate::{ChatId, UserId};

/// Progress of an outbound chain transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Recorded, nothing submitted yet.
    Pending,
    /// Submitted with a known signature, confirmation outstanding.
    Submitted,
    Confirmed,
    /// Definitely not executed (rejected, or failed on-chain with attempts exhausted).
    Failed,
    /// Submitted but never observed confirmed within the polling budget.
    Unconfirmed,
    /// A submission timed out, so whether it was broadcast is unknown.
    Stuck,
}

impl TransferStatus {
    pub fn is_resolved(&self) -> bool {
        matches!(self, TransferStatus::Confirmed | TransferStatus::Failed)
    }
}

/// A user withdrawal from their custodial wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    pub id: u64,
    pub user: UserId,
    pub destination: String,
    pub amount: u64,
    pub status: TransferStatus,
    /// Last submitted signature. Always checked before a resubmission.
    pub signature: Option<String>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalOutcome {
    Confirmed {
        id: u64,
        signature: String,
        amount: u64,
        balance: u64,
    },
    /// Left unresolved; the relayer resumes it later. Balance untouched.
    Pending {
        id: u64,
        signature: Option<String>,
        status: TransferStatus,
    },
}

/// Step of the multi-message withdrawal wizard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DraftStep {
    AwaitingAmount,
    AwaitingAddress,
    AwaitingConfirmation,
}

/// Persisted wizard state, keyed by user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalDraft {
    pub user: UserId,
    pub step: DraftStep,
    pub amount: Option<u64>,
    pub destination: Option<String>,
    pub updated_at: u64,
}

impl WithdrawalDraft {
    pub fn new(user: UserId, now: u64) -> Self {
        Self {
            user,
            step: DraftStep::AwaitingAmount,
            amount: None,
            destination: None,
            updated_at: now,
        }
    }

    pub fn is_expired(&self, now: u64, ttl: u64) -> bool {
        now.saturating_sub(self.updated_at) > ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutKind {
    Treasury,
    GroupOwner,
}

/// One fee share owed from the house wallet after a token wager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePayout {
    pub id: u64,
    pub wager: u64,
    pub chat: ChatId,
    pub kind: PayoutKind,
    pub destination: Option<String>,
    pub amount: u64,
    pub status: TransferStatus,
    pub signature: Option<String>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl FeePayout {
    /// Payouts the relayer may still act on.
    pub fn is_dispatchable(&self) -> bool {
        self.destination.is_some()
            && matches!(
                self.status,
                TransferStatus::Pending | TransferStatus::Submitted | TransferStatus::Unconfirmed
            )
    }
}
