use growbet_types::token::FormatError;
use thiserror::Error;

use crate::ChainError;

/// Broad classification of a rejection, used by callers to decide how to respond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any mutation or network call.
    Validation,
    /// Balance below the required amount at the moment of locking.
    InsufficientFunds,
    /// Another actor changed the record first.
    Conflict,
    /// The chain gateway failed or reported a failure.
    External,
    /// A bug: state that must exist does not.
    Invariant,
    /// Temporarily unavailable (lock contention).
    Unavailable,
}

#[derive(Debug, Error)]
pub enum Error {
    // Validation
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("invalid address: {0}")]
    InvalidAddress(FormatError),
    #[error("invalid transaction reference: {0}")]
    InvalidReference(FormatError),
    #[error("amount {amount} is below the minimum of {minimum}")]
    BelowMinimum { amount: u64, minimum: u64 },
    #[error("amount {amount} is above the maximum of {maximum}")]
    AboveMaximum { amount: u64, maximum: u64 },
    #[error("cannot target yourself")]
    SelfTarget,
    #[error("invalid username {0:?}")]
    InvalidUsername(String),
    #[error("unknown package {0}")]
    UnknownPackage(u8),
    #[error("already grew today")]
    AlreadyGrewToday,
    #[error("no registered wallet")]
    NoRegisteredWallet,
    #[error("no treasury address configured")]
    NoTreasuryAddress,
    #[error("withdrawal draft is not at that step")]
    DraftStep,
    #[error("no withdrawal in progress")]
    NoDraft,

    // Insufficient funds
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: u64, available: u64 },
    #[error("the other side no longer has enough to cover the bet")]
    CounterpartyInsufficient,

    // Conflicts and lookups
    #[error("wager {0} not found")]
    WagerNotFound(u64),
    #[error("no longer available")]
    NoLongerAvailable,
    #[error("not a participant of this wager")]
    NotParticipant,
    #[error("wallet not found")]
    WalletNotFound,
    #[error("wallet balance is not zero ({0})")]
    WalletNotEmpty(u64),
    #[error("withdrawal {0} is still in progress")]
    WithdrawalInProgress(u64),
    #[error("withdrawal {0} not found")]
    WithdrawalNotFound(u64),
    #[error("fee payout {0} not found")]
    PayoutNotFound(u64),
    #[error("no pending purchase")]
    NoPendingPurchase,
    #[error("transaction reference already used")]
    ReferenceAlreadyUsed,

    // External
    #[error("transaction not found")]
    TransactionNotFound,
    #[error("transaction failed on chain")]
    TransactionFailedOnChain,
    #[error("transaction has no matching transfer")]
    TransferNotFound,
    #[error("chain gateway: {0}")]
    Chain(#[from] ChainError),
    #[error("transfer rejected: {0}")]
    TransferRejected(String),
    #[error("key provider: {0:#}")]
    KeyProvider(anyhow::Error),

    // Internal
    #[error("timed out waiting for a lock")]
    LockTimeout,
    #[error("storage: {0:#}")]
    Storage(anyhow::Error),
    #[error("invariant violated: {0}")]
    Invariant(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidAmount(_)
            | Error::InvalidAddress(_)
            | Error::InvalidReference(_)
            | Error::BelowMinimum { .. }
            | Error::AboveMaximum { .. }
            | Error::SelfTarget
            | Error::InvalidUsername(_)
            | Error::UnknownPackage(_)
            | Error::AlreadyGrewToday
            | Error::NoRegisteredWallet
            | Error::NoTreasuryAddress
            | Error::DraftStep
            | Error::NoDraft => ErrorKind::Validation,
            Error::InsufficientFunds { .. }
            | Error::InsufficientBalance { .. }
            | Error::CounterpartyInsufficient => ErrorKind::InsufficientFunds,
            Error::WagerNotFound(_)
            | Error::NoLongerAvailable
            | Error::NotParticipant
            | Error::WalletNotFound
            | Error::WalletNotEmpty(_)
            | Error::WithdrawalInProgress(_)
            | Error::WithdrawalNotFound(_)
            | Error::PayoutNotFound(_)
            | Error::NoPendingPurchase
            | Error::ReferenceAlreadyUsed => ErrorKind::Conflict,
            Error::TransactionNotFound
            | Error::TransactionFailedOnChain
            | Error::TransferNotFound
            | Error::Chain(_)
            | Error::TransferRejected(_)
            | Error::KeyProvider(_) => ErrorKind::External,
            Error::LockTimeout => ErrorKind::Unavailable,
            Error::Storage(_) | Error::Invariant(_) => ErrorKind::Invariant,
        }
    }

    /// True when the same request may succeed if simply tried again later.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::LockTimeout => true,
            // Not found may just mean the transaction has not propagated yet.
            Error::TransactionNotFound => true,
            Error::Chain(err) => err.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(Error::AlreadyGrewToday.kind(), ErrorKind::Validation);
        assert_eq!(Error::NoLongerAvailable.kind(), ErrorKind::Conflict);
        assert_eq!(
            Error::InsufficientBalance {
                required: 2,
                available: 1
            }
            .kind(),
            ErrorKind::InsufficientFunds
        );
        assert_eq!(Error::LockTimeout.kind(), ErrorKind::Unavailable);
        assert!(Error::LockTimeout.is_retriable());
        assert!(Error::Chain(ChainError::Timeout).is_retriable());
        assert!(!Error::Chain(ChainError::Rejected("fee".into())).is_retriable());
        assert!(!Error::Invariant("missing".into()).is_retriable());
    }
}
