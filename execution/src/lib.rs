//! Growbet settlement core.
//!
//! This crate moves value between accounts: in-game length (grow, loan, gift, PvP wagers,
//! purchases) and custodial token balances (token wagers, deposits, withdrawals, fee payouts).
//!
//! ## Concurrency
//! Every mutation runs inside a [`Txn`] that holds row locks on all keys it touches. Locks are
//! always taken in [`growbet_types::Key`] order, so two operations that touch the same rows in
//! opposite roles cannot deadlock. A lock that cannot be acquired within
//! [`StoreConfig::lock_timeout`] fails the operation with [`Error::LockTimeout`] and nothing is
//! written.
//!
//! ## External transfers
//! Chain calls are never made while a row lock is held. Transfers are driven by
//! [`transfer::drive`], which always checks a recorded signature before submitting again.
//!
//! The primary entrypoint is [`Engine`].

mod backoff;
mod chain;
mod dice;
mod engine;
mod error;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
mod state;
mod store;
pub mod transfer;

pub use chain::{
    ChainError, ChainGateway, ChainTransaction, KeyProvider, ProvisionedWallet, TransferInfo,
    TransferRequest, TransferSource, TxStatus,
};
#[cfg(any(test, feature = "mocks"))]
pub use dice::ScriptedDice;
pub use dice::Dice;
pub use engine::Engine;
pub use error::{Error, ErrorKind};
#[cfg(any(test, feature = "mocks"))]
pub use state::Memory;
pub use state::{State, Status};
pub use store::{Store, StoreConfig, Txn};
pub use transfer::{RetryPolicy, TransferLog, TransferResult};
