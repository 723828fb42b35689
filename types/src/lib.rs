//! Common types used throughout growbet.
//!
//! Defines accounts, wallets, wagers, purchases and the storage key/value layout shared by the
//! execution engines and the node.

mod account;
mod constants;
mod policy;
mod purchase;
mod state;
mod time;
pub mod token;
mod transfer;
mod wager;
mod wallet;

pub use account::*;
pub use constants::*;
pub use policy::*;
pub use purchase::*;
pub use state::{Key, Sequence, Value};
pub use time::*;
pub use transfer::*;
pub use wager::*;
pub use wallet::*;

#[cfg(test)]
mod tests;
