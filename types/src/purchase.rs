use serde::{Deserialize, Serialize};

use crate::{ChatId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseStatus {
    Pending,
    Confirmed,
}

/// A requested purchase of paid length awaiting proof of payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPurchase {
    pub id: u64,
    pub user: UserId,
    pub chat: ChatId,
    pub package: u8,
    /// Expected payment in minor units.
    pub price: u64,
    pub growth: u32,
    pub recipient: String,
    pub status: PurchaseStatus,
    /// Set only on confirmation.
    pub reference: Option<String>,
    pub created_at: u64,
    pub confirmed_at: Option<u64>,
}

/// Payment instructions returned when a purchase is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub id: u64,
    pub package: u8,
    pub price: u64,
    pub growth: u32,
    pub recipient: String,
    /// Earlier requests that will be verified before this one.
    pub queued_ahead: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOutcome {
    pub purchase: u64,
    pub reference: String,
    pub growth: u32,
    pub paid_length: f64,
    pub total: f64,
}

/// A stored request for operator help.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportRequest {
    pub id: u64,
    pub user: UserId,
    pub contact: String,
    pub resolved: bool,
    pub created_at: u64,
}

/// Operator override in the key/value settings table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub value: String,
    pub set_by: Option<UserId>,
    pub updated_at: u64,
}

/// Settings keys read by the engines.
pub mod settings {
    pub const TREASURY_ADDRESS: &str = "treasury_address";

    pub fn package_price(number: u8) -> String {
        format!("package.{number}.price")
    }

    pub fn package_growth(number: u8) -> String {
        format!("package.{number}.growth")
    }
}
