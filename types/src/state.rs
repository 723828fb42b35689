//! Storage layout.
//!
//! Every persisted entity lives under one [`Key`]. The derived `Ord` on [`Key`] is also the global
//! lock order: multi-key transactions always acquire their row locks sorted by it.

use serde::{Deserialize, Serialize};

use crate::{
    Account, AccountKey, ChatId, CustodialWallet, DailyWinner, FeePayout, GroupOwnerWallet,
    PendingPurchase, Profile, PvpWager, Setting, SupportRequest, TokenWager, UserId,
    WithdrawalDraft, WithdrawalRecord,
};

/// Id counters.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sequence {
    PvpWager,
    TokenWager,
    Purchase,
    FeePayout,
    Withdrawal,
    SupportRequest,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    // In-game ledger
    Account(AccountKey),
    Profile(UserId),
    /// Normalized username -> user.
    Username(String),
    ChatRoster(ChatId),
    DailyWinner(ChatId),

    // Wagers
    PvpWager(u64),
    TokenWager(u64),

    // Custodial wallets
    Wallet(UserId),
    GroupWallet(ChatId),
    Withdrawal(u64),
    /// Unresolved withdrawal of a user, if any.
    ActiveWithdrawal(UserId),
    WithdrawalQueue,
    WithdrawalDraft(UserId),
    FeePayout(u64),
    PayoutQueue,

    // Purchases
    Purchase(u64),
    /// FIFO of a user's pending purchase ids.
    PurchaseQueue(UserId),
    /// Globally consumed transaction references.
    ConfirmedReference(String),

    // Misc
    Setting(String),
    SupportRequest(u64),
    Sequence(Sequence),
}

impl Key {
    /// Short table-like name of the key family.
    pub fn kind(&self) -> &'static str {
        match self {
            Key::Account(_) => "account",
            Key::Profile(_) => "profile",
            Key::Username(_) => "username",
            Key::ChatRoster(_) => "chat_roster",
            Key::DailyWinner(_) => "daily_winner",
            Key::PvpWager(_) => "pvp_wager",
            Key::TokenWager(_) => "token_wager",
            Key::Wallet(_) => "wallet",
            Key::GroupWallet(_) => "group_wallet",
            Key::Withdrawal(_) => "withdrawal",
            Key::ActiveWithdrawal(_) => "active_withdrawal",
            Key::WithdrawalQueue => "withdrawal_queue",
            Key::WithdrawalDraft(_) => "withdrawal_draft",
            Key::FeePayout(_) => "fee_payout",
            Key::PayoutQueue => "payout_queue",
            Key::Purchase(_) => "purchase",
            Key::PurchaseQueue(_) => "purchase_queue",
            Key::ConfirmedReference(_) => "confirmed_reference",
            Key::Setting(_) => "setting",
            Key::SupportRequest(_) => "support_request",
            Key::Sequence(_) => "sequence",
        }
    }

    pub fn account(user: UserId, chat: ChatId) -> Self {
        Key::Account(AccountKey::new(user, chat))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(clippy::large_enum_variant)]
pub enum Value {
    Account(Account),
    Profile(Profile),
    User(UserId),
    Roster(Vec<UserId>),
    DailyWinner(DailyWinner),
    PvpWager(PvpWager),
    TokenWager(TokenWager),
    Wallet(CustodialWallet),
    GroupWallet(GroupOwnerWallet),
    Withdrawal(WithdrawalRecord),
    WithdrawalDraft(WithdrawalDraft),
    FeePayout(FeePayout),
    Purchase(PendingPurchase),
    /// Queue or pointer of record ids.
    Ids(Vec<u64>),
    /// Consumed reference and the purchase it confirmed.
    Reference { purchase: u64, user: UserId },
    Setting(Setting),
    SupportRequest(SupportRequest),
    Counter(u64),
}
