use serde::{Deserialize, Serialize};

use crate::{normalize_username, ChatId, PlayerRef, UserId, BPS_DENOMINATOR};

/// Who a challenge is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opponent {
    /// Bound to a known user.
    User(UserId),
    /// Only an `@mention` was available. Stored normalized; bound once on acceptance.
    Username(String),
}

impl Opponent {
    pub fn user(&self) -> Option<UserId> {
        match self {
            Opponent::User(user) => Some(*user),
            Opponent::Username(_) => None,
        }
    }

    /// Returns true if `player` is the addressee of this challenge.
    pub fn matches(&self, player: &PlayerRef) -> bool {
        match self {
            Opponent::User(user) => *user == player.id,
            Opponent::Username(username) => {
                player.normalized_username().as_deref() == Some(username.as_str())
            }
        }
    }

    pub fn from_username(username: &str) -> Option<Self> {
        normalize_username(username).map(Opponent::Username)
    }
}

/// Dice rolls of one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rolls {
    pub challenger: u8,
    pub opponent: u8,
}

impl Rolls {
    pub fn is_draw(&self) -> bool {
        self.challenger == self.opponent
    }

    pub fn challenger_wins(&self) -> bool {
        self.challenger > self.opponent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PvpStatus {
    Pending,
    /// Only observed inside the resolving transaction.
    Accepted,
    Resolved,
    Declined,
    Draw,
}

impl PvpStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PvpStatus::Resolved | PvpStatus::Declined | PvpStatus::Draw)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    pub fn can_transition(&self, next: PvpStatus) -> bool {
        matches!(
            (self, next),
            (PvpStatus::Pending, PvpStatus::Accepted)
                | (PvpStatus::Pending, PvpStatus::Declined)
                | (PvpStatus::Accepted, PvpStatus::Resolved)
                | (PvpStatus::Accepted, PvpStatus::Draw)
        )
    }
}

/// An in-game length wager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PvpWager {
    pub id: u64,
    pub chat: ChatId,
    pub challenger: UserId,
    pub opponent: Opponent,
    pub bet: u32,
    pub status: PvpStatus,
    pub rolls: Option<Rolls>,
    pub winner: Option<UserId>,
    pub created_at: u64,
    pub resolved_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PvpOutcome {
    Draw {
        rolls: Rolls,
    },
    Decided {
        rolls: Rolls,
        winner: UserId,
        loser: UserId,
        bet: u32,
        winner_total: f64,
        loser_total: f64,
        winner_streak: i32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenWagerStatus {
    Pending,
    Completed,
    Declined,
    Cancelled,
}

impl TokenWagerStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TokenWagerStatus::Pending)
    }
}

/// Division of a decisive token wager pot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub pot: u64,
    pub winner_payout: u64,
    pub treasury_fee: u64,
    pub group_owner_fee: u64,
}

impl FeeSplit {
    /// Splits a pot of `2 * bet`. Fees truncate toward zero; the winner takes the remainder.
    ///
    /// When `has_group_wallet` is false the group owner share is folded into the treasury fee.
    pub fn compute(bet: u64, treasury_bps: u16, group_owner_bps: u16, has_group_wallet: bool) -> Self {
        let pot = u128::from(bet) * 2;
        let fee = |bps: u16| pot * u128::from(bps) / u128::from(BPS_DENOMINATOR);
        let mut treasury_fee = fee(treasury_bps);
        let mut group_owner_fee = fee(group_owner_bps);
        if !has_group_wallet {
            treasury_fee += group_owner_fee;
            group_owner_fee = 0;
        }
        let winner_payout = pot.saturating_sub(treasury_fee + group_owner_fee);

        // `bet` is u64, so `pot` fits in u65; clamp the (unreachable) overflow instead of panicking.
        let narrow = |v: u128| u64::try_from(v).unwrap_or(u64::MAX);
        Self {
            pot: narrow(pot),
            winner_payout: narrow(winner_payout),
            treasury_fee: narrow(treasury_fee),
            group_owner_fee: narrow(group_owner_fee),
        }
    }

    pub fn total(&self) -> u128 {
        u128::from(self.winner_payout) + u128::from(self.treasury_fee) + u128::from(self.group_owner_fee)
    }
}

/// A custodial token wager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenWager {
    pub id: u64,
    pub chat: ChatId,
    pub challenger: UserId,
    pub opponent: Opponent,
    /// Minor units committed by each side.
    pub bet: u64,
    pub status: TokenWagerStatus,
    pub rolls: Option<Rolls>,
    pub winner: Option<UserId>,
    pub split: Option<FeeSplit>,
    pub created_at: u64,
    pub resolved_at: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenWagerOutcome {
    /// Equal rolls. Both sides refunded.
    Draw { rolls: Rolls, bet: u64 },
    Decided {
        rolls: Rolls,
        winner: UserId,
        loser: UserId,
        split: FeeSplit,
        /// Fee payout records queued for dispatch.
        payouts: Vec<u64>,
    },
}
