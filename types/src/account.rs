use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    same_utc_day, DEBT_RELIEF_RATE, DEBT_REPAYMENT_RATE, MAX_NAME_LENGTH, SECONDS_PER_DAY,
};

/// Chat-platform user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Chat identifier. Group chats are usually negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// In-game accounts are scoped per (user, chat).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    pub user: UserId,
    pub chat: ChatId,
}

impl AccountKey {
    pub fn new(user: UserId, chat: ChatId) -> Self {
        Self { user, chat }
    }
}

/// Normalizes a username for case-insensitive matching (`@Alice` and `alice` are equal).
pub fn normalize_username(username: &str) -> Option<String> {
    let trimmed = username.trim().trim_start_matches('@');
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_lowercase())
}

/// A player as resolved by the front-end before entering the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRef {
    pub id: UserId,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

impl PlayerRef {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            username: None,
            display_name: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn normalized_username(&self) -> Option<String> {
        self.username.as_deref().and_then(normalize_username)
    }
}

/// The other side of a challenge: either known by id or only by an `@mention`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpponentRef {
    Player(PlayerRef),
    Username(String),
}

/// Chat-independent user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user: UserId,
    pub username: Option<String>,
    pub display_name: Option<String>,
    /// The user's own external wallet, registered for purchases.
    pub wallet_address: Option<String>,
    pub created_at: u64,
}

impl Profile {
    pub fn new(player: &PlayerRef, now: u64) -> Self {
        Self {
            user: player.id,
            username: player.username.as_deref().map(clip_name),
            display_name: player.display_name.as_deref().map(clip_name),
            wallet_address: None,
            created_at: now,
        }
    }

    /// Applies the latest names seen at the front-end. Returns true if anything changed.
    pub fn refresh(&mut self, player: &PlayerRef) -> bool {
        let username = player.username.as_deref().map(clip_name);
        let display_name = player.display_name.as_deref().map(clip_name);
        let mut changed = false;
        if username.is_some() && username != self.username {
            self.username = username;
            changed = true;
        }
        if display_name.is_some() && display_name != self.display_name {
            self.display_name = display_name;
            changed = true;
        }
        changed
    }

    pub fn normalized_username(&self) -> Option<String> {
        self.username.as_deref().and_then(normalize_username)
    }
}

fn clip_name(name: &str) -> String {
    name.trim().chars().take(MAX_NAME_LENGTH).collect()
}

/// PvP record. `streak` is positive for consecutive wins, negative for consecutive losses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvpRecord {
    pub wins: u32,
    pub losses: u32,
    pub streak: i32,
}

impl PvpRecord {
    pub fn record_win(&mut self) {
        self.wins = self.wins.saturating_add(1);
        self.streak = if self.streak > 0 {
            self.streak.saturating_add(1)
        } else {
            1
        };
    }

    pub fn record_loss(&mut self) {
        self.losses = self.losses.saturating_add(1);
        self.streak = if self.streak < 0 {
            self.streak.saturating_sub(1)
        } else {
            -1
        };
    }
}

/// In-game account for one user in one chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub user: UserId,
    pub chat: ChatId,
    /// Earned length. May be negative.
    pub free_length: f64,
    /// Purchased length. Only credited by verified purchases.
    pub paid_length: f64,
    pub debt: f64,
    pub last_grow: Option<u64>,
    pub last_active: u64,
    pub created_at: u64,
    pub pvp: PvpRecord,
}

/// Result of a daily grow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowOutcome {
    pub raw_delta: i32,
    pub old_length: f64,
    pub new_length: f64,
    /// Amount that actually reached free length (after bonus and debt repayment).
    pub applied: f64,
    pub bonus: f64,
    pub repaid: f64,
    pub debt: f64,
    pub total: f64,
}

/// Result of a loan request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LoanOutcome {
    Applied { borrowed: f64, debt: f64 },
    NotApplicable { length: f64, debt: f64 },
}

/// Amounts taken from each component of the sender's length by a gift.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GiftDebit {
    pub from_free: f64,
    pub from_paid: f64,
}

impl Account {
    pub fn new(key: AccountKey, now: u64) -> Self {
        Self {
            user: key.user,
            chat: key.chat,
            free_length: 0.0,
            paid_length: 0.0,
            debt: 0.0,
            last_grow: None,
            last_active: now,
            created_at: now,
            pvp: PvpRecord::default(),
        }
    }

    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.user, self.chat)
    }

    /// Displayable length.
    pub fn total(&self) -> f64 {
        self.free_length + self.paid_length
    }

    pub fn can_grow_at(&self, now: u64) -> bool {
        match self.last_grow {
            Some(last) => !same_utc_day(last, now) && now > last,
            None => true,
        }
    }

    /// True if the account grew within the trailing `days` days.
    pub fn grew_within(&self, now: u64, days: u64) -> bool {
        match self.last_grow {
            Some(last) => now.saturating_sub(last) <= days.saturating_mul(SECONDS_PER_DAY),
            None => false,
        }
    }

    /// Applies one daily growth step. Callers enforce the once-per-day rule.
    pub fn apply_grow(&mut self, raw_delta: i32, now: u64) -> GrowOutcome {
        let old_length = self.free_length;
        let growth = f64::from(raw_delta);

        // Debt never compounds: the relief bonus only applies to positive growth.
        let bonus = if old_length < 0.0 && raw_delta > 0 {
            old_length.abs() * DEBT_RELIEF_RATE * growth
        } else {
            0.0
        };

        let mut applied = growth + bonus;
        let mut repaid = 0.0;
        if self.debt > 0.0 && applied > 0.0 {
            repaid = self.debt.min(applied * DEBT_REPAYMENT_RATE);
            self.debt -= repaid;
            applied -= repaid;
        }

        self.free_length += applied;
        self.last_grow = Some(now);
        self.last_active = now;

        GrowOutcome {
            raw_delta,
            old_length,
            new_length: self.free_length,
            applied,
            bonus,
            repaid,
            debt: self.debt,
            total: self.total(),
        }
    }

    /// Converts negative free length into debt.
    pub fn apply_loan(&mut self, now: u64) -> LoanOutcome {
        if self.free_length >= 0.0 {
            return LoanOutcome::NotApplicable {
                length: self.free_length,
                debt: self.debt,
            };
        }
        let borrowed = self.free_length.abs();
        self.debt += borrowed;
        self.free_length = 0.0;
        self.last_active = now;
        LoanOutcome::Applied {
            borrowed,
            debt: self.debt,
        }
    }

    /// Removes `amount` from free length first, spilling into paid length once free length is
    /// exhausted. A negative free length is left as is. Callers check `total() >= amount`
    /// beforehand.
    pub fn debit_for_gift(&mut self, amount: f64) -> GiftDebit {
        let from_free = self.free_length.max(0.0).min(amount);
        let from_paid = amount - from_free;
        self.free_length -= from_free;
        self.paid_length -= from_paid;
        GiftDebit {
            from_free,
            from_paid,
        }
    }
}

/// Result of a gift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GiftOutcome {
    pub amount: f64,
    pub debit: GiftDebit,
    pub sender_total: f64,
    pub receiver_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user: UserId,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub total: f64,
}

/// The stored winner of a chat's daily draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyWinner {
    pub chat: ChatId,
    pub user: UserId,
    pub day: u64,
    pub bonus: f64,
    pub selected_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DailyWinnerOutcome {
    Selected { winner: DailyWinner, new_total: f64 },
    AlreadySelected(DailyWinner),
    NoEligibleAccounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new(AccountKey::new(UserId(1), ChatId(-100)), 0)
    }

    #[test]
    fn grow_adds_debt_relief_bonus_for_negative_length() {
        let mut account = account();
        account.free_length = -10.0;
        let outcome = account.apply_grow(20, 1_000);
        assert!((outcome.bonus - 0.4).abs() < 1e-9);
        assert!((outcome.applied - 20.4).abs() < 1e-9);
        assert!((account.free_length - 10.4).abs() < 1e-9);
        assert_eq!(outcome.repaid, 0.0);
    }

    #[test]
    fn shrink_never_earns_bonus() {
        let mut account = account();
        account.free_length = -10.0;
        let outcome = account.apply_grow(-5, 1_000);
        assert_eq!(outcome.bonus, 0.0);
        assert_eq!(account.free_length, -15.0);
    }

    #[test]
    fn grow_diverts_a_fifth_to_debt() {
        let mut account = account();
        account.debt = 100.0;
        let outcome = account.apply_grow(10, 1_000);
        assert!((outcome.repaid - 2.0).abs() < 1e-9);
        assert!((account.debt - 98.0).abs() < 1e-9);
        assert!((account.free_length - 8.0).abs() < 1e-9);
    }

    #[test]
    fn repayment_is_capped_by_outstanding_debt() {
        let mut account = account();
        account.debt = 1.0;
        let outcome = account.apply_grow(20, 1_000);
        assert_eq!(outcome.repaid, 1.0);
        assert_eq!(account.debt, 0.0);
        assert_eq!(account.free_length, 19.0);
    }

    #[test]
    fn loan_moves_negative_length_into_debt() {
        let mut account = account();
        account.free_length = -12.5;
        account.debt = 3.0;
        let outcome = account.apply_loan(5);
        assert_eq!(
            outcome,
            LoanOutcome::Applied {
                borrowed: 12.5,
                debt: 15.5
            }
        );
        assert_eq!(account.free_length, 0.0);
    }

    #[test]
    fn loan_is_not_applicable_for_non_negative_length() {
        let mut account = account();
        account.free_length = 0.0;
        assert!(matches!(
            account.apply_loan(5),
            LoanOutcome::NotApplicable { .. }
        ));
        assert_eq!(account.debt, 0.0);
    }

    #[test]
    fn gift_spills_into_paid_length() {
        let mut account = account();
        account.free_length = 3.0;
        account.paid_length = 10.0;
        let debit = account.debit_for_gift(5.0);
        assert_eq!(debit.from_free, 3.0);
        assert_eq!(debit.from_paid, 2.0);
        assert_eq!(account.free_length, 0.0);
        assert_eq!(account.paid_length, 8.0);
    }

    #[test]
    fn gift_leaves_negative_free_length_alone() {
        let mut account = account();
        account.free_length = -5.0;
        account.paid_length = 10.0;
        let debit = account.debit_for_gift(3.0);
        assert_eq!(debit.from_free, 0.0);
        assert_eq!(debit.from_paid, 3.0);
        assert_eq!(account.free_length, -5.0);
        assert_eq!(account.paid_length, 7.0);
    }

    #[test]
    fn one_grow_per_utc_day() {
        let mut account = account();
        let day = 20_000 * SECONDS_PER_DAY;
        assert!(account.can_grow_at(day + 10));
        account.apply_grow(1, day + 10);
        assert!(!account.can_grow_at(day + SECONDS_PER_DAY - 1));
        assert!(account.can_grow_at(day + SECONDS_PER_DAY));
    }

    #[test]
    fn streak_flips_sign() {
        let mut record = PvpRecord::default();
        record.record_win();
        record.record_win();
        assert_eq!(record.streak, 2);
        record.record_loss();
        assert_eq!(record.streak, -1);
        record.record_loss();
        assert_eq!(record.streak, -2);
        record.record_win();
        assert_eq!(record.streak, 1);
        assert_eq!((record.wins, record.losses), (3, 2));
    }

    #[test]
    fn usernames_match_case_insensitively() {
        assert_eq!(normalize_username("@Alice"), Some("alice".to_string()));
        assert_eq!(normalize_username("  "), None);
    }
}
