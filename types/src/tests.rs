//! Property tests for the value-moving arithmetic.

use crate::{Account, AccountKey, ChatId, FeeSplit, PvpRecord, UserId};
use proptest::prelude::*;

fn account(free_length: f64, debt: f64) -> Account {
    let mut account = Account::new(AccountKey::new(UserId(1), ChatId(-1)), 0);
    account.free_length = free_length;
    account.debt = debt;
    account
}

proptest! {
    /// Property: a token wager pot is always fully distributed.
    ///
    /// Winner payout plus both fees equals twice the bet, for every fee configuration.
    #[test]
    fn prop_fee_split_conserves_pot(
        bet in 1u64..=u64::MAX / 2,
        treasury_bps in 0u16..=500,
        group_owner_bps in 0u16..=500,
        has_group_wallet in any::<bool>(),
    ) {
        let split = FeeSplit::compute(bet, treasury_bps, group_owner_bps, has_group_wallet);
        prop_assert_eq!(split.total(), u128::from(bet) * 2);
        prop_assert_eq!(u128::from(split.pot), u128::from(bet) * 2);
        if !has_group_wallet {
            prop_assert_eq!(split.group_owner_fee, 0);
        }
    }

    /// Property: the primary and non-primary splits take the same total fee.
    #[test]
    fn prop_primary_split_takes_same_total_fee(bet in 1u64..1_000_000_000_000) {
        let primary = FeeSplit::compute(bet, 200, 0, false);
        let group = FeeSplit::compute(bet, 100, 100, true);
        prop_assert_eq!(primary.total(), group.total());
        prop_assert!(primary.winner_payout <= group.winner_payout);
    }

    /// Property: a loan moves exactly the negative length into debt.
    #[test]
    fn prop_loan_moves_exact_magnitude(free in -1_000_000.0f64..1_000_000.0, debt in 0.0f64..1_000_000.0) {
        let mut account = account(free, debt);
        account.apply_loan(1);
        if free < 0.0 {
            prop_assert_eq!(account.free_length, 0.0);
            prop_assert_eq!(account.debt, debt + free.abs());
        } else {
            prop_assert_eq!(account.free_length, free);
            prop_assert_eq!(account.debt, debt);
        }
    }

    /// Property: grow never increases debt and repays at most a fifth of the combined growth.
    #[test]
    fn prop_grow_repayment_bounded(
        free in -10_000.0f64..10_000.0,
        debt in 0.0f64..10_000.0,
        delta in -5i32..=20,
    ) {
        let mut account = account(free, debt);
        let outcome = account.apply_grow(delta, 1);
        prop_assert!(account.debt <= debt);
        prop_assert!(outcome.repaid >= 0.0);
        prop_assert!(outcome.repaid <= (f64::from(delta) + outcome.bonus).max(0.0) * 0.2 + 1e-9);
        prop_assert!((outcome.applied + outcome.repaid - (f64::from(delta) + outcome.bonus)).abs() < 1e-6);
        if delta <= 0 {
            prop_assert_eq!(outcome.bonus, 0.0);
        }
    }

    /// Property: gifting conserves total length between the two parties.
    #[test]
    fn prop_gift_conserves_length(
        free in -100.0f64..1_000.0,
        paid in 0.0f64..1_000.0,
        amount in 0.01f64..2_000.0,
    ) {
        let mut sender = account(free, 0.0);
        sender.paid_length = paid;
        prop_assume!(sender.total() >= amount);
        let before = sender.total();
        let debit = sender.debit_for_gift(amount);
        prop_assert!((debit.from_free + debit.from_paid - amount).abs() < 1e-6);
        prop_assert!((before - sender.total() - amount).abs() < 1e-6);
        prop_assert!(sender.paid_length >= -1e-9);
        if free < 0.0 {
            prop_assert_eq!(debit.from_free, 0.0);
            prop_assert_eq!(sender.free_length, free);
        }
    }

    /// Property: streak sign always matches the last result.
    #[test]
    fn prop_streak_tracks_last_result(results in proptest::collection::vec(any::<bool>(), 1..50)) {
        let mut record = PvpRecord::default();
        for won in &results {
            if *won { record.record_win() } else { record.record_loss() }
        }
        let last = *results.last().unwrap_or(&true);
        prop_assert_eq!(record.streak > 0, last);
        let run = results.iter().rev().take_while(|r| **r == last).count() as i32;
        prop_assert_eq!(record.streak.abs(), run);
        prop_assert_eq!((record.wins + record.losses) as usize, results.len());
    }
}
