use serde::{Deserialize, Serialize};

use crate::{ChatId, UserId};

/// A system-held chain wallet owned by one user (chat independent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodialWallet {
    pub user: UserId,
    pub address: String,
    /// Opaque ciphertext produced by the key provider.
    pub encrypted_key: String,
    /// Write-through cache of the on-chain balance, in minor units.
    pub cached_balance: u64,
    pub total_deposited: u64,
    pub total_withdrawn: u64,
    pub total_won: u64,
    pub total_lost: u64,
    pub bets_won: u32,
    pub bets_lost: u32,
    pub created_at: u64,
    pub last_synced: Option<u64>,
}

impl CustodialWallet {
    pub fn new(user: UserId, address: String, encrypted_key: String, now: u64) -> Self {
        Self {
            user,
            address,
            encrypted_key,
            cached_balance: 0,
            total_deposited: 0,
            total_withdrawn: 0,
            total_won: 0,
            total_lost: 0,
            bets_won: 0,
            bets_lost: 0,
            created_at: now,
            last_synced: None,
        }
    }

    /// Replaces the cached balance with a fresh on-chain reading.
    pub fn reconcile(&mut self, on_chain: u64, now: u64) -> ReconcileOutcome {
        let previous = self.cached_balance;
        self.cached_balance = on_chain;
        self.last_synced = Some(now);
        if on_chain > previous {
            let amount = on_chain - previous;
            self.total_deposited = self.total_deposited.saturating_add(amount);
            ReconcileOutcome::Deposited {
                amount,
                balance: on_chain,
            }
        } else if on_chain < previous {
            ReconcileOutcome::Synced {
                previous,
                balance: on_chain,
            }
        } else {
            ReconcileOutcome::Unchanged { balance: on_chain }
        }
    }

    pub fn record_win(&mut self, profit: u64) {
        self.bets_won = self.bets_won.saturating_add(1);
        self.total_won = self.total_won.saturating_add(profit);
    }

    pub fn record_loss(&mut self, bet: u64) {
        self.bets_lost = self.bets_lost.saturating_add(1);
        self.total_lost = self.total_lost.saturating_add(bet);
    }
}

/// Result of a deposit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconcileOutcome {
    Deposited { amount: u64, balance: u64 },
    /// On-chain balance dropped below the cache (external spend or fee drift).
    Synced { previous: u64, balance: u64 },
    Unchanged { balance: u64 },
}

impl ReconcileOutcome {
    pub fn balance(&self) -> u64 {
        match self {
            ReconcileOutcome::Deposited { balance, .. }
            | ReconcileOutcome::Synced { balance, .. }
            | ReconcileOutcome::Unchanged { balance } => *balance,
        }
    }
}

/// Payout address for a chat's share of token wager fees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOwnerWallet {
    pub chat: ChatId,
    pub address: String,
    pub set_by: UserId,
    pub updated_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet() -> CustodialWallet {
        CustodialWallet::new(UserId(1), "addr".into(), "key".into(), 0)
    }

    #[test]
    fn reconcile_reports_deposits_once() {
        let mut wallet = wallet();
        assert_eq!(
            wallet.reconcile(500, 1),
            ReconcileOutcome::Deposited {
                amount: 500,
                balance: 500
            }
        );
        assert_eq!(
            wallet.reconcile(500, 2),
            ReconcileOutcome::Unchanged { balance: 500 }
        );
        assert_eq!(wallet.total_deposited, 500);
    }

    #[test]
    fn reconcile_overwrites_on_drop() {
        let mut wallet = wallet();
        wallet.cached_balance = 800;
        assert_eq!(
            wallet.reconcile(750, 1),
            ReconcileOutcome::Synced {
                previous: 800,
                balance: 750
            }
        );
        assert_eq!(wallet.cached_balance, 750);
        assert_eq!(wallet.total_deposited, 0);
    }
}
