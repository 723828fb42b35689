//! Settlement engine.
//!
//! [`Engine`] owns the balance store and the injected collaborators (chain gateway, key provider,
//! dice). Each component lives in its own handler module as an `impl` block on the engine.
//! No row lock is ever held across a chain gateway call: handlers read, call the gateway, then
//! lock and re-validate before mutating.

use growbet_types::{
    Account, AccountKey, CustodialWallet, DailyWinner, FeePayout, GroupOwnerWallet, Key,
    PendingPurchase, Policy, Profile, PvpWager, Setting, TokenWager, Value, WithdrawalDraft,
    WithdrawalRecord,
};
use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::{
    ChainError, ChainGateway, Dice, Error, KeyProvider, RetryPolicy, State, Store, StoreConfig,
    Txn,
};

mod handlers;

macro_rules! extractor {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub(crate) fn $name(value: Option<Value>) -> Result<Option<$ty>, Error> {
            match value {
                None => Ok(None),
                Some(Value::$variant(inner)) => Ok(Some(inner)),
                Some(other) => Err(Error::Invariant(format!(
                    concat!("expected ", stringify!($variant), ", found {:?}"),
                    other
                ))),
            }
        }
    };
}

extractor!(as_account, Account, Account);
extractor!(as_profile, Profile, Profile);
extractor!(as_user, User, growbet_types::UserId);
extractor!(as_roster, Roster, Vec<growbet_types::UserId>);
extractor!(as_daily_winner, DailyWinner, DailyWinner);
extractor!(as_pvp_wager, PvpWager, PvpWager);
extractor!(as_token_wager, TokenWager, TokenWager);
extractor!(as_wallet, Wallet, CustodialWallet);
extractor!(as_group_wallet, GroupWallet, GroupOwnerWallet);
extractor!(as_withdrawal, Withdrawal, WithdrawalRecord);
extractor!(as_draft, WithdrawalDraft, WithdrawalDraft);
extractor!(as_payout, FeePayout, FeePayout);
extractor!(as_purchase, Purchase, PendingPurchase);
extractor!(as_ids, Ids, Vec<u64>);
extractor!(as_setting, Setting, Setting);

/// Unwraps a record that must exist once created.
pub(crate) fn required<T>(value: Option<T>, what: impl fmt::Display) -> Result<T, Error> {
    value.ok_or_else(|| {
        error!(%what, "record missing after creation");
        Error::Invariant(format!("{what} missing"))
    })
}

/// Releases an in-flight transfer claim on drop.
pub(crate) struct Claim<'a> {
    inflight: &'a Mutex<HashSet<Key>>,
    key: Key,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

pub struct Engine<S: State, G: ChainGateway, K: KeyProvider> {
    store: Store<S>,
    gateway: G,
    keys: K,
    policy: Policy,
    retry: RetryPolicy,
    dice: Mutex<Box<dyn Dice>>,
    /// Transfers currently being driven by this process.
    inflight: Mutex<HashSet<Key>>,
}

impl<S: State + 'static, G: ChainGateway, K: KeyProvider> Engine<S, G, K> {
    pub fn new(
        state: S,
        store: StoreConfig,
        gateway: G,
        keys: K,
        policy: Policy,
        retry: RetryPolicy,
        dice: impl Dice + 'static,
    ) -> Self {
        Self {
            store: Store::new(state, store),
            gateway,
            keys,
            policy,
            retry,
            dice: Mutex::new(Box::new(dice)),
            inflight: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn store(&self) -> &Store<S> {
        &self.store
    }

    fn with_dice<T>(&self, f: impl FnOnce(&mut dyn Dice) -> T) -> T {
        let mut dice = self.dice.lock().unwrap_or_else(PoisonError::into_inner);
        f(dice.as_mut())
    }

    fn roll_pair(&self) -> growbet_types::Rolls {
        self.with_dice(|dice| growbet_types::Rolls {
            challenger: dice.roll(),
            opponent: dice.roll(),
        })
    }

    /// Claims a transfer for this process. `None` if another task is already driving it.
    fn claim(&self, key: Key) -> Option<Claim<'_>> {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        if !inflight.insert(key.clone()) {
            return None;
        }
        Some(Claim {
            inflight: &self.inflight,
            key,
        })
    }

    /// Bounds a gateway call with the configured timeout.
    async fn chain<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, ChainError>>,
    ) -> Result<T, Error> {
        let limit: Duration = self.retry.call_timeout;
        match timeout(limit, call).await {
            Ok(result) => result.map_err(Error::Chain),
            Err(_) => {
                warn!(?limit, "chain gateway call timed out");
                Err(Error::Chain(ChainError::Timeout))
            }
        }
    }

    async fn account(&self, key: AccountKey) -> Result<Option<Account>, Error> {
        as_account(self.store.read(&Key::Account(key)).await?)
    }

    async fn locked_account(txn: &Txn<'_, S>, key: AccountKey) -> Result<Account, Error> {
        required(
            as_account(txn.get(&Key::Account(key)).await?)?,
            format!("account {}/{}", key.user, key.chat),
        )
    }

    fn put_account(txn: &mut Txn<'_, S>, account: Account) -> Result<(), Error> {
        txn.put(Key::Account(account.key()), Value::Account(account))
    }

    async fn ids(&self, key: &Key) -> Result<Vec<u64>, Error> {
        Ok(as_ids(self.store.read(key).await?)?.unwrap_or_default())
    }
}
