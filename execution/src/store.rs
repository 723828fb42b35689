//! Balance store: row locks and transactional overlays over a [`State`].
//!
//! A [`Txn`] is opened by locking every key it will mutate. Keys are sorted by their global
//! order and deduplicated before acquisition, so two transactions touching the same rows in
//! opposite order can never deadlock. Writes are buffered in the transaction and applied to the
//! backing state in one batch on [`Txn::commit`]; dropping a transaction discards them.

use growbet_types::{Key, Sequence, Value};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard, RwLock};
use tracing::{debug, warn};

use crate::{Error, State, Status};

fn default_lock_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long to wait for all row locks of a transaction.
    pub lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: default_lock_timeout(),
        }
    }
}

pub struct Store<S: State> {
    state: RwLock<S>,
    rows: Mutex<HashMap<Key, Arc<RowLock<()>>>>,
    config: StoreConfig,
}

impl<S: State> Store<S> {
    pub fn new(state: S, config: StoreConfig) -> Self {
        Self {
            state: RwLock::new(state),
            rows: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Unlocked point read. Callers re-read under a lock before acting on the value.
    pub async fn read(&self, key: &Key) -> Result<Option<Value>, Error> {
        self.state.read().await.get(key).await.map_err(Error::Storage)
    }

    /// Opens a transaction holding exclusive row locks on `keys`.
    pub async fn lock(&self, keys: &[Key]) -> Result<Txn<'_, S>, Error> {
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();

        let rows: Vec<Arc<RowLock<()>>> = {
            let mut table = self.rows.lock().unwrap_or_else(|e| e.into_inner());
            keys.iter()
                .map(|key| table.entry(key.clone()).or_default().clone())
                .collect()
        };

        let acquire = async move {
            let mut guards = Vec::with_capacity(rows.len());
            for row in rows {
                guards.push(row.lock_owned().await);
            }
            guards
        };
        let guards = match tokio::time::timeout(self.config.lock_timeout, acquire).await {
            Ok(guards) => guards,
            Err(_) => {
                warn!(?keys, "lock timeout");
                self.prune(&keys);
                return Err(Error::LockTimeout);
            }
        };
        debug!(count = keys.len(), "rows locked");

        Ok(Txn {
            store: self,
            keys,
            guards,
            pending: BTreeMap::new(),
        })
    }

    /// Allocates the next id of a sequence in its own committed transaction.
    pub async fn next_id(&self, sequence: Sequence) -> Result<u64, Error> {
        let key = Key::Sequence(sequence);
        let mut txn = self.lock(std::slice::from_ref(&key)).await?;
        let next = match txn.get(&key).await? {
            Some(Value::Counter(last)) => last + 1,
            None => 1,
            Some(other) => {
                return Err(Error::Invariant(format!(
                    "sequence {sequence:?} holds {other:?}"
                )))
            }
        };
        txn.put(key, Value::Counter(next))?;
        txn.commit().await?;
        Ok(next)
    }

    /// Removes lock table entries that no transaction holds or awaits.
    fn prune(&self, keys: &[Key]) {
        let mut table = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            if table
                .get(key)
                .is_some_and(|row| Arc::strong_count(row) == 1)
            {
                table.remove(key);
            }
        }
    }

    #[cfg(test)]
    fn tracked_rows(&self) -> usize {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// An open transaction. Reads see its own pending writes first.
pub struct Txn<'a, S: State> {
    store: &'a Store<S>,
    keys: Vec<Key>,
    guards: Vec<OwnedMutexGuard<()>>,
    pending: BTreeMap<Key, Status>,
}

impl<S: State> Txn<'_, S> {
    pub fn holds(&self, key: &Key) -> bool {
        self.keys.binary_search(key).is_ok()
    }

    pub async fn get(&self, key: &Key) -> Result<Option<Value>, Error> {
        match self.pending.get(key) {
            Some(Status::Update(value)) => Ok(Some(value.clone())),
            Some(Status::Delete) => Ok(None),
            None => self.store.read(key).await,
        }
    }

    pub fn put(&mut self, key: Key, value: Value) -> Result<(), Error> {
        if !self.holds(&key) {
            return Err(Error::Invariant(format!("write to unlocked key {key:?}")));
        }
        self.pending.insert(key, Status::Update(value));
        Ok(())
    }

    pub fn delete(&mut self, key: &Key) -> Result<(), Error> {
        if !self.holds(key) {
            return Err(Error::Invariant(format!("delete of unlocked key {key:?}")));
        }
        self.pending.insert(key.clone(), Status::Delete);
        Ok(())
    }

    /// Applies all pending writes in one batch, then releases the locks.
    pub async fn commit(mut self) -> Result<(), Error> {
        let changes: Vec<(Key, Status)> = std::mem::take(&mut self.pending).into_iter().collect();
        if changes.is_empty() {
            return Ok(());
        }
        let mut state = self.store.state.write().await;
        state.apply(changes).await.map_err(Error::Storage)?;
        Ok(())
    }
}

impl<S: State> Drop for Txn<'_, S> {
    fn drop(&mut self) {
        self.guards.clear();
        self.store.prune(&self.keys);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Memory;
    use growbet_types::{ChatId, UserId};

    fn store(lock_timeout: Duration) -> Arc<Store<Memory>> {
        Arc::new(Store::new(Memory::default(), StoreConfig { lock_timeout }))
    }

    #[tokio::test]
    async fn commit_applies_and_drop_discards() {
        let store = store(Duration::from_secs(1));
        let key = Key::Setting("a".into());

        let mut txn = store.lock(&[key.clone()]).await.unwrap();
        txn.put(key.clone(), Value::Counter(1)).unwrap();
        assert_eq!(txn.get(&key).await.unwrap(), Some(Value::Counter(1)));
        drop(txn);
        assert_eq!(store.read(&key).await.unwrap(), None);

        let mut txn = store.lock(&[key.clone()]).await.unwrap();
        txn.put(key.clone(), Value::Counter(2)).unwrap();
        txn.commit().await.unwrap();
        assert_eq!(store.read(&key).await.unwrap(), Some(Value::Counter(2)));
        assert_eq!(store.tracked_rows(), 0);
    }

    #[tokio::test]
    async fn writes_require_a_lock() {
        let store = store(Duration::from_secs(1));
        let mut txn = store.lock(&[Key::Setting("a".into())]).await.unwrap();
        let err = txn
            .put(Key::Setting("b".into()), Value::Counter(1))
            .unwrap_err();
        assert!(matches!(err, Error::Invariant(_)));
    }

    #[tokio::test]
    async fn contended_lock_times_out() {
        let store = store(Duration::from_millis(50));
        let key = Key::Wallet(UserId(1));
        let held = store.lock(&[key.clone()]).await.unwrap();
        let err = store.lock(&[key.clone()]).await.err().unwrap();
        assert!(matches!(err, Error::LockTimeout));
        drop(held);
        assert!(store.lock(&[key]).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn opposite_order_locking_does_not_deadlock() {
        let store = store(Duration::from_secs(5));
        let a = Key::account(UserId(1), ChatId(-1));
        let b = Key::account(UserId(2), ChatId(-1));

        let mut handles = Vec::new();
        for i in 0..64 {
            let store = store.clone();
            let keys = if i % 2 == 0 {
                vec![a.clone(), b.clone()]
            } else {
                vec![b.clone(), a.clone()]
            };
            handles.push(tokio::spawn(async move {
                let counter = Key::Setting("counter".into());
                let mut keys = keys;
                keys.push(counter.clone());
                let mut txn = store.lock(&keys).await.unwrap();
                let current = match txn.get(&counter).await.unwrap() {
                    Some(Value::Counter(n)) => n,
                    _ => 0,
                };
                tokio::task::yield_now().await;
                txn.put(counter, Value::Counter(current + 1)).unwrap();
                txn.commit().await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(
            store.read(&Key::Setting("counter".into())).await.unwrap(),
            Some(Value::Counter(64))
        );
    }

    #[tokio::test]
    async fn sequences_are_monotonic() {
        let store = store(Duration::from_secs(1));
        assert_eq!(store.next_id(Sequence::PvpWager).await.unwrap(), 1);
        assert_eq!(store.next_id(Sequence::PvpWager).await.unwrap(), 2);
        assert_eq!(store.next_id(Sequence::TokenWager).await.unwrap(), 1);
    }
}
