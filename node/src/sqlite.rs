//! SQLite-backed [`State`].
//!
//! Every key is one row of the `state` table. Keys and values are stored as JSON, with the key
//! family in its own column for operator queries. A batch [`State::apply`] runs in a single SQLite
//! transaction.

use anyhow::{Context, Result};
use growbet_execution::{State, Status};
use growbet_types::{Key, Value};
use rusqlite::{params, Connection, OptionalExtension};
use std::{
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::debug;

#[derive(Clone)]
pub struct SqliteState {
    conn: Arc<Mutex<Connection>>,
}

fn encode_key(key: &Key) -> Result<String> {
    serde_json::to_string(key).context("encode key")
}

impl SqliteState {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite database {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             CREATE TABLE IF NOT EXISTS state (
                 key TEXT PRIMARY KEY,
                 kind TEXT NOT NULL,
                 value TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS state_kind ON state(kind);",
        )
        .context("initialize sqlite schema")?;
        debug!(path = %path.display(), "sqlite state opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut conn)
        })
        .await
        .context("sqlite task panicked")?
    }

    /// Number of stored rows of one key family (see [`Key::kind`]).
    pub async fn count(&self, kind: &'static str) -> Result<u64> {
        self.blocking(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM state WHERE kind = ?1",
                    params![kind],
                    |row| row.get(0),
                )
                .context("count rows")?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
        .await
    }
}

impl State for SqliteState {
    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        let encoded = encode_key(key)?;
        let raw: Option<String> = self
            .blocking(move |conn| {
                conn.query_row(
                    "SELECT value FROM state WHERE key = ?1",
                    params![encoded],
                    |row| row.get(0),
                )
                .optional()
                .context("read row")
            })
            .await?;
        raw.map(|raw| serde_json::from_str(&raw).context("decode value"))
            .transpose()
    }

    async fn insert(&mut self, key: Key, value: Value) -> Result<()> {
        self.apply(vec![(key, Status::Update(value))]).await
    }

    async fn delete(&mut self, key: &Key) -> Result<()> {
        self.apply(vec![(key.clone(), Status::Delete)]).await
    }

    async fn apply(&mut self, changes: Vec<(Key, Status)>) -> Result<()> {
        let mut rows = Vec::with_capacity(changes.len());
        for (key, status) in changes {
            let value = match status {
                Status::Update(value) => {
                    Some(serde_json::to_string(&value).context("encode value")?)
                }
                Status::Delete => None,
            };
            rows.push((encode_key(&key)?, key.kind(), value));
        }
        self.blocking(move |conn| {
            let tx = conn.transaction().context("begin transaction")?;
            for (key, kind, value) in &rows {
                let written = match value {
                    Some(value) => tx.execute(
                        "INSERT OR REPLACE INTO state (key, kind, value) VALUES (?1, ?2, ?3)",
                        params![key, kind, value],
                    ),
                    None => tx.execute("DELETE FROM state WHERE key = ?1", params![key]),
                };
                written.context("write row")?;
            }
            tx.commit().context("commit transaction")
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use growbet_types::{Account, AccountKey, ChatId, UserId};
    use tempfile::TempDir;

    fn account(free_length: f64) -> Value {
        Value::Account(Account {
            free_length,
            ..Account::new(AccountKey::new(UserId(1), ChatId(-1)), 1_700_000_000)
        })
    }

    #[tokio::test]
    async fn writes_survive_reopen() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("growbet.db");
        let key = Key::account(UserId(1), ChatId(-1));

        let mut state = SqliteState::open(&path).expect("open");
        state.insert(key.clone(), account(12.5)).await.expect("insert");
        state
            .insert(Key::WithdrawalQueue, Value::Ids(vec![3, 4]))
            .await
            .expect("insert");
        drop(state);

        let state = SqliteState::open(&path).expect("reopen");
        assert_eq!(state.get(&key).await.expect("get"), Some(account(12.5)));
        assert_eq!(
            state.get(&Key::WithdrawalQueue).await.expect("get"),
            Some(Value::Ids(vec![3, 4]))
        );
        assert_eq!(state.count("account").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn apply_updates_and_deletes_in_one_batch() {
        let dir = TempDir::new().expect("tempdir");
        let mut state = SqliteState::open(&dir.path().join("growbet.db")).expect("open");
        let kept = Key::Setting("treasury_address".to_string());
        let removed = Key::Setting("package.1.price".to_string());
        state
            .insert(removed.clone(), Value::Counter(1))
            .await
            .expect("insert");

        state
            .apply(vec![
                (kept.clone(), Status::Update(Value::Counter(7))),
                (removed.clone(), Status::Delete),
            ])
            .await
            .expect("apply");

        assert_eq!(state.get(&kept).await.expect("get"), Some(Value::Counter(7)));
        assert_eq!(state.get(&removed).await.expect("get"), None);
        assert_eq!(state.count("setting").await.expect("count"), 1);
    }

    #[tokio::test]
    async fn missing_key_reads_none() {
        let dir = TempDir::new().expect("tempdir");
        let state = SqliteState::open(&dir.path().join("growbet.db")).expect("open");
        assert_eq!(state.get(&Key::PayoutQueue).await.expect("get"), None);
    }
}
