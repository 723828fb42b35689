use anyhow::Result;
use growbet_types::{Key, Value};
use std::future::Future;

#[cfg(any(test, feature = "mocks"))]
use std::collections::HashMap;

/// Durable key/value persistence behind the balance store.
///
/// Implementations only need single-key reads and an atomic batch `apply`; row locking and
/// transactional overlays live in [`crate::Store`].
pub trait State: Send + Sync {
    fn get(&self, key: &Key) -> impl Future<Output = Result<Option<Value>>> + Send;
    fn insert(&mut self, key: Key, value: Value) -> impl Future<Output = Result<()>> + Send;
    fn delete(&mut self, key: &Key) -> impl Future<Output = Result<()>> + Send;

    /// Applies a batch of changes. Backends that can should make this all-or-nothing.
    fn apply(&mut self, changes: Vec<(Key, Status)>) -> impl Future<Output = Result<()>> + Send {
        async move {
            for (key, status) in changes {
                match status {
                    Status::Update(value) => self.insert(key, value).await?,
                    Status::Delete => self.delete(&key).await?,
                }
            }
            Ok(())
        }
    }
}

#[cfg(any(test, feature = "mocks"))]
#[derive(Default)]
pub struct Memory {
    state: HashMap<Key, Value>,
}

#[cfg(any(test, feature = "mocks"))]
impl Memory {
    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

#[cfg(any(test, feature = "mocks"))]
impl State for Memory {
    async fn get(&self, key: &Key) -> Result<Option<Value>> {
        Ok(self.state.get(key).cloned())
    }

    async fn insert(&mut self, key: Key, value: Value) -> Result<()> {
        self.state.insert(key, value);
        Ok(())
    }

    async fn delete(&mut self, key: &Key) -> Result<()> {
        self.state.remove(key);
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
#[allow(clippy::large_enum_variant)]
pub enum Status {
    Update(Value),
    Delete,
}
