use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Read-modify-write function applied atomically by [`SharedState::update`].
///
/// Receives the current value (`None` when the key is absent) and returns the
/// value to store. It runs while the store is locked and must not touch the
/// store itself.
pub type UpdateFn = Box<dyn FnOnce(Option<Value>) -> Value + Send>;

/// Key/value state shared by every agent in a session.
///
/// Last write wins per key. Implementations serialize every mutation
/// internally; callers never see a lock.
#[async_trait]
pub trait SharedState: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn store(&self, key: &str, value: Value) -> ConclaveResult<()>;

    /// Read the value stored under `key`.
    async fn retrieve(&self, key: &str) -> ConclaveResult<Option<Value>>;

    /// Read the value stored under `key`, or `default` when absent.
    async fn retrieve_or(&self, key: &str, default: Value) -> ConclaveResult<Value> {
        Ok(self.retrieve(key).await?.unwrap_or(default))
    }

    /// Atomically replace the value under `key` with `f(current)`.
    /// Returns the new value.
    async fn update(&self, key: &str, f: UpdateFn) -> ConclaveResult<Value>;

    /// Remove `key`. Returns whether it was present.
    async fn delete(&self, key: &str) -> ConclaveResult<bool>;

    /// All keys currently stored.
    async fn keys(&self) -> ConclaveResult<BTreeSet<String>>;

    /// A copy of the whole mapping.
    async fn snapshot(&self) -> ConclaveResult<BTreeMap<String, Value>>;

    /// Remove every key.
    async fn clear(&self) -> ConclaveResult<()>;
}

pub(crate) fn validate_key(key: &str) -> ConclaveResult<()> {
    if key.is_empty() {
        return Err(ConclaveError::InvalidName("state key must not be empty".into()));
    }
    Ok(())
}

/// In-memory shared state guarded by a single mutex.
pub struct SharedMemory {
    data: Mutex<HashMap<String, Value>>,
}

impl SharedMemory {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl Default for SharedMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedState for SharedMemory {
    async fn store(&self, key: &str, value: Value) -> ConclaveResult<()> {
        validate_key(key)?;
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> ConclaveResult<Option<Value>> {
        Ok(self.data.lock().get(key).cloned())
    }

    async fn update(&self, key: &str, f: UpdateFn) -> ConclaveResult<Value> {
        validate_key(key)?;
        let mut data = self.data.lock();
        let updated = f(data.get(key).cloned());
        data.insert(key.to_string(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, key: &str) -> ConclaveResult<bool> {
        Ok(self.data.lock().remove(key).is_some())
    }

    async fn keys(&self) -> ConclaveResult<BTreeSet<String>> {
        Ok(self.data.lock().keys().cloned().collect())
    }

    async fn snapshot(&self) -> ConclaveResult<BTreeMap<String, Value>> {
        Ok(self
            .data
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn clear(&self) -> ConclaveResult<()> {
        self.data.lock().clear();
        Ok(())
    }
}
