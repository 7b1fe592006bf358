use crate::backend::{Checkpoint, CheckpointInfo, FileStateBackend, StateBackend, StateEntry};
use crate::store::{validate_key, SharedState, UpdateFn};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conclave_core::{validate_name, ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

/// Generate a session id of the form `YYYYMMDD_HHMMSS_xxxxxxxx`.
///
/// Ids sort lexically in creation order, which retention relies on.
pub fn new_session_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), &suffix[..8])
}

/// A full dump of one session's live mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: BTreeMap<String, Value>,
}

/// Durable shared state partitioned by session id.
///
/// Every mutation takes the async lock, writes the backing store and only then
/// updates the in-memory view, so a failed write leaves the view unchanged.
/// Reads never touch the backing store: [`PersistentMemory::open`] loads the
/// session eagerly.
pub struct PersistentMemory {
    session_id: String,
    backend: Arc<dyn StateBackend>,
    data: Mutex<BTreeMap<String, Value>>,
}

impl PersistentMemory {
    /// Start a new session with a freshly generated id.
    pub fn new(backend: Arc<dyn StateBackend>) -> Self {
        Self {
            session_id: new_session_id(),
            backend,
            data: Mutex::new(BTreeMap::new()),
        }
    }

    /// Start a new session stored under `root` with the file backend.
    pub async fn in_dir(root: impl Into<PathBuf>) -> ConclaveResult<Self> {
        let backend = FileStateBackend::new(root.into()).await?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Resume an existing session by loading all its per-key records.
    pub async fn open(backend: Arc<dyn StateBackend>, session_id: &str) -> ConclaveResult<Self> {
        validate_name("session", session_id)?;
        let entries = backend.load_entries(session_id).await?;
        let data: BTreeMap<String, Value> = entries
            .into_iter()
            .map(|entry| (entry.key, entry.value))
            .collect();
        info!(session_id = %session_id, keys = data.len(), "Resumed durable session");
        Ok(Self {
            session_id: session_id.to_string(),
            backend,
            data: Mutex::new(data),
        })
    }

    /// Identifier of this session's partition.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Take an immutable named snapshot of the live mapping.
    pub async fn checkpoint(&self, name: &str) -> ConclaveResult<CheckpointInfo> {
        validate_name("checkpoint", name)?;
        let data = self.data.lock().await;
        let checkpoint = Checkpoint {
            session_id: self.session_id.clone(),
            checkpoint_name: name.to_string(),
            timestamp: Utc::now(),
            state: data.clone(),
        };
        self.backend.write_checkpoint(&checkpoint).await?;
        info!(
            session_id = %self.session_id,
            checkpoint = %name,
            keys = checkpoint.state.len(),
            "Checkpoint created"
        );
        Ok(CheckpointInfo {
            name: checkpoint.checkpoint_name,
            session_id: checkpoint.session_id,
            timestamp: checkpoint.timestamp,
        })
    }

    /// Replace the live mapping with a checkpoint's state.
    ///
    /// The restored keys' durable records are rewritten and tagged with the
    /// checkpoint name. Records of keys written after the checkpoint stay on
    /// disk; they only disappear from the live view.
    pub async fn restore_checkpoint(&self, name: &str) -> ConclaveResult<()> {
        validate_name("checkpoint", name)?;
        let mut data = self.data.lock().await;
        let checkpoint = self
            .backend
            .read_checkpoint(&self.session_id, name)
            .await?
            .ok_or_else(|| ConclaveError::CheckpointNotFound(name.to_string()))?;

        for (key, value) in &checkpoint.state {
            let mut entry = StateEntry::new(key.clone(), value.clone());
            entry.restored_from = Some(name.to_string());
            self.backend.write_entry(&self.session_id, &entry).await?;
        }

        *data = checkpoint.state;
        info!(
            session_id = %self.session_id,
            checkpoint = %name,
            keys = data.len(),
            "Checkpoint restored"
        );
        Ok(())
    }

    /// Checkpoints of this session, newest first.
    pub async fn list_checkpoints(&self) -> ConclaveResult<Vec<CheckpointInfo>> {
        self.backend.list_checkpoints(&self.session_id).await
    }

    /// Dump the live mapping together with the session id.
    pub async fn export_session(&self) -> SessionExport {
        SessionExport {
            session_id: self.session_id.clone(),
            timestamp: Utc::now(),
            data: self.data.lock().await.clone(),
        }
    }

    /// Delete all but the newest `keep_last_n` other sessions.
    ///
    /// The current session is never deleted and does not count toward
    /// `keep_last_n`. Returns the number of partitions removed.
    pub async fn cleanup_old_sessions(&self, keep_last_n: usize) -> ConclaveResult<usize> {
        let others: Vec<String> = self
            .backend
            .list_sessions()
            .await?
            .into_iter()
            .filter(|sid| sid != &self.session_id)
            .collect();

        let excess = others.len().saturating_sub(keep_last_n);
        for sid in &others[..excess] {
            self.backend.remove_session(sid).await?;
            info!(session_id = %sid, "Removed old state session");
        }
        Ok(excess)
    }
}

#[async_trait]
impl SharedState for PersistentMemory {
    async fn store(&self, key: &str, value: Value) -> ConclaveResult<()> {
        validate_key(key)?;
        let mut data = self.data.lock().await;
        self.backend
            .write_entry(&self.session_id, &StateEntry::new(key, value.clone()))
            .await?;
        data.insert(key.to_string(), value);
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> ConclaveResult<Option<Value>> {
        Ok(self.data.lock().await.get(key).cloned())
    }

    async fn update(&self, key: &str, f: UpdateFn) -> ConclaveResult<Value> {
        validate_key(key)?;
        let mut data = self.data.lock().await;
        let updated = f(data.get(key).cloned());
        self.backend
            .write_entry(&self.session_id, &StateEntry::new(key, updated.clone()))
            .await?;
        data.insert(key.to_string(), updated.clone());
        Ok(updated)
    }

    async fn delete(&self, key: &str) -> ConclaveResult<bool> {
        let mut data = self.data.lock().await;
        if !data.contains_key(key) {
            return Ok(false);
        }
        self.backend.remove_entry(&self.session_id, key).await?;
        data.remove(key);
        Ok(true)
    }

    async fn keys(&self) -> ConclaveResult<BTreeSet<String>> {
        Ok(self.data.lock().await.keys().cloned().collect())
    }

    async fn snapshot(&self) -> ConclaveResult<BTreeMap<String, Value>> {
        Ok(self.data.lock().await.clone())
    }

    async fn clear(&self) -> ConclaveResult<()> {
        let mut data = self.data.lock().await;
        for key in data.keys() {
            self.backend.remove_entry(&self.session_id, key).await?;
        }
        data.clear();
        Ok(())
    }
}
