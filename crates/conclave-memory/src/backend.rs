use async_trait::async_trait;
use chrono::{DateTime, Utc};
use conclave_core::{validate_name, ConclaveError, ConclaveResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One durable per-key record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub key: String,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
    /// Name of the checkpoint this record was rewritten from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<String>,
}

impl StateEntry {
    /// A fresh record stamped with the current time.
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp: Utc::now(),
            restored_from: None,
        }
    }
}

/// An immutable, named snapshot of a session's whole mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub checkpoint_name: String,
    pub timestamp: DateTime<Utc>,
    pub state: BTreeMap<String, Value>,
}

/// Checkpoint metadata without the snapshot body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub name: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Durable key/value backing store, partitioned by session id.
#[async_trait]
pub trait StateBackend: Send + Sync {
    /// Persist (or overwrite) the record for `entry.key`.
    async fn write_entry(&self, session_id: &str, entry: &StateEntry) -> ConclaveResult<()>;

    /// Remove the record for `key`. Missing records are not an error.
    async fn remove_entry(&self, session_id: &str, key: &str) -> ConclaveResult<()>;

    /// Every per-key record of a session.
    async fn load_entries(&self, session_id: &str) -> ConclaveResult<Vec<StateEntry>>;

    /// Persist a new checkpoint. Fails with [`ConclaveError::CheckpointExists`]
    /// when the name is already taken for that session.
    async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> ConclaveResult<()>;

    /// Load a checkpoint by name.
    async fn read_checkpoint(
        &self,
        session_id: &str,
        name: &str,
    ) -> ConclaveResult<Option<Checkpoint>>;

    /// Checkpoints of a session, newest first.
    async fn list_checkpoints(&self, session_id: &str) -> ConclaveResult<Vec<CheckpointInfo>>;

    /// Every known session id, oldest first.
    async fn list_sessions(&self) -> ConclaveResult<Vec<String>>;

    /// Delete a session partition with all its records and checkpoints.
    async fn remove_session(&self, session_id: &str) -> ConclaveResult<()>;
}

/// Map an arbitrary key to a file stem: `[A-Za-z0-9_-]` pass through, every
/// other byte becomes `%XX`.
fn encode_key(key: &str) -> ConclaveResult<String> {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    if encoded.is_empty() || encoded.len() > 240 {
        return Err(ConclaveError::InvalidName(format!(
            "state key cannot be stored on disk: {key:?}"
        )));
    }
    Ok(encoded)
}

/// File-based backing store.
///
/// Layout: `<root>/<session_id>/<encoded key>.json` per key and
/// `<root>/<session_id>/checkpoints/<name>.json` per checkpoint.
pub struct FileStateBackend {
    root: PathBuf,
}

impl FileStateBackend {
    /// Create the backend, making sure `root` exists.
    pub async fn new(root: PathBuf) -> ConclaveResult<Self> {
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Root directory holding every session partition.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &str) -> ConclaveResult<PathBuf> {
        validate_name("session", session_id)?;
        Ok(self.root.join(session_id))
    }

    fn checkpoint_dir(&self, session_id: &str) -> ConclaveResult<PathBuf> {
        Ok(self.session_dir(session_id)?.join("checkpoints"))
    }

    fn checkpoint_path(&self, session_id: &str, name: &str) -> ConclaveResult<PathBuf> {
        validate_name("checkpoint", name)?;
        Ok(self.checkpoint_dir(session_id)?.join(format!("{name}.json")))
    }

    fn entry_path(&self, session_id: &str, key: &str) -> ConclaveResult<PathBuf> {
        Ok(self
            .session_dir(session_id)?
            .join(format!("{}.json", encode_key(key)?)))
    }
}

#[async_trait]
impl StateBackend for FileStateBackend {
    async fn write_entry(&self, session_id: &str, entry: &StateEntry) -> ConclaveResult<()> {
        let path = self.entry_path(session_id, &entry.key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(entry)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }

    async fn remove_entry(&self, session_id: &str, key: &str) -> ConclaveResult<()> {
        let path = self.entry_path(session_id, key)?;
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_entries(&self, session_id: &str) -> ConclaveResult<Vec<StateEntry>> {
        let dir = self.session_dir(session_id)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        let mut dir_entries = tokio::fs::read_dir(&dir).await?;
        while let Some(item) = dir_entries.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<StateEntry>(&data) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable state record"),
            }
        }
        entries.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(entries)
    }

    async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> ConclaveResult<()> {
        let path = self.checkpoint_path(&checkpoint.session_id, &checkpoint.checkpoint_name)?;
        tokio::fs::create_dir_all(self.checkpoint_dir(&checkpoint.session_id)?).await?;

        let json = serde_json::to_string_pretty(checkpoint)?;
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await;
        let mut file = match file {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(ConclaveError::CheckpointExists(
                    checkpoint.checkpoint_name.clone(),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        use tokio::io::AsyncWriteExt;
        file.write_all(json.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read_checkpoint(
        &self,
        session_id: &str,
        name: &str,
    ) -> ConclaveResult<Option<Checkpoint>> {
        let path = self.checkpoint_path(session_id, name)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = tokio::fs::read_to_string(path).await?;
        let checkpoint: Checkpoint = serde_json::from_str(&data).map_err(|e| {
            ConclaveError::State(format!("Failed to parse checkpoint '{name}': {e}"))
        })?;
        Ok(Some(checkpoint))
    }

    async fn list_checkpoints(&self, session_id: &str) -> ConclaveResult<Vec<CheckpointInfo>> {
        let dir = self.checkpoint_dir(session_id)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut infos = Vec::new();
        let mut dir_entries = tokio::fs::read_dir(&dir).await?;
        while let Some(item) = dir_entries.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let data = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<Checkpoint>(&data) {
                Ok(cp) => infos.push(CheckpointInfo {
                    name: cp.checkpoint_name,
                    session_id: cp.session_id,
                    timestamp: cp.timestamp,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint"),
            }
        }
        infos.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(infos)
    }

    async fn list_sessions(&self) -> ConclaveResult<Vec<String>> {
        let mut sessions = Vec::new();
        let mut dir_entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(item) = dir_entries.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = item.file_name().to_str() {
                if validate_name("session", name).is_ok() {
                    sessions.push(name.to_string());
                }
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    async fn remove_session(&self, session_id: &str) -> ConclaveResult<()> {
        let dir = self.session_dir(session_id)?;
        if dir.exists() {
            tokio::fs::remove_dir_all(dir).await?;
        }
        Ok(())
    }
}
