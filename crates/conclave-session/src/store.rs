//! Event storage: the [`EventStore`] trait and its implementations.

use crate::analysis::{analyze, LogAnalysis};
use crate::event::Event;
use async_trait::async_trait;
use conclave_core::{validate_name, ConclaveResult};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// EventStore trait
// ---------------------------------------------------------------------------

/// Append-only storage of per-agent event streams.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event to its agent's stream.
    async fn append(&self, event: &Event) -> ConclaveResult<()>;

    /// One agent's events, in append order.
    async fn read(&self, session_id: &str, agent_id: &str) -> ConclaveResult<Vec<Event>>;

    /// Agents that logged at least one event in a session.
    async fn agents(&self, session_id: &str) -> ConclaveResult<BTreeSet<String>>;

    /// Every agent's events of a session merged by timestamp.
    async fn read_session(&self, session_id: &str) -> ConclaveResult<Vec<Event>> {
        let mut events = Vec::new();
        for agent in self.agents(session_id).await? {
            events.extend(self.read(session_id, &agent).await?);
        }
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// InMemoryEventStore
// ---------------------------------------------------------------------------

/// Event store kept in process memory.
#[derive(Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<(String, String), Vec<Event>>>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events across all sessions.
    pub fn len(&self) -> usize {
        self.streams.read().values().map(Vec::len).sum()
    }

    /// Whether nothing was logged yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: &Event) -> ConclaveResult<()> {
        self.streams
            .write()
            .entry((event.session_id.clone(), event.agent_id.clone()))
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn read(&self, session_id: &str, agent_id: &str) -> ConclaveResult<Vec<Event>> {
        Ok(self
            .streams
            .read()
            .get(&(session_id.to_string(), agent_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn agents(&self, session_id: &str) -> ConclaveResult<BTreeSet<String>> {
        Ok(self
            .streams
            .read()
            .keys()
            .filter(|(sid, _)| sid == session_id)
            .map(|(_, agent)| agent.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// FileEventStore
// ---------------------------------------------------------------------------

/// JSONL event store: `<root>/<session_id>/<agent_id>.jsonl`.
pub struct FileEventStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileEventStore {
    /// Create the store, making sure `root` exists.
    pub async fn new(root: PathBuf) -> ConclaveResult<Self> {
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory holding every session's logs.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, session_id: &str) -> ConclaveResult<PathBuf> {
        validate_name("session", session_id)?;
        Ok(self.root.join(session_id))
    }

    fn log_path(&self, session_id: &str, agent_id: &str) -> ConclaveResult<PathBuf> {
        validate_name("agent", agent_id)?;
        Ok(self.session_dir(session_id)?.join(format!("{agent_id}.jsonl")))
    }

    /// Sessions with a log directory, oldest first.
    pub async fn sessions(&self) -> ConclaveResult<Vec<String>> {
        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_name("session", name).is_ok() {
                    sessions.push(name.to_string());
                }
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    /// Analyse a single JSONL log file. Malformed lines are skipped.
    pub async fn analyze_file(path: &Path) -> ConclaveResult<LogAnalysis> {
        let data = tokio::fs::read_to_string(path).await?;
        let mut events = Vec::new();
        for (lineno, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "Skipping malformed log line"
                ),
            }
        }
        Ok(analyze(&events))
    }

    /// Delete the oldest session log directories, keeping the newest
    /// `keep_last_n`. Returns the number removed.
    pub async fn cleanup_old_sessions(&self, keep_last_n: usize) -> ConclaveResult<usize> {
        let sessions = self.sessions().await?;
        let excess = sessions.len().saturating_sub(keep_last_n);
        for sid in &sessions[..excess] {
            tokio::fs::remove_dir_all(self.root.join(sid)).await?;
            info!(session_id = %sid, "Removed old session logs");
        }
        Ok(excess)
    }
}

#[async_trait]
impl EventStore for FileEventStore {
    async fn append(&self, event: &Event) -> ConclaveResult<()> {
        let path = self.log_path(&event.session_id, &event.agent_id)?;
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read(&self, session_id: &str, agent_id: &str) -> ConclaveResult<Vec<Event>> {
        let path = self.log_path(session_id, agent_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let events = data
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<Event>, _>>()?;
        Ok(events)
    }

    async fn agents(&self, session_id: &str) -> ConclaveResult<BTreeSet<String>> {
        let dir = self.session_dir(session_id)?;
        let mut agents = BTreeSet::new();
        if !dir.exists() {
            return Ok(agents);
        }
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                agents.insert(stem.to_string());
            }
        }
        Ok(agents)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::event::EventType;
    use conclave_core::ConclaveError;
    use serde_json::{json, Map};
    use tempfile::TempDir;

    fn make_event(agent: &str, session: &str, ty: EventType) -> Event {
        let mut payload = Map::new();
        payload.insert("n".into(), json!(1));
        Event::new(agent, session, ty, payload)
    }

    #[tokio::test]
    async fn test_in_memory_append_and_read() {
        let store = InMemoryEventStore::new();
        store.append(&make_event("a", "s1", EventType::Decision)).await.unwrap();
        store.append(&make_event("a", "s1", EventType::Metric)).await.unwrap();
        store.append(&make_event("b", "s1", EventType::Error)).await.unwrap();
        store.append(&make_event("a", "s2", EventType::Error)).await.unwrap();

        let a = store.read("s1", "a").await.unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].event_type, EventType::Decision);
        assert_eq!(store.agents("s1").await.unwrap().len(), 2);
        assert_eq!(store.read_session("s1").await.unwrap().len(), 3);
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn test_file_append_and_read() {
        let tmp = TempDir::new().unwrap();
        let store = FileEventStore::new(tmp.path().to_path_buf()).await.unwrap();

        store.append(&make_event("lead_agent", "s1", EventType::Decision)).await.unwrap();
        store.append(&make_event("researcher_1", "s1", EventType::TaskStart)).await.unwrap();
        store.append(&make_event("lead_agent", "s1", EventType::Metric)).await.unwrap();

        assert!(tmp.path().join("s1").join("lead_agent.jsonl").exists());
        assert_eq!(store.read("s1", "lead_agent").await.unwrap().len(), 2);
        let agents: Vec<String> = store.agents("s1").await.unwrap().into_iter().collect();
        assert_eq!(agents, vec!["lead_agent", "researcher_1"]);
        assert!(store.read("s1", "nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_rejects_path_like_ids() {
        let tmp = TempDir::new().unwrap();
        let store = FileEventStore::new(tmp.path().to_path_buf()).await.unwrap();
        let err = store
            .append(&make_event("../evil", "s1", EventType::Decision))
            .await
            .unwrap_err();
        assert!(matches!(err, ConclaveError::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_analyze_file_skips_malformed_lines() {
        let tmp = TempDir::new().unwrap();
        let store = FileEventStore::new(tmp.path().to_path_buf()).await.unwrap();
        store.append(&make_event("a", "s1", EventType::ToolCall)).await.unwrap();

        let path = tmp.path().join("s1").join("a.jsonl");
        let mut data = tokio::fs::read_to_string(&path).await.unwrap();
        data.push_str("not json\n\n");
        tokio::fs::write(&path, data).await.unwrap();

        let analysis = FileEventStore::analyze_file(&path).await.unwrap();
        assert_eq!(analysis.total_events, 1);
        assert_eq!(analysis.total_tool_calls, 1);
    }

    #[tokio::test]
    async fn test_cleanup_old_sessions() {
        let tmp = TempDir::new().unwrap();
        let store = FileEventStore::new(tmp.path().to_path_buf()).await.unwrap();
        for sid in ["20240101_a", "20240102_b", "20240103_c"] {
            store.append(&make_event("a", sid, EventType::Metric)).await.unwrap();
        }

        assert_eq!(store.cleanup_old_sessions(2).await.unwrap(), 1);
        assert_eq!(store.sessions().await.unwrap(), vec!["20240102_b", "20240103_c"]);
        assert_eq!(store.cleanup_old_sessions(5).await.unwrap(), 0);
    }
}
