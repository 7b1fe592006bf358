//! Shared state for Conclave agents.
//!
//! Every participant of an orchestration session reads and writes the same
//! key/value mapping. The durable variant persists each write to a backing
//! store and supports named, immutable checkpoints.
//!
//! # Main types
//!
//! - [`SharedState`] — Trait implemented by every state store.
//! - [`SharedMemory`] — In-memory store, lost when the session ends.
//! - [`PersistentMemory`] — Durable store partitioned by session id, with checkpoints.
//! - [`StateBackend`] — Trait for the durable key/value backing store.
//! - [`FileStateBackend`] — JSON-file backing store (one file per key).

/// Durable backing store trait and file-based implementation.
pub mod backend;
/// Durable shared state with checkpoint and restore.
pub mod persistent;
/// Shared state trait and in-memory implementation.
pub mod store;

pub use backend::{Checkpoint, CheckpointInfo, FileStateBackend, StateBackend, StateEntry};
pub use persistent::{new_session_id, PersistentMemory, SessionExport};
pub use store::{SharedMemory, SharedState, UpdateFn};
