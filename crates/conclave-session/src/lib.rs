//! Structured event log for Conclave sessions.
//!
//! Every agent owns an append-only stream of timestamped events (decisions,
//! tool calls, metrics, messages, task lifecycle, errors). Streams are grouped
//! per session and can be analysed after the fact.
//!
//! # Main types
//!
//! - [`Event`] / [`EventType`] — One log record.
//! - [`AgentLogger`] — Writes events for a single agent and mirrors them to `tracing`.
//! - [`EventStore`] — Storage trait with in-memory and JSONL file implementations.
//! - [`LogAnalysis`] — Aggregate statistics over a set of events.

pub mod analysis;
pub mod event;
pub mod logger;
pub mod store;

pub use analysis::{analyze, LogAnalysis};
pub use event::{Event, EventType};
pub use logger::{AgentLogger, SYSTEM_AGENT_ID};
pub use store::{EventStore, FileEventStore, InMemoryEventStore};
