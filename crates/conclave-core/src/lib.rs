//! Core types and error definitions for the Conclave multi-agent engine.
//!
//! This crate provides the foundational types shared across all Conclave crates:
//! the unified error type and the message bus agents use to talk to each other.
//!
//! # Main types
//!
//! - [`ConclaveError`] — Unified error enum for all Conclave subsystems.
//! - [`ConclaveResult`] — Convenience alias for `Result<T, ConclaveError>`.
//! - [`Message`] — An immutable, timestamped message between two participants.
//! - [`MessageKind`] — Message classification (data, control, error, result).
//! - [`MessageBus`] — Append-only point-to-point and broadcast message channel.

/// In-process message bus with history and synchronous subscribers.
pub mod bus;
/// Error type shared by every crate in the workspace.
pub mod error;
/// Message types exchanged over the bus.
pub mod message;
/// Validation of names used as path components.
pub mod name;

pub use bus::{MessageBus, Subscriber, BROADCAST};
pub use error::{ConclaveError, ConclaveResult};
pub use message::{Message, MessageKind};
pub use name::validate_name;
