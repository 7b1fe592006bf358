//! Completion service boundary for Conclave.
//!
//! Agents never talk to a model vendor directly. They hold an
//! `Arc<dyn CompletionBackend>` that turns a prompt into a completion, built
//! from [`CompletionConfig`] by [`build_backend`].

pub mod backends;
pub mod client;
pub mod config;
pub mod failover;

pub use backends::command::CommandBackend;
pub use backends::offline::OfflineBackend;
pub use backends::CompletionBackend;
pub use client::build_backend;
pub use config::{CompletionConfig, CompletionProvider};
pub use failover::{is_retryable, FailoverBackend, RetryPolicy};
