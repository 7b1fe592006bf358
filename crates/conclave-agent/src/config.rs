use crate::failover::RetryPolicy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionProvider {
    /// Deterministic local echo; no external service involved.
    #[default]
    Offline,
    /// Run a local executable: prompt on stdin, completion on stdout.
    Command,
}

/// The `[completion]` section of `conclave.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default)]
    pub provider: CompletionProvider,
    /// Executable for the `command` provider.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Enables retries with backoff when set.
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
    /// Tried in order after this backend gives up.
    #[serde(default)]
    pub fallbacks: Vec<CompletionConfig>,
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: CompletionProvider::Offline,
            command: None,
            args: Vec::new(),
            timeout_secs: default_timeout_secs(),
            retry_policy: None,
            fallbacks: Vec::new(),
        }
    }
}
