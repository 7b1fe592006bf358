pub mod command;
pub mod offline;

use async_trait::async_trait;
use conclave_core::ConclaveResult;

/// A language-model completion service.
///
/// Takes a prompt, returns the completion text or fails. Implementations must
/// be safe to call concurrently from many workers.
///
/// To add a new provider:
/// 1. Create a new module in `backends/`
/// 2. Implement `CompletionBackend` for your struct
/// 3. Add the variant to `CompletionProvider` in `config.rs`
/// 4. Wire it up in `build_backend()` in `client.rs`
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Produce a completion for `prompt`.
    async fn complete(&self, prompt: &str) -> ConclaveResult<String>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "completion"
    }
}
