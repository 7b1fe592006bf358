use super::CompletionBackend;
use async_trait::async_trait;
use conclave_core::ConclaveResult;

const ECHO_CHARS: usize = 200;

/// Deterministic local "completion" for dry runs and demos.
///
/// Echoes the first non-empty line of the prompt. Never returns structured
/// output, so planning falls back to template plans and workers report plain
/// text findings.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineBackend;

impl OfflineBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CompletionBackend for OfflineBackend {
    async fn complete(&self, prompt: &str) -> ConclaveResult<String> {
        let line = prompt
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default();
        let echo: String = line.chars().take(ECHO_CHARS).collect();
        Ok(format!("[offline] {echo}"))
    }

    fn name(&self) -> &str {
        "offline"
    }
}
