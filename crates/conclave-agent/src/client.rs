use crate::backends::command::CommandBackend;
use crate::backends::offline::OfflineBackend;
use crate::backends::CompletionBackend;
use crate::config::{CompletionConfig, CompletionProvider};
use crate::failover::{FailoverBackend, RetryPolicy};
use conclave_core::ConclaveResult;
use std::sync::Arc;
use tracing::info;

fn single_backend(config: &CompletionConfig) -> ConclaveResult<Arc<dyn CompletionBackend>> {
    let backend: Arc<dyn CompletionBackend> = match config.provider {
        CompletionProvider::Offline => Arc::new(OfflineBackend::new()),
        CompletionProvider::Command => Arc::new(CommandBackend::from_config(config)?),
    };
    Ok(backend)
}

/// Build the completion backend described by `config`.
///
/// A plain provider block yields that backend directly. With a
/// `retry_policy` or any `fallbacks`, the result is a [`FailoverBackend`]
/// over the primary followed by each fallback in order; without a retry
/// policy every backend is tried once.
pub fn build_backend(config: &CompletionConfig) -> ConclaveResult<Arc<dyn CompletionBackend>> {
    let primary = single_backend(config)?;
    if config.retry_policy.is_none() && config.fallbacks.is_empty() {
        return Ok(primary);
    }

    let mut chain = vec![primary];
    for fallback in &config.fallbacks {
        chain.push(build_backend(fallback)?);
    }
    let policy = config.retry_policy.clone().unwrap_or(RetryPolicy {
        max_retries: 0,
        ..RetryPolicy::default()
    });

    info!(
        backends = chain.len(),
        max_retries = policy.max_retries,
        "Completion failover enabled"
    );
    Ok(Arc::new(FailoverBackend::new(chain, policy)?))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_is_offline() {
        let backend = build_backend(&CompletionConfig::default()).unwrap();
        assert_eq!(backend.name(), "offline");
        assert!(backend.complete("hi").await.unwrap().starts_with("[offline]"));
    }

    #[test]
    fn test_fallbacks_wrap_in_failover() {
        let config = CompletionConfig {
            fallbacks: vec![CompletionConfig::default()],
            ..CompletionConfig::default()
        };
        assert_eq!(build_backend(&config).unwrap().name(), "failover");
    }

    #[test]
    fn test_invalid_command_config_fails() {
        let config = CompletionConfig {
            provider: CompletionProvider::Command,
            ..CompletionConfig::default()
        };
        assert!(build_backend(&config).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_falls_back_to_offline() {
        let config = CompletionConfig {
            provider: CompletionProvider::Command,
            command: Some("false".into()),
            fallbacks: vec![CompletionConfig::default()],
            ..CompletionConfig::default()
        };
        let backend = build_backend(&config).unwrap();
        let out = backend.complete("question").await.unwrap();
        assert_eq!(out, "[offline] question");
    }
}
