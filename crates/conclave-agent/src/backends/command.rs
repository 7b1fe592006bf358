use super::CompletionBackend;
use crate::config::CompletionConfig;
use async_trait::async_trait;
use conclave_core::{ConclaveError, ConclaveResult};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Completion through a local executable.
///
/// The prompt is written to the child's stdin; its stdout is the completion.
/// A non-zero exit status or an expired timeout is a completion error.
pub struct CommandBackend {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandBackend {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    /// Build from a `provider = "command"` config block.
    pub fn from_config(config: &CompletionConfig) -> ConclaveResult<Self> {
        let program = config
            .command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| {
                ConclaveError::Config("completion provider 'command' requires `command`".into())
            })?;
        Ok(Self::new(
            program,
            config.args.clone(),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    async fn run(&self, prompt: &str) -> ConclaveResult<String> {
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ConclaveError::Completion(format!("Failed to run '{}': {e}", self.program))
            })?;

        // Feed stdin while stdout is drained, or a child that echoes as it
        // reads fills its output pipe and both sides block.
        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            let written = match stdin.write_all(prompt.as_bytes()).await {
                Ok(()) => stdin.shutdown().await,
                Err(e) => Err(e),
            };
            match written {
                // A child that exits without reading its input closes the pipe
                // early; its exit status is what gets reported.
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            }
        };

        let ((), output) = tokio::try_join!(feed, child.wait_with_output())?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConclaveError::Completion(format!(
                "'{}' failed (exit {}): {}",
                self.program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        Ok(stdout.trim_end().to_string())
    }
}

#[async_trait]
impl CompletionBackend for CommandBackend {
    async fn complete(&self, prompt: &str) -> ConclaveResult<String> {
        tracing::debug!(program = %self.program, prompt_len = prompt.len(), "Command: spawning");

        // Dropping the future on timeout drops the child, which kills it.
        match tokio::time::timeout(self.timeout, self.run(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(ConclaveError::Completion(format!(
                "'{}' timeout after {}s",
                self.program,
                self.timeout.as_secs()
            ))),
        }
    }

    fn name(&self) -> &str {
        &self.program
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sh(script: &str, timeout_secs: u64) -> CommandBackend {
        CommandBackend::new(
            "sh",
            vec!["-c".into(), script.into()],
            Duration::from_secs(timeout_secs),
        )
    }

    #[tokio::test]
    async fn test_prompt_round_trips_through_stdin() {
        let backend = CommandBackend::new("cat", vec![], Duration::from_secs(5));
        let out = backend.complete("hello from stdin").await.unwrap();
        assert_eq!(out, "hello from stdin");
    }

    #[tokio::test]
    async fn test_large_prompt_is_not_deadlocked() {
        let backend = CommandBackend::new("cat", vec![], Duration::from_secs(5));
        let prompt = "x".repeat(1 << 20);
        let out = backend.complete(&prompt).await.unwrap();
        assert_eq!(out.len(), 1 << 20);
    }

    #[tokio::test]
    async fn test_child_ignoring_stdin_reports_exit_status() {
        let backend = sh("echo done", 5);
        let out = backend.complete(&"y".repeat(1 << 20)).await.unwrap();
        assert_eq!(out, "done");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_error() {
        let backend = sh("echo broken >&2; exit 3", 5);
        let err = backend.complete("x").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exit 3"), "{msg}");
        assert!(msg.contains("broken"), "{msg}");
    }

    #[tokio::test]
    async fn test_timeout() {
        let backend = sh("sleep 5", 1);
        let err = backend.complete("x").await.unwrap_err();
        assert!(err.to_string().contains("timeout"));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let backend = CommandBackend::new("conclave-no-such-binary", vec![], Duration::from_secs(1));
        let err = backend.complete("x").await.unwrap_err();
        assert!(matches!(err, ConclaveError::Completion(_)));
    }

    #[test]
    fn test_from_config_requires_command() {
        let config = CompletionConfig {
            provider: crate::config::CompletionProvider::Command,
            ..CompletionConfig::default()
        };
        assert!(matches!(
            CommandBackend::from_config(&config),
            Err(ConclaveError::Config(_))
        ));
    }
}
