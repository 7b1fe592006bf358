use conclave_agent::CompletionConfig;
use conclave_orchestrator::OrchestratorConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file read when `--config` is not given. Missing is not an error.
pub const DEFAULT_CONFIG_FILE: &str = "conclave.toml";

/// Contents of `conclave.toml`. Every section is optional.
#[derive(Debug, Default, Deserialize)]
pub struct ConclaveConfig {
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Persist shared state and event logs under `data_dir`.
    #[serde(default = "default_durable")]
    pub durable: bool,
    /// Sessions kept by `cleanup` when `--keep` is not given.
    #[serde(default = "default_keep_sessions")]
    pub keep_sessions: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            durable: default_durable(),
            keep_sessions: default_keep_sessions(),
        }
    }
}

impl StorageConfig {
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_durable() -> bool {
    true
}
fn default_keep_sessions() -> usize {
    10
}

/// Load the config. An explicit path must exist; the default file may not.
pub async fn load(explicit: Option<&Path>) -> anyhow::Result<ConclaveConfig> {
    let path = explicit.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if explicit.is_none() && e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ConclaveConfig::default());
        }
        Err(e) => {
            return Err(anyhow::anyhow!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        }
    };
    Ok(toml::from_str(&text)?)
}
