use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    /// Soft cap on how many tasks one queue runs per drain wave.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    3
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum retries of a failing step before the task is failed.
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    /// Pause between retries of the same step index.
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

fn default_retry_attempts() -> u32 {
    2
}

fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfig {
    /// How often workflow execution polls a submitted task's status.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Hard cap on steps executed in one workflow run. Graphs may contain
    /// intentional loops; this cap is what stops a runaway cycle.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_max_steps() -> u32 {
    64
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_steps: default_max_steps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    Simulated,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverConfig {
    #[serde(default = "default_driver_kind")]
    pub kind: DriverKind,
    /// Base URL of the remote automation backend (remote driver only).
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_driver_kind() -> DriverKind {
    DriverKind::Simulated
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            kind: default_driver_kind(),
            endpoint: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
        }
    }
}

/// Top-level runtime configuration, loadable from a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl RuntimeConfig {
    /// Default config file location: `~/.workcell/config.yaml`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".workcell")
            .join("config.yaml")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load from the default path, falling back to built-in defaults when the
    /// file does not exist.
    pub fn load_or_default() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.queue.concurrency, 3);
        assert_eq!(config.retry.attempts, 2);
        assert_eq!(config.retry.delay_ms, 1000);
        assert_eq!(config.workflow.max_steps, 64);
        assert_eq!(config.driver.kind, DriverKind::Simulated);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "retry:\n  attempts: 5\n";
        let config: RuntimeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.retry.delay_ms, 1000);
        assert_eq!(config.queue.concurrency, 3);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = RuntimeConfig::default();
        config.queue.concurrency = 8;
        config.driver.kind = DriverKind::Remote;
        config.driver.endpoint = Some("http://127.0.0.1:9333".to_string());
        config.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.queue.concurrency, 8);
        assert_eq!(loaded.driver.kind, DriverKind::Remote);
        assert_eq!(loaded.driver.endpoint.as_deref(), Some("http://127.0.0.1:9333"));
    }
}
