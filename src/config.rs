//! Configuration loader and validator for the publish orchestrator.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub dispatch: Dispatch,
    pub services: Services,
    pub ai: Ai,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub bind_addr: String,
    pub data_dir: String,
}

/// Fan-out scheduling knobs: parallelism, per-attempt timeout, retries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dispatch {
    pub max_parallel: usize,
    pub attempt_timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

/// Per-service API endpoints. Overridable so tests can point adapters at
/// a stub server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Services {
    pub telegram_api_base: String,
    pub vk_api_base: String,
    pub vk_api_version: String,
    pub instagram_api_base: String,
}

/// External AI service endpoints (generation and transcription).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ai {
    pub generation_url: String,
    pub generation_model: String,
    pub transcription_url: String,
    pub api_key: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

impl Dispatch {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.bind_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("app.bind_addr must be non-empty"));
    }
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if cfg.dispatch.max_parallel == 0 {
        return Err(ConfigError::Invalid("dispatch.max_parallel must be > 0"));
    }
    if cfg.dispatch.attempt_timeout_secs == 0 {
        return Err(ConfigError::Invalid(
            "dispatch.attempt_timeout_secs must be > 0",
        ));
    }
    if cfg.dispatch.backoff_base_ms == 0 {
        return Err(ConfigError::Invalid("dispatch.backoff_base_ms must be > 0"));
    }
    // max_retries of 0 is valid: first failure is terminal.

    if cfg.services.telegram_api_base.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "services.telegram_api_base must be non-empty",
        ));
    }
    if cfg.services.vk_api_base.trim().is_empty() {
        return Err(ConfigError::Invalid("services.vk_api_base must be non-empty"));
    }
    if cfg.services.vk_api_version.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "services.vk_api_version must be non-empty",
        ));
    }
    if cfg.services.instagram_api_base.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "services.instagram_api_base must be non-empty",
        ));
    }

    if cfg.ai.generation_url.trim().is_empty() {
        return Err(ConfigError::Invalid("ai.generation_url must be non-empty"));
    }
    if cfg.ai.generation_model.trim().is_empty() {
        return Err(ConfigError::Invalid("ai.generation_model must be non-empty"));
    }
    if cfg.ai.transcription_url.trim().is_empty() {
        return Err(ConfigError::Invalid("ai.transcription_url must be non-empty"));
    }
    if cfg.ai.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("ai.api_key must be non-empty"));
    }

    Ok(())
}

/// Example YAML document; doubles as the config fixture in tests.
pub fn example() -> &'static str {
    r#"app:
  bind_addr: "0.0.0.0:8080"
  data_dir: "./data"

dispatch:
  max_parallel: 4
  attempt_timeout_secs: 30
  max_retries: 2
  backoff_base_ms: 1000

services:
  telegram_api_base: "https://api.telegram.org"
  vk_api_base: "https://api.vk.com"
  vk_api_version: "5.131"
  instagram_api_base: "https://graph.facebook.com/v19.0"

ai:
  generation_url: "https://api.deepseek.com/chat/completions"
  generation_model: "deepseek-chat"
  transcription_url: "https://api.openai.com/v1/audio/transcriptions"
  api_key: "YOUR_AI_API_KEY"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.dispatch.max_parallel, 4);
        assert_eq!(cfg.dispatch.backoff_base(), Duration::from_millis(1000));
    }

    #[test]
    fn invalid_bind_addr() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.bind_addr = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("bind_addr")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_dispatch_knobs() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.dispatch.max_parallel = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.dispatch.attempt_timeout_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.dispatch.backoff_base_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        // Zero retries is a legal policy.
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.dispatch.max_retries = 0;
        validate(&cfg).unwrap();
    }

    #[test]
    fn invalid_service_bases() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.services.vk_api_base = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("vk_api_base")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_ai_settings() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.ai.api_key = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.ai.generation_url = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.app.bind_addr, "0.0.0.0:8080");
    }
}
