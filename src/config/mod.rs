//! Configuration system
//!
//! Handles loading configuration from multiple sources:
//! - Global config (~/.config/csvchat/config.toml)
//! - Project config (./csvchat.toml)
//! - Environment variables (CSVCHAT_*)

use crate::provider::DEFAULT_MODEL;
use crate::provider::groq::DEFAULT_BASE_URL;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// LLM provider and agent loop settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Session store settings
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served under `/static`; charts go to `<static_dir>/generated`
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Request body cap, applied to CSV uploads
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_port(),
            static_dir: default_static_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_hostname() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7860
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_max_upload_bytes() -> usize {
    20 * 1024 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used when `/setup` does not name one
    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on model round-trips per question
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_model: default_model(),
            temperature: default_temperature(),
            max_steps: default_max_steps(),
            max_tokens: default_max_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_steps() -> usize {
    12
}

fn default_max_tokens() -> usize {
    2048
}

fn default_request_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    /// Idle time after which a session is dropped. Unset keeps sessions for
    /// the life of the process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

/// Partial config as read from a TOML file; only present keys override.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: Option<toml::Table>,
    #[serde(default)]
    llm: Option<toml::Table>,
    #[serde(default)]
    session: Option<toml::Table>,
}

impl Config {
    /// Load configuration from all sources (global, project, env)
    pub async fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            config = config.merge_file(&global_path).await?;
        }

        let project = PathBuf::from("csvchat.toml");
        if project.exists() {
            config = config.merge_file(&project).await?;
        }

        config.apply_env();
        Ok(config)
    }

    /// Load defaults, then one explicit file, then the environment.
    pub async fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::default().merge_file(path).await?;
        config.apply_env();
        Ok(config)
    }

    /// Get the global config file path
    pub fn global_config_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "csvchat", "csvchat")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    async fn merge_file(self, path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config = self
            .merge_toml(&content)
            .with_context(|| format!("Invalid config {:?}", path))?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Overlay the keys present in a TOML document onto this config.
    pub fn merge_toml(self, content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        Ok(Self {
            server: overlay(self.server, file.server)?,
            llm: overlay(self.llm, file.llm)?,
            session: overlay(self.session, file.session)?,
        })
    }

    /// Apply environment variable overrides
    fn apply_env(&mut self) {
        if let Ok(val) = std::env::var("CSVCHAT_HOSTNAME") {
            self.server.hostname = val;
        }
        if let Ok(val) = std::env::var("CSVCHAT_PORT") {
            match val.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %val, "Invalid CSVCHAT_PORT value; ignoring"),
            }
        }
        if let Ok(val) = std::env::var("CSVCHAT_STATIC_DIR") {
            self.server.static_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("CSVCHAT_BASE_URL") {
            self.llm.base_url = val;
        }
        if let Ok(val) = std::env::var("CSVCHAT_DEFAULT_MODEL") {
            self.llm.default_model = val;
        }
        if let Ok(val) = std::env::var("CSVCHAT_SESSION_TTL_SECS") {
            match val.parse() {
                Ok(ttl) => self.session.ttl_secs = Some(ttl),
                Err(_) => tracing::warn!(
                    value = %val,
                    "Invalid CSVCHAT_SESSION_TTL_SECS value; expected seconds"
                ),
            }
        }
    }
}

/// Serialize `base`, overwrite it with the keys of `patch`, deserialize back.
fn overlay<T>(base: T, patch: Option<toml::Table>) -> Result<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    let Some(patch) = patch else {
        return Ok(base);
    };
    let mut value = toml::Value::try_from(&base)?;
    if let toml::Value::Table(table) = &mut value {
        table.extend(patch);
    }
    Ok(value.try_into()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_service_contract() {
        let config = Config::default();
        assert_eq!(config.server.port, 7860);
        assert_eq!(config.server.max_upload_bytes, 20 * 1024 * 1024);
        assert_eq!(config.llm.default_model, "llama-3-3-70b-instruct");
        assert!((config.llm.temperature - 0.2).abs() < f32::EPSILON);
        assert!(config.session.ttl_secs.is_none());
    }

    #[test]
    fn toml_overrides_only_present_keys() {
        let config = Config::default()
            .merge_toml(
                r#"
                [server]
                port = 9000

                [session]
                ttl_secs = 3600
                "#,
            )
            .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.hostname, "0.0.0.0");
        assert_eq!(config.session.ttl_secs, Some(3600));
        assert_eq!(config.llm.max_steps, 12);
    }

    #[test]
    fn bad_types_are_errors() {
        assert!(
            Config::default()
                .merge_toml("[server]\nport = \"high\"\n")
                .is_err()
        );
    }

    #[tokio::test]
    async fn load_from_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("csvchat.toml");
        std::fs::write(&path, "[llm]\nmax_steps = 3\n").unwrap();
        let config = Config::load_from(&path).await.unwrap();
        assert_eq!(config.llm.max_steps, 3);
    }
}
