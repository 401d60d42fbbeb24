//! Process configuration.
//!
//! Read once at startup from `.env` and the environment:
//! `CROPCHAT__SERVER__PORT=8080` sets `server.port`,
//! `CROPCHAT__DEADLINES__SECONDARY_SECS=20` sets `deadlines.secondary_secs`.
//! The usual `GEMINI_API_KEY`, `OPENAI_API_KEY` and `HF_API_TOKEN`
//! variables fill in keys the prefixed variables leave empty.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use chat::FallbackDeadlines;
use extract::PrimaryDeadlines;

use crate::sessions::DEFAULT_MAX_SESSIONS;

const ENV_PREFIX: &str = "CROPCHAT";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("deadline `{0}` must be greater than zero")]
    ZeroDeadline(&'static str),

    #[error("server port must not be 0")]
    ZeroPort,

    #[error("sessions.max_sessions must be greater than zero")]
    ZeroSessions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub log: LogConfig,
    pub primary: PrimaryConfig,
    pub secondary: SecondaryConfig,
    pub tertiary: TertiaryConfig,
    pub deadlines: DeadlineConfig,
    pub sessions: SessionConfig,
    /// Classifier artifact; the bundled model is used when unset.
    pub model_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub json: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryBackend {
    #[default]
    Gemini,
    Ollama,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimaryConfig {
    pub backend: PrimaryBackend,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondaryConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TertiaryConfig {
    pub api_token: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlineConfig {
    pub relevance_secs: u64,
    pub extraction_secs: u64,
    pub primary_chat_secs: u64,
    pub secondary_secs: u64,
    pub tertiary_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Transcripts kept in memory; a quarter are dropped when full.
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            relevance_secs: 5,
            extraction_secs: 5,
            primary_chat_secs: 5,
            secondary_secs: 10,
            tertiary_secs: 15,
        }
    }
}

impl DeadlineConfig {
    pub fn primary(&self) -> PrimaryDeadlines {
        PrimaryDeadlines {
            relevance: Duration::from_secs(self.relevance_secs),
            extraction: Duration::from_secs(self.extraction_secs),
            chat: Duration::from_secs(self.primary_chat_secs),
        }
    }

    pub fn fallback(&self) -> FallbackDeadlines {
        FallbackDeadlines {
            secondary: Duration::from_secs(self.secondary_secs),
            tertiary: Duration::from_secs(self.tertiary_secs),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let all = [
            ("relevance_secs", self.relevance_secs),
            ("extraction_secs", self.extraction_secs),
            ("primary_chat_secs", self.primary_chat_secs),
            ("secondary_secs", self.secondary_secs),
            ("tertiary_secs", self.tertiary_secs),
        ];
        match all.iter().find(|(_, secs)| *secs == 0) {
            Some(&(name, _)) => Err(ConfigError::ZeroDeadline(name)),
            None => Ok(()),
        }
    }
}

/// Blank strings count as unset.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl AppConfig {
    /// Load from `.env` (if present) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars().collect())
    }

    /// Load from an explicit variable map instead of the process environment.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config: AppConfig = config::Config::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true)
                    .source(Some(vars.clone())),
            )
            .build()?
            .try_deserialize()?;

        config.fill_conventional_keys(&vars);
        config.validate()?;
        Ok(config)
    }

    fn fill_conventional_keys(&mut self, vars: &HashMap<String, String>) {
        let conventional = |name: &str| vars.get(name).filter(|v| !v.trim().is_empty()).cloned();

        if present(&self.primary.api_key).is_none() {
            self.primary.api_key = conventional("GEMINI_API_KEY");
        }
        if present(&self.secondary.api_key).is_none() {
            self.secondary.api_key = conventional("OPENAI_API_KEY");
        }
        if present(&self.tertiary.api_token).is_none() {
            self.tertiary.api_token = conventional("HF_API_TOKEN");
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::ZeroSessions);
        }
        self.deadlines.validate()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl PrimaryConfig {
    pub fn key(&self) -> Option<&str> {
        present(&self.api_key)
    }
}

impl SecondaryConfig {
    pub fn key(&self) -> Option<&str> {
        present(&self.api_key)
    }
}

impl TertiaryConfig {
    pub fn token(&self) -> Option<&str> {
        present(&self.api_token)
    }
}
