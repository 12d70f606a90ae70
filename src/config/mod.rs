//! Configuration (layered: defaults < config file < environment).
//!
//! Resolved once at startup by the caller and injected into the provider
//! adapter and runtime; the conversation core never reads the environment.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::ChatLoopError;
use crate::types::GenerationSettings;

const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Which provider adapter to build.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
pub enum ProviderKind {
    #[default]
    #[serde(rename = "openai")]
    #[strum(serialize = "openai")]
    OpenAi,
    #[serde(rename = "zhipu")]
    #[strum(serialize = "zhipu")]
    Zhipu,
    #[serde(rename = "openai-compatible")]
    #[strum(serialize = "openai-compatible")]
    OpenAiCompatible,
}

impl ProviderKind {
    /// Base URL used when none is configured.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi | Self::OpenAiCompatible => "https://api.openai.com/v1",
            Self::Zhipu => "https://open.bigmodel.cn/api/paas/v4",
        }
    }
}

/// Provider selector and credential.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Knobs for the conversation runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Stages a single run may execute before it must suspend.
    pub max_stage_steps: usize,
    /// Longest wait for one fragment; `None` waits forever.
    pub stream_idle_timeout_ms: Option<u64>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_stage_steps: 32,
            stream_idle_timeout_ms: Some(120_000),
        }
    }
}

impl RuntimeOptions {
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatLoopConfig {
    pub provider: ProviderConfig,
    pub system_prompt: Option<String>,
    pub generation: GenerationSettings,
    pub runtime: RuntimeOptions,
}

impl ChatLoopConfig {
    /// Defaults overridden by `.env` and process environment variables.
    pub fn from_env() -> Result<Self, ChatLoopError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::default().apply_env_with(|key| std::env::var(key).ok())
    }

    /// Config file at the default location (if any), then the environment.
    pub fn load_default() -> Result<Self, ChatLoopError> {
        let _ = dotenvy::dotenv();
        let base = match default_config_path() {
            Some(path) if path.exists() => Self::load(&path)?,
            _ => Self::default(),
        };
        base.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ChatLoopError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
            .map_err(|e| ChatLoopError::Configuration(format!("{}: {e}", path.display())))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ChatLoopError> {
        toml::from_str(raw).map_err(|e| ChatLoopError::Configuration(e.to_string()))
    }

    /// Apply overrides from `PROVIDER`, `MODEL_CHOICE`, `BASE_URL`,
    /// `LLM_API_KEY` and `SYSTEM_PROMPT`, read through `lookup`.
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self, ChatLoopError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(kind) = lookup("PROVIDER") {
            self.provider.kind = kind.parse().map_err(|_| {
                ChatLoopError::Configuration(format!("Unknown PROVIDER '{kind}'"))
            })?;
        }
        if let Some(model) = lookup("MODEL_CHOICE") {
            self.provider.model = model;
        }
        if let Some(url) = lookup("BASE_URL") {
            self.provider.base_url = Some(url);
        }
        if let Some(key) = lookup("LLM_API_KEY") {
            self.provider.api_key = Some(key);
        }
        if let Some(prompt) = lookup("SYSTEM_PROMPT") {
            self.system_prompt = Some(prompt);
        }
        Ok(self)
    }
}

/// `<config dir>/chatloop/config.toml` for the current user.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "chatloop")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
