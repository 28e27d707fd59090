use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::engine::{DEFAULT_REGION_TAG, Delimiters};
use crate::remote::RemoteConfig;

pub const CONFIG_FILENAME: &str = "wikimigrate.toml";
pub const DEFAULT_API_URL: &str = "https://commons.wikimedia.org/w/api.php";
pub const DEFAULT_USER_AGENT: &str = "wikimigrate/0.2";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrateConfig {
    #[serde(default)]
    pub rules: RulesSection,
    #[serde(default)]
    pub features: FeaturesSection,
    #[serde(default)]
    pub delimiter: DelimiterSection,
    #[serde(default)]
    pub batch: BatchSection,
    #[serde(default)]
    pub remote: RemoteSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RulesSection {
    pub content: Option<PathBuf>,
    pub titles: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FeaturesSection {
    #[serde(default)]
    pub activate: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DelimiterSection {
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BatchSection {
    #[serde(default)]
    pub extensions: Vec<String>,
    pub jobs: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RemoteSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub retry_delay_ms: Option<u64>,
}

impl MigrateConfig {
    pub fn delimiters(&self) -> Delimiters {
        match self.delimiter.tag.as_deref().map(str::trim) {
            Some(tag) if !tag.is_empty() => Delimiters::new(tag),
            _ => Delimiters::new(DEFAULT_REGION_TAG),
        }
    }

    /// Resolve remote settings: env > config > default.
    pub fn remote_config(&self) -> RemoteConfig {
        self.remote_config_with_lookup(|key| env::var(key).ok())
    }

    pub fn remote_config_with_lookup<F>(&self, lookup_env: F) -> RemoteConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_text = |key: &str| {
            lookup_env(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let env_u64 = |key: &str| env_text(key).and_then(|value| value.parse::<u64>().ok());

        RemoteConfig {
            api_url: env_text("WIKI_API_URL")
                .or_else(|| self.remote.api_url.clone())
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            user_agent: env_text("WIKI_USER_AGENT")
                .or_else(|| self.remote.user_agent.clone())
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout_ms: env_u64("WIKI_HTTP_TIMEOUT_MS")
                .or(self.remote.timeout_ms)
                .unwrap_or(DEFAULT_TIMEOUT_MS),
            retry_delay_ms: env_u64("WIKI_HTTP_RETRY_DELAY_MS")
                .or(self.remote.retry_delay_ms)
                .unwrap_or(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Load and parse a MigrateConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MigrateConfig> {
    if !config_path.exists() {
        return Ok(MigrateConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MigrateConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}
