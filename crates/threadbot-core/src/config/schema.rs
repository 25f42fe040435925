//! Configuration schema.
//!
//! Hierarchy: `Config` → `DiscordConfig`, `AssistantConfig`, `StoreConfig`.
//!
//! JSON on disk uses **camelCase** keys; Rust uses snake_case.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::store::DEFAULT_STORE_FILE;

/// Env var holding the Discord bot token.
pub const ENV_DISCORD_TOKEN: &str = "DISCORD_BOT_TOKEN";
/// Env var holding the OpenAI API key.
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
/// Env var holding the assistant id.
pub const ENV_ASSISTANT_ID: &str = "ASSISTANT_ID";

// ─────────────────────────────────────────────
// Root Config
// ─────────────────────────────────────────────

/// Root configuration: loaded from `~/.threadbot/config.json` + env vars.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub discord: DiscordConfig,
    pub assistant: AssistantConfig,
    pub store: StoreConfig,
}

impl Config {
    /// Check that everything needed to start the gateway is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.token.trim().is_empty() {
            return Err(ConfigError::Missing(ENV_DISCORD_TOKEN));
        }
        if self.assistant.api_key.trim().is_empty() {
            return Err(ConfigError::Missing(ENV_OPENAI_API_KEY));
        }
        let assistant_id = self.assistant.assistant_id.trim();
        if assistant_id.is_empty() {
            return Err(ConfigError::Missing(ENV_ASSISTANT_ID));
        }
        if !assistant_id.starts_with("asst_") {
            return Err(ConfigError::InvalidAssistantId(assistant_id.to_string()));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Discord
// ─────────────────────────────────────────────

/// Discord channel config.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscordConfig {
    /// Bot token. Normally supplied through `DISCORD_BOT_TOKEN`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token: String,
    /// Allow-list of Discord user ids. Empty = allow everyone.
    pub allowed_users: Vec<String>,
}

// ─────────────────────────────────────────────
// Assistant
// ─────────────────────────────────────────────

/// Hosted assistant (OpenAI Assistants API) settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssistantConfig {
    /// API key. Normally supplied through `OPENAI_API_KEY`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    /// Assistant id (`asst_...`). Normally supplied through `ASSISTANT_ID`.
    pub assistant_id: String,
    /// API base URL.
    pub api_base: String,
    /// Delay between run status polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Give up on (and cancel) a run after this many seconds.
    pub run_timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            assistant_id: String::new(),
            api_base: "https://api.openai.com/v1".to_string(),
            poll_interval_ms: 1500,
            run_timeout_secs: 120,
        }
    }
}

impl AssistantConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

// ─────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────

/// Where the user → thread table lives.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    /// Backing file. Relative paths resolve against the working directory;
    /// a leading `~` expands to the home directory.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_STORE_FILE.to_string(),
        }
    }
}

impl StoreConfig {
    pub fn resolved_path(&self) -> PathBuf {
        crate::utils::expand_home(&self.path)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
