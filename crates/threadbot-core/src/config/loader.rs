//! Config loader: reads `~/.threadbot/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.threadbot/config.json`
//! 3. Credentials: `DISCORD_BOT_TOKEN`, `OPENAI_API_KEY`, `ASSISTANT_ID`
//! 4. `THREADBOT_<SECTION>__<FIELD>` overrides

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::{Config, ENV_ASSISTANT_ID, ENV_DISCORD_TOKEN, ENV_OPENAI_API_KEY};

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_data_path().join("config.json")
}

/// Load configuration from `path` (or the default path) + process env.
///
/// Falls back to defaults if the file doesn't exist or can't be parsed.
/// Credentials are not checked here; call [`Config::validate`].
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);
    let config = load_config_file(&config_path);
    apply_env_overrides(config, |key| std::env::var(key).ok())
}

/// Read and parse the JSON config file.
fn load_config_file(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return Config::default();
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return Config::default();
        }
    };

    match serde_json::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            warn!("Failed to parse config JSON {}: {}", path.display(), e);
            Config::default()
        }
    }
}

/// Apply environment overrides on top of a loaded config.
///
/// `lookup` resolves an env var name to its value; the process environment in
/// production, a map in tests.
///
/// Supported overrides:
/// - `DISCORD_BOT_TOKEN` → `discord.token`
/// - `OPENAI_API_KEY` → `assistant.api_key`
/// - `ASSISTANT_ID` → `assistant.assistant_id`
/// - `THREADBOT_DISCORD__ALLOWED_USERS` → `discord.allowed_users` (comma separated)
/// - `THREADBOT_ASSISTANT__API_BASE` → `assistant.api_base`
/// - `THREADBOT_ASSISTANT__POLL_INTERVAL_MS` → `assistant.poll_interval_ms`
/// - `THREADBOT_ASSISTANT__RUN_TIMEOUT_SECS` → `assistant.run_timeout_secs`
/// - `THREADBOT_STORE__PATH` → `store.path`
pub fn apply_env_overrides<F>(mut config: Config, lookup: F) -> Config
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup(ENV_DISCORD_TOKEN) {
        config.discord.token = val;
    }
    if let Some(val) = lookup(ENV_OPENAI_API_KEY) {
        config.assistant.api_key = val;
    }
    if let Some(val) = lookup(ENV_ASSISTANT_ID) {
        config.assistant.assistant_id = val;
    }

    if let Some(val) = lookup("THREADBOT_DISCORD__ALLOWED_USERS") {
        config.discord.allowed_users = val
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }

    if let Some(val) = lookup("THREADBOT_ASSISTANT__API_BASE") {
        config.assistant.api_base = val;
    }
    if let Some(val) = lookup("THREADBOT_ASSISTANT__POLL_INTERVAL_MS") {
        match val.parse::<u64>() {
            Ok(ms) => config.assistant.poll_interval_ms = ms,
            Err(_) => warn!(value = %val, "ignoring invalid THREADBOT_ASSISTANT__POLL_INTERVAL_MS"),
        }
    }
    if let Some(val) = lookup("THREADBOT_ASSISTANT__RUN_TIMEOUT_SECS") {
        match val.parse::<u64>() {
            Ok(secs) => config.assistant.run_timeout_secs = secs,
            Err(_) => warn!(value = %val, "ignoring invalid THREADBOT_ASSISTANT__RUN_TIMEOUT_SECS"),
        }
    }

    if let Some(val) = lookup("THREADBOT_STORE__PATH") {
        config.store.path = val;
    }

    config
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
