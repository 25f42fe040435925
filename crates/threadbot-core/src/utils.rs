//! Utility helpers: path resolution and string previews.

use std::path::PathBuf;

/// Get the Threadbot data directory (e.g. `~/.threadbot/`).
pub fn get_data_path() -> PathBuf {
    let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".threadbot")
}

/// Truncate a string to `max_len` characters, adding "..." if truncated.
/// Unicode-safe. Used for log previews of user messages.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

/// Expand `~` to the home directory in a path string.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
        return home.join(rest);
    }
    if path == "~" {
        return dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
    }
    PathBuf::from(path)
}
