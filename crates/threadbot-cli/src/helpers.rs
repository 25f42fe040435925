//! Shared CLI helpers: banner, status marks, path display.

use std::path::Path;

use colored::Colorize;

/// Print the banner shown when a command starts.
pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}  v{}", "🧵 Threadbot".cyan().bold(), version.dimmed());
    println!();
}

/// `✓ detail` in green or `✗ detail` in red.
pub fn mark(ok: bool, detail: &str) -> String {
    if ok {
        format!("{} {}", "✓".green(), detail)
    } else {
        format!("{} {}", "✗".red(), detail.red())
    }
}

/// Show `path` with the home directory collapsed to `~`.
pub fn display_path(path: &Path) -> String {
    if let Some(home) = dirs_next::home_dir() {
        if let Ok(rest) = path.strip_prefix(&home) {
            return Path::new("~").join(rest).display().to_string();
        }
    }
    path.display().to_string()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_display_path_collapses_home() {
        if let Some(home) = dirs_next::home_dir() {
            let shown = display_path(&home.join(".threadbot").join("config.json"));
            assert_eq!(shown, PathBuf::from("~/.threadbot/config.json").display().to_string());
        }
    }

    #[test]
    fn test_display_path_leaves_relative_paths() {
        assert_eq!(
            display_path(Path::new("user_threads_data.json")),
            "user_threads_data.json"
        );
    }

    #[test]
    fn test_mark_contains_detail() {
        colored::control::set_override(false);
        assert_eq!(mark(true, "set"), "✓ set");
        assert_eq!(mark(false, "missing"), "✗ missing");
    }
}
