//! `threadbot threads`: list stored user → thread mappings (read-only).

use anyhow::{Context, Result};
use colored::Colorize;

use threadbot_core::config::load_config;
use threadbot_core::ThreadStore;

use crate::helpers::display_path;

pub async fn run() -> Result<()> {
    let config = load_config(None);
    let store_path = config.store.resolved_path();
    let store = ThreadStore::open(&store_path)
        .await
        .with_context(|| format!("failed to load thread store {}", store_path.display()))?;

    let entries = store.entries().await;

    println!();
    println!(
        "  {} {}",
        "Threads in".bold(),
        display_path(&store_path).bold()
    );
    println!();

    if entries.is_empty() {
        println!("  {}", "(no threads yet)".dimmed());
    } else {
        for line in format_entries(&entries) {
            println!("  {line}");
        }
        println!();
        println!("  {} mapping(s)", entries.len());
    }

    println!();
    Ok(())
}

/// One aligned `user  →  thread` line per mapping.
fn format_entries(entries: &[(String, String)]) -> Vec<String> {
    let width = entries.iter().map(|(user, _)| user.len()).max().unwrap_or(0);
    entries
        .iter()
        .map(|(user, thread)| format!("{user:<width$}  →  {thread}"))
        .collect()
}
