//! `threadbot status`: show configuration, credentials and store status.

use anyhow::Result;
use colored::Colorize;

use threadbot_core::config::schema::{ENV_ASSISTANT_ID, ENV_DISCORD_TOKEN, ENV_OPENAI_API_KEY};
use threadbot_core::config::{get_config_path, load_config};
use threadbot_core::ThreadStore;

use crate::helpers::{display_path, mark, print_banner};

/// Run the status command.
pub async fn run() -> Result<()> {
    let config = load_config(None);
    let config_path = get_config_path();

    print_banner();

    // Config file
    println!(
        "  {:<18} {} {}",
        "Config:".bold(),
        display_path(&config_path),
        if config_path.exists() {
            "✓".green().to_string()
        } else {
            "(not found, using defaults)".dimmed().to_string()
        }
    );

    // Credentials
    println!();
    println!("  {}", "Credentials:".bold());
    let credentials = [
        (ENV_DISCORD_TOKEN, !config.discord.token.trim().is_empty()),
        (ENV_OPENAI_API_KEY, !config.assistant.api_key.trim().is_empty()),
        (ENV_ASSISTANT_ID, !config.assistant.assistant_id.trim().is_empty()),
    ];
    for (name, present) in credentials {
        let detail = if present { "set" } else { "missing" };
        println!("    {:<20} {}", name, mark(present, detail));
    }
    if let Err(e) = config.validate() {
        println!("    {}", e.to_string().red());
    }

    // Assistant settings
    println!();
    println!("  {:<18} {}", "Assistant:".bold(), config.assistant.assistant_id);
    println!("  {:<18} {}", "API base:".bold(), config.assistant.api_base);
    println!(
        "  {:<18} {}",
        "Polling:".bold(),
        format!(
            "every {}ms, timeout {}s",
            config.assistant.poll_interval_ms, config.assistant.run_timeout_secs
        )
        .dimmed()
    );
    let allowed = if config.discord.allowed_users.is_empty() {
        "everyone".to_string()
    } else {
        format!("{} user(s)", config.discord.allowed_users.len())
    };
    println!("  {:<18} {}", "Allowed users:".bold(), allowed);

    // Store
    println!();
    let store_path = config.store.resolved_path();
    let store_status = match ThreadStore::open(&store_path).await {
        Ok(store) => mark(true, &format!("{} thread(s)", store.len().await)),
        Err(e) => mark(false, &e.to_string()),
    };
    println!(
        "  {:<18} {} {}",
        "Store:".bold(),
        display_path(&store_path),
        store_status
    );

    println!();
    Ok(())
}
