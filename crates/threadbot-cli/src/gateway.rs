//! Gateway command: wires the Discord channel, the relay and the thread store.
//!
//! Startup sequence:
//! 1. Load config and check credentials (fatal when incomplete)
//! 2. Verify the assistant exists (fatal on 401/404)
//! 3. Load the thread store (fatal when corrupt)
//! 4. Create message bus, relay and channel manager
//! 5. Run: `tokio::select!` of relay + channel manager
//! 6. Handle Ctrl+C for graceful shutdown; a failed channel exits with an error

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use threadbot_channels::ChannelManager;
use threadbot_core::bus::queue::MessageBus;
use threadbot_core::config::load_config;
use threadbot_core::ThreadStore;
use threadbot_providers::{AssistantError, AssistantInfo, AssistantProvider, AssistantsClient};
use threadbot_relay::Relay;

use crate::helpers;

/// Inbound/outbound queue depth.
const BUS_CAPACITY: usize = 100;

/// Run the gateway until Ctrl+C.
pub async fn run() -> Result<()> {
    helpers::print_banner();
    println!("  Mode: Gateway");
    println!();

    // 1. Config
    let config = load_config(None);
    config
        .validate()
        .context("configuration incomplete: set DISCORD_BOT_TOKEN, OPENAI_API_KEY and ASSISTANT_ID")?;

    // 2. Assistant
    let client = AssistantsClient::new(&config.assistant).context("failed to build assistant client")?;
    let assistant = check_assistant(client.verify_assistant().await)
        .with_context(|| format!("assistant {} is not usable", config.assistant.assistant_id))?;

    // 3. Store
    let store_path = config.store.resolved_path();
    let store = ThreadStore::open(&store_path)
        .await
        .with_context(|| format!("failed to load thread store {}", store_path.display()))?;
    let store = Arc::new(store);

    // 4. Bus, relay, channels
    let bus = Arc::new(MessageBus::new(BUS_CAPACITY));
    let provider: Arc<dyn AssistantProvider> = Arc::new(client);
    let relay = Relay::new(store.clone(), provider.clone(), bus.clone());

    #[allow(unused_mut)]
    let mut channel_manager = ChannelManager::new(bus.clone());

    #[cfg(feature = "discord")]
    {
        use threadbot_channels::discord::DiscordChannel;
        let discord = DiscordChannel::new(
            config.discord.token.clone(),
            bus.clone(),
            config.discord.allowed_users.clone(),
        )
        .context("failed to create discord channel")?;
        channel_manager.register(Arc::new(discord));
    }

    let assistant_label = match &assistant {
        Some(info) => format!(
            "{} ({}, {})",
            info.name.as_deref().unwrap_or("unnamed"),
            info.id,
            info.model
        ),
        None => format!("{} (unverified)", config.assistant.assistant_id),
    };

    info!(
        assistant = %config.assistant.assistant_id,
        store = %store_path.display(),
        threads = store.len().await,
        channels = ?channel_manager.channel_names(),
        "gateway starting"
    );

    println!("  Assistant: {assistant_label}");
    println!("  Provider:  {}", provider.display_name());
    println!(
        "  Store:     {} ({} threads)",
        helpers::display_path(&store_path),
        store.len().await
    );
    println!("  Channels:  {}", channel_manager.channel_names().join(", "));
    println!();

    if channel_manager.is_empty() {
        println!("  ⚠  No channels registered. Build with the `discord` feature.");
        println!();
    }

    println!("  Ctrl+C to stop");
    println!();

    // 5. Run until something exits or Ctrl+C
    let outcome = tokio::select! {
        _ = relay.run() => {
            info!("relay exited");
            Ok(())
        }
        result = channel_manager.start_all() => {
            result.context("discord channel stopped; check the bot token and its intents")
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            println!("  Shutting down...");
            info!("received Ctrl+C, shutting down");
            Ok(())
        }
    };

    bus.close_inbound().await;
    channel_manager.stop_all().await;

    outcome?;
    println!("  Gateway stopped. Goodbye!");
    Ok(())
}

/// Decide whether the startup assistant check allows the gateway to run.
///
/// Bad credentials or an unknown assistant id are fatal. Anything else
/// (network trouble, 5xx) is logged and the gateway starts unverified.
fn check_assistant(
    result: Result<AssistantInfo, AssistantError>,
) -> Result<Option<AssistantInfo>> {
    match result {
        Ok(info) => {
            info!(
                assistant = %info.id,
                name = info.name.as_deref().unwrap_or(""),
                model = %info.model,
                "assistant verified"
            );
            Ok(Some(info))
        }
        Err(e @ (AssistantError::Unauthorized | AssistantError::NotFound { .. })) => Err(e.into()),
        Err(e) => {
            warn!(error = %e, "could not verify assistant, continuing");
            Ok(None)
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
