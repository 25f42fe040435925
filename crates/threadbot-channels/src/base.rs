//! Channel trait: the interface a chat integration exposes to the manager.
//!
//! - `start()`: begin listening for incoming messages (long-running)
//! - `stop()`: graceful shutdown
//! - `send()`: deliver an outbound message
//! - `name()`: channel identifier matching `OutboundMessage.channel`

use async_trait::async_trait;
use threadbot_core::bus::types::OutboundMessage;

/// Every chat channel implements this trait.
///
/// The `ChannelManager` holds `Arc<dyn Channel>` and orchestrates
/// start/stop/send across registered channels.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Unique channel name (e.g. "discord").
    fn name(&self) -> &str;

    /// Start listening for incoming messages.
    ///
    /// Long-running: publishes `InboundMessage`s to the bus until `stop()`
    /// is called.
    async fn start(&self) -> anyhow::Result<()>;

    /// Stop listening and clean up resources.
    async fn stop(&self) -> anyhow::Result<()>;

    /// Send an outbound message to this channel.
    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()>;
}
