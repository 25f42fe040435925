//! Threadbot Channels: chat channel integrations.
//!
//! - **base**: the `Channel` trait every integration implements
//! - **manager**: `ChannelManager`, lifecycle orchestration and outbound routing
//! - **discord**: Discord gateway + REST channel (feature `discord`, on by default)

pub mod base;
pub mod manager;

#[cfg(feature = "discord")]
pub mod discord;

pub use base::Channel;
pub use manager::ChannelManager;
