//! Channel Manager: starts channels and routes relay replies back to them.
//!
//! Responsibilities:
//! - Register channels
//! - Start/stop all channels concurrently via `tokio::spawn`
//! - Dispatch outbound messages from the bus to the correct channel

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn};

use threadbot_core::bus::queue::MessageBus;

use crate::base::Channel;

// ─────────────────────────────────────────────
// ChannelManager
// ─────────────────────────────────────────────

/// Manages the lifecycle and outbound routing for all chat channels.
pub struct ChannelManager {
    /// Registered channels, keyed by name.
    channels: HashMap<String, Arc<dyn Channel>>,
    /// Message bus for outbound message consumption.
    bus: Arc<MessageBus>,
    /// Shutdown signal.
    shutdown: Arc<Notify>,
}

impl ChannelManager {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            channels: HashMap::new(),
            bus,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Register a channel. Overwrites any previous channel with the same name.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "registered channel");
        self.channels.insert(name, channel);
    }

    /// Names of all registered channels, sorted.
    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Start all channels plus the outbound dispatcher.
    ///
    /// Blocks until [`stop_all`](Self::stop_all) or
    /// [`signal_shutdown`](Self::signal_shutdown) is called, or until a
    /// channel's `start` fails. A failed channel stops the dispatcher and its
    /// error is returned.
    pub async fn start_all(&self) -> Result<()> {
        if self.channels.is_empty() {
            warn!("no channels registered, nothing to start");
            return Ok(());
        }

        info!(
            channels = ?self.channel_names(),
            "starting {} channel(s)",
            self.channels.len()
        );

        let (failed_tx, mut failed_rx) = mpsc::channel::<(String, anyhow::Error)>(self.channels.len());

        for (name, channel) in &self.channels {
            let ch = channel.clone();
            let ch_name = name.clone();
            let failed = failed_tx.clone();

            tokio::spawn(async move {
                info!(channel = %ch_name, "channel starting");
                if let Err(e) = ch.start().await {
                    error!(channel = %ch_name, error = %e, "channel start failed");
                    let _ = failed.send((ch_name.clone(), e)).await;
                }
                info!(channel = %ch_name, "channel stopped");
            });
        }
        drop(failed_tx);

        let bus = self.bus.clone();
        let channels = self.channels.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            Self::dispatch_outbound(bus, channels, shutdown).await;
        });

        tokio::select! {
            _ = self.shutdown.notified() => {
                info!("channel manager shutting down");
                Ok(())
            }
            Some((name, e)) = failed_rx.recv() => {
                self.shutdown.notify_waiters();
                Err(e.context(format!("channel {name} stopped with an error")))
            }
        }
    }

    /// Stop all channels and the outbound dispatcher.
    pub async fn stop_all(&self) {
        info!("stopping all channels");

        self.shutdown.notify_waiters();

        for (name, channel) in &self.channels {
            debug!(channel = %name, "stopping channel");
            if let Err(e) = channel.stop().await {
                error!(channel = %name, error = %e, "channel stop failed");
            }
        }

        info!("all channels stopped");
    }

    /// Wake `start_all` and the dispatcher without stopping channels.
    pub fn signal_shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Route relay replies from the bus to the channel named in each message.
    async fn dispatch_outbound(
        bus: Arc<MessageBus>,
        channels: HashMap<String, Arc<dyn Channel>>,
        shutdown: Arc<Notify>,
    ) {
        info!("outbound dispatcher started");

        loop {
            tokio::select! {
                msg = bus.consume_outbound() => {
                    let Some(outbound) = msg else {
                        info!("outbound bus closed, dispatcher exiting");
                        break;
                    };

                    debug!(
                        channel = %outbound.channel,
                        chat_id = %outbound.chat_id,
                        content_len = outbound.content.len(),
                        "dispatching outbound message"
                    );

                    match channels.get(&outbound.channel) {
                        Some(channel) => {
                            if let Err(e) = channel.send(&outbound).await {
                                error!(
                                    channel = %outbound.channel,
                                    error = %e,
                                    "failed to send outbound message"
                                );
                            }
                        }
                        None => warn!(
                            channel = %outbound.channel,
                            "no channel registered for outbound message"
                        ),
                    }
                }
                _ = shutdown.notified() => {
                    info!("dispatcher received shutdown signal");
                    break;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use threadbot_core::bus::types::OutboundMessage;

    struct MockChannel {
        channel_name: String,
        stopped: Arc<AtomicBool>,
        send_count: Arc<AtomicUsize>,
    }

    impl MockChannel {
        fn new(name: &str) -> Self {
            Self {
                channel_name: name.into(),
                stopped: Arc::new(AtomicBool::new(false)),
                send_count: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait::async_trait]
    impl Channel for MockChannel {
        fn name(&self) -> &str {
            &self.channel_name
        }

        async fn start(&self) -> anyhow::Result<()> {
            // Long-running listener
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn send(&self, _msg: &OutboundMessage) -> anyhow::Result<()> {
            self.send_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Channel whose `start` fails straight away, like a rejected login.
    struct FailingChannel;

    #[async_trait::async_trait]
    impl Channel for FailingChannel {
        fn name(&self) -> &str {
            "broken"
        }

        async fn start(&self) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("authentication failed"))
        }

        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn send(&self, _msg: &OutboundMessage) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn spawn_dispatcher(
        bus: Arc<MessageBus>,
        channels: HashMap<String, Arc<dyn Channel>>,
        shutdown: Arc<Notify>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            ChannelManager::dispatch_outbound(bus, channels, shutdown).await;
        })
    }

    #[test]
    fn test_new_manager_empty() {
        let mgr = ChannelManager::new(Arc::new(MessageBus::new(32)));
        assert!(mgr.is_empty());
        assert_eq!(mgr.len(), 0);
    }

    #[test]
    fn test_register_sorted_and_overwrites() {
        let mut mgr = ChannelManager::new(Arc::new(MessageBus::new(32)));

        mgr.register(Arc::new(MockChannel::new("discord")));
        mgr.register(Arc::new(MockChannel::new("console")));
        mgr.register(Arc::new(MockChannel::new("discord")));

        assert_eq!(mgr.len(), 2);
        assert_eq!(mgr.channel_names(), vec!["console", "discord"]);
    }

    #[tokio::test]
    async fn test_start_all_empty() {
        let mgr = ChannelManager::new(Arc::new(MessageBus::new(32)));
        assert!(mgr.start_all().await.is_ok());
    }

    #[tokio::test]
    async fn test_stop_all() {
        let mut mgr = ChannelManager::new(Arc::new(MessageBus::new(32)));

        let ch = Arc::new(MockChannel::new("discord"));
        let stopped = ch.stopped.clone();
        mgr.register(ch);

        mgr.stop_all().await;
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_dispatch_outbound_routes_correctly() {
        let bus = Arc::new(MessageBus::new(32));

        let discord = Arc::new(MockChannel::new("discord"));
        let console = Arc::new(MockChannel::new("console"));
        let discord_count = discord.send_count.clone();
        let console_count = console.send_count.clone();

        let mut channels: HashMap<String, Arc<dyn Channel>> = HashMap::new();
        channels.insert("discord".into(), discord);
        channels.insert("console".into(), console);

        let shutdown = Arc::new(Notify::new());
        let handle = spawn_dispatcher(bus.clone(), channels, shutdown.clone());

        bus.publish_outbound(OutboundMessage::new("discord", "chan_1", "one"))
            .await
            .unwrap();
        bus.publish_outbound(OutboundMessage::new("console", "tty", "two"))
            .await
            .unwrap();
        bus.publish_outbound(OutboundMessage::new("discord", "chan_2", "three"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;

        shutdown.notify_waiters();
        let _ = handle.await;

        assert_eq!(discord_count.load(Ordering::SeqCst), 2);
        assert_eq!(console_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_outbound_unknown_channel() {
        let bus = Arc::new(MessageBus::new(32));
        let shutdown = Arc::new(Notify::new());
        let handle = spawn_dispatcher(bus.clone(), HashMap::new(), shutdown.clone());

        bus.publish_outbound(OutboundMessage::new("unknown", "chat", "msg"))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.notify_waiters();

        // Completes without panic
        let _ = handle.await;
    }

    #[tokio::test]
    async fn test_signal_shutdown_wakes_start_all() {
        let bus = Arc::new(MessageBus::new(32));
        let mut mgr = ChannelManager::new(bus);
        mgr.register(Arc::new(MockChannel::new("discord")));
        let mgr = Arc::new(mgr);

        let runner = mgr.clone();
        let handle = tokio::spawn(async move { runner.start_all().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        mgr.signal_shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("start_all did not return after shutdown");
        assert!(result.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_start_all_returns_channel_failure() {
        let mut mgr = ChannelManager::new(Arc::new(MessageBus::new(32)));
        mgr.register(Arc::new(MockChannel::new("discord")));
        mgr.register(Arc::new(FailingChannel));

        let err = tokio::time::timeout(Duration::from_secs(5), mgr.start_all())
            .await
            .expect("start_all kept running after a channel failed")
            .unwrap_err();

        let chain = format!("{err:#}");
        assert!(chain.contains("channel broken stopped with an error"));
        assert!(chain.contains("authentication failed"));
    }
}
