//! Relay loop: inbound chat message → user's assistant thread → reply.
//!
//! Each inbound message is handled on its own task, so a slow run for one
//! user never holds up another. Messages from the same user are processed
//! one at a time: the assistant rejects a new run while one is active on the
//! thread.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use threadbot_core::bus::queue::MessageBus;
use threadbot_core::bus::types::{InboundMessage, OutboundMessage};
use threadbot_core::utils::truncate_string;
use threadbot_core::ThreadStore;
use threadbot_providers::AssistantProvider;

use crate::error::RelayError;
use crate::notice::failure_notice;

/// Characters of message text shown in logs.
const LOG_PREVIEW_CHARS: usize = 50;

/// Routes chat messages to per-user assistant threads.
#[derive(Clone)]
pub struct Relay {
    store: Arc<ThreadStore>,
    provider: Arc<dyn AssistantProvider>,
    bus: Arc<MessageBus>,
    /// One lock per user id with a message in flight; held while that
    /// user's message is processed and dropped once nobody waits on it.
    user_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl Relay {
    pub fn new(
        store: Arc<ThreadStore>,
        provider: Arc<dyn AssistantProvider>,
        bus: Arc<MessageBus>,
    ) -> Self {
        Self {
            store,
            provider,
            bus,
            user_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Consume inbound messages until the bus closes, answering each on its
    /// own task.
    pub async fn run(&self) {
        info!(provider = self.provider.display_name(), "relay started, waiting for messages");

        while let Some(msg) = self.bus.consume_inbound().await {
            debug!(
                user = %msg.sender_id,
                chat = %msg.chat_id,
                queued_ms = msg.age().num_milliseconds(),
                "received message"
            );

            let relay = self.clone();
            tokio::spawn(async move {
                let reply = relay.process_message(&msg).await;
                if let Err(e) = relay.bus.publish_outbound(reply).await {
                    error!(error = %e, "failed to publish outbound message");
                }
            });
        }

        info!("inbound bus closed, relay exiting");
    }

    /// Answer one inbound message.
    ///
    /// Failures become a user-facing notice. Guild replies are prefixed with
    /// the author's mention; direct replies are not.
    pub async fn process_message(&self, msg: &InboundMessage) -> OutboundMessage {
        let lock = self.user_lock(&msg.sender_id).await;
        let turn = lock.lock().await;

        let body = match self.handle(&msg.sender_id, &msg.content).await {
            Ok(reply) => reply,
            Err(e) => {
                match &e {
                    RelayError::ThreadCreation { .. } => error!(error = %e, "message failed"),
                    RelayError::Reply { .. } => warn!(user = %msg.sender_id, error = %e, "message failed"),
                }
                failure_notice(&e)
            }
        };

        drop(turn);
        self.release_user_lock(&msg.sender_id, lock).await;

        let content = match msg.author_mention() {
            Some(mention) if !msg.is_direct() => format!("{mention} {body}"),
            _ => body,
        };

        OutboundMessage::reply_to(msg, content)
    }

    /// Resolve `user_id`'s thread (creating and persisting it on first
    /// contact), submit `text` to it and return the assistant's reply.
    pub async fn handle(&self, user_id: &str, text: &str) -> Result<String, RelayError> {
        info!(
            user = %user_id,
            preview = %truncate_string(text, LOG_PREVIEW_CHARS),
            "relaying message"
        );

        let lookup = self
            .store
            .get_or_create(user_id, || self.provider.create_thread())
            .await
            .map_err(|source| RelayError::ThreadCreation {
                user_id: user_id.to_string(),
                source,
            })?;
        let thread_id = lookup.thread_id();

        let reply = self
            .provider
            .reply(thread_id, text)
            .await
            .map_err(|source| RelayError::Reply {
                thread_id: thread_id.to_string(),
                source,
            })?;

        debug!(
            user = %user_id,
            thread = %thread_id,
            new_thread = lookup.is_new(),
            reply_len = reply.len(),
            "assistant replied"
        );
        Ok(reply)
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks.entry(user_id.to_string()).or_default().clone()
    }

    /// Forget `user_id`'s lock unless another message of theirs holds a
    /// handle to it. Handles are only cloned under the map lock, so the count
    /// cannot grow while it is checked.
    async fn release_user_lock(&self, user_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.user_locks.lock().await;
        // One handle in the map, one here
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(user_id);
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
