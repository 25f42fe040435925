//! Bus event types: messages flowing between channels and the relay.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;

/// Metadata key holding the guild a message was posted in. Absent for DMs.
pub const META_GUILD_ID: &str = "guild_id";

/// Metadata key holding the author mention (`<@id>`) for guild messages.
pub const META_MENTION: &str = "mention";

/// Metadata key holding the originating message id.
pub const META_MESSAGE_ID: &str = "message_id";

/// An inbound message from a channel to the relay.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    /// Channel name (e.g. "discord").
    pub channel: String,
    /// Sender identifier within the channel. This is the mapping key.
    pub sender_id: String,
    /// Chat/conversation identifier the reply goes back to.
    pub chat_id: String,
    /// Text content of the message, already stripped of the bot mention.
    pub content: String,
    /// When the channel received the message.
    pub timestamp: DateTime<Utc>,
    /// Channel-specific metadata (guild id, author mention, message id).
    pub metadata: HashMap<String, String>,
}

impl InboundMessage {
    /// Create a new inbound message with minimal required fields.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        InboundMessage {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry (builder style).
    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Whether this message arrived in a direct-message conversation.
    pub fn is_direct(&self) -> bool {
        !self.metadata.contains_key(META_GUILD_ID)
    }

    /// Mention of the author to prefix replies with, if any.
    pub fn author_mention(&self) -> Option<&str> {
        self.metadata.get(META_MENTION).map(String::as_str)
    }

    /// Time since the channel received this message.
    pub fn age(&self) -> TimeDelta {
        Utc::now() - self.timestamp
    }
}

/// An outbound message from the relay to a channel.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    /// Target channel name.
    pub channel: String,
    /// Target chat/conversation identifier.
    pub chat_id: String,
    /// Text content to send.
    pub content: String,
    /// Optional message ID to reply to.
    pub reply_to: Option<String>,
}

impl OutboundMessage {
    /// Create a new outbound message.
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
        }
    }

    /// Build a reply addressed to the conversation an inbound message came from.
    pub fn reply_to(inbound: &InboundMessage, content: impl Into<String>) -> Self {
        let mut out = OutboundMessage::new(&inbound.channel, &inbound.chat_id, content);
        out.reply_to = inbound.metadata.get(META_MESSAGE_ID).cloned();
        out
    }
}
