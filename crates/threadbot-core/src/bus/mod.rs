//! Message bus: bounded async queues between the chat channel and the relay.

pub mod queue;
pub mod types;

pub use queue::MessageBus;
pub use types::{InboundMessage, OutboundMessage};
