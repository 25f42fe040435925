//! Threadbot Relay: forwards chat messages to the user's assistant thread.
//!
//! [`Relay`] consumes inbound messages from the bus, resolves (or creates)
//! the sender's thread through the [`ThreadStore`](threadbot_core::ThreadStore),
//! asks the assistant for a reply and publishes it back to the bus.

pub mod error;
pub mod notice;
pub mod relay;

pub use error::RelayError;
pub use relay::Relay;
