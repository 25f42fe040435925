//! Assistant provider layer for Threadbot.
//!
//! # Architecture
//!
//! - [`traits::AssistantProvider`]: the capability the relay depends on
//! - [`assistants::AssistantsClient`]: OpenAI Assistants API v2 over `reqwest`
//! - [`types`]: wire types for threads, runs and messages
//! - [`error::AssistantError`]: typed failures the relay turns into notices

pub mod assistants;
pub mod error;
pub mod traits;
pub mod types;

pub use assistants::AssistantsClient;
pub use error::AssistantError;
pub use traits::AssistantProvider;
pub use types::{AssistantInfo, RunStatus};
