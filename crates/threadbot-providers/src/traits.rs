//! Assistant provider trait: the seam between the relay and the hosted assistant.

use async_trait::async_trait;

use crate::error::AssistantError;
use crate::types::AssistantInfo;

/// A hosted conversational assistant that keeps per-thread history server-side.
///
/// The main implementation is [`AssistantsClient`](crate::AssistantsClient);
/// tests substitute in-process fakes.
#[async_trait]
pub trait AssistantProvider: Send + Sync {
    /// Create a new, empty conversation thread and return its id.
    async fn create_thread(&self) -> Result<String, AssistantError>;

    /// Post `text` as a user message on `thread_id`, run the assistant on the
    /// thread and wait for the completed reply text.
    async fn reply(&self, thread_id: &str, text: &str) -> Result<String, AssistantError>;

    /// Check that the configured assistant exists and the credentials work.
    async fn verify_assistant(&self) -> Result<AssistantInfo, AssistantError>;

    /// Display name for logging.
    fn display_name(&self) -> &str;
}
