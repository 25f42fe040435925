use thiserror::Error;

use threadbot_providers::AssistantError;

/// Why a message could not be answered.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The user had no thread and the assistant would not create one.
    #[error("could not create a thread for user {user_id}: {source}")]
    ThreadCreation {
        user_id: String,
        #[source]
        source: AssistantError,
    },

    /// The thread exists but the assistant produced no usable reply.
    #[error("assistant reply failed on thread {thread_id}: {source}")]
    Reply {
        thread_id: String,
        #[source]
        source: AssistantError,
    },
}
