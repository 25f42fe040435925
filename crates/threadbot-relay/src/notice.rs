//! User-facing notices sent in place of a reply when a message fails.

use threadbot_providers::AssistantError;

use crate::error::RelayError;

pub const RATE_LIMITED: &str =
    "I'm experiencing high demand right now. Please wait a moment and try again.";
pub const THREAD_CREATION_FAILED: &str =
    "Sorry, I couldn't initiate our conversation context. Please try again later.";
pub const TIMED_OUT: &str = "Sorry, the request took too long to process. Please try again.";
pub const REQUIRES_ACTION: &str = "Sorry, I need to perform an action I can't do right now.";
pub const RUN_FAILED: &str = "Sorry, something went wrong while processing.";
pub const EMPTY_REPLY: &str =
    "I seemed to have trouble retrieving the last response. Please try sending your message again!";
pub const SERVICE_ERROR: &str =
    "There was an issue communicating with the AI service. Please try again later.";

/// Text shown to the user when `err` stopped their message.
pub fn failure_notice(err: &RelayError) -> String {
    let source = match err {
        RelayError::ThreadCreation { .. } => return THREAD_CREATION_FAILED.to_string(),
        RelayError::Reply { source, .. } => source,
    };

    match source {
        AssistantError::RateLimited { .. } => RATE_LIMITED.to_string(),
        AssistantError::Timeout { .. } => TIMED_OUT.to_string(),
        AssistantError::RequiresAction { .. } => REQUIRES_ACTION.to_string(),
        AssistantError::RunFailed { code: Some(code), .. } => {
            format!("{RUN_FAILED} (Error code: {code})")
        }
        AssistantError::RunFailed { code: None, .. } => RUN_FAILED.to_string(),
        AssistantError::RunEnded { status, .. } => {
            format!("Sorry, the processing ended unexpectedly. (Status: {status})")
        }
        AssistantError::EmptyReply { .. } => EMPTY_REPLY.to_string(),
        AssistantError::Http(_)
        | AssistantError::Unauthorized
        | AssistantError::NotFound { .. }
        | AssistantError::Api { .. } => SERVICE_ERROR.to_string(),
    }
}
