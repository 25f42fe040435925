use std::time::Duration;

use thiserror::Error;

use crate::types::RunStatus;

/// Failures talking to the hosted assistant.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by assistant API: {body}")]
    RateLimited { body: String },

    #[error("assistant API rejected the credentials")]
    Unauthorized,

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("assistant API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    #[error("run {run_id} did not finish within {}s", waited.as_secs())]
    Timeout { run_id: String, waited: Duration },

    #[error("run {run_id} failed: {}", message.as_deref().unwrap_or("no details"))]
    RunFailed {
        run_id: String,
        code: Option<String>,
        message: Option<String>,
    },

    #[error("run {run_id} requires an action that is not supported")]
    RequiresAction { run_id: String },

    #[error("run {run_id} ended with status {status}")]
    RunEnded { run_id: String, status: RunStatus },

    #[error("run {run_id} completed without any text reply")]
    EmptyReply { run_id: String },
}
