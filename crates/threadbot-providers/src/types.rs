//! Wire types for the Assistants API (threads, runs, messages).
//!
//! Only the fields the relay reads are modelled; everything else in the
//! responses is ignored.

use serde::Deserialize;

/// `POST /threads` response.
#[derive(Clone, Debug, Deserialize)]
pub struct ThreadObject {
    pub id: String,
}

/// `GET /assistants/{id}` response.
#[derive(Clone, Debug, Deserialize)]
pub struct AssistantInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: String,
}

/// Lifecycle status of a run.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// Whether the run is still working and should be polled again.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            RunStatus::Queued | RunStatus::InProgress | RunStatus::Cancelling
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
            RunStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A run of the assistant on a thread.
#[derive(Clone, Debug, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub last_error: Option<RunLastError>,
}

/// `last_error` of a failed run.
#[derive(Clone, Debug, Deserialize)]
pub struct RunLastError {
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// `GET /threads/{id}/messages` response.
#[derive(Clone, Debug, Deserialize)]
pub struct MessageList {
    pub data: Vec<ThreadMessage>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ThreadMessage {
    pub role: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

/// One block of message content. Only `text` blocks carry a reply; image and
/// file blocks are skipped.
#[derive(Clone, Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<TextContent>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TextContent {
    pub value: String,
}

/// Join the text of every assistant message produced by `run_id`, in the
/// order given (the client requests ascending order), separated by `\n`.
pub fn collect_reply(messages: &[ThreadMessage], run_id: &str) -> String {
    messages
        .iter()
        .filter(|m| m.role == "assistant" && m.run_id.as_deref() == Some(run_id))
        .flat_map(|m| m.content.iter())
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text.as_ref().map(|t| t.value.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}
