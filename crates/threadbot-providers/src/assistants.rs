//! OpenAI Assistants API v2 client.
//!
//! One reply is a sequence of plain REST calls:
//! 1. `POST /threads/{thread}/messages`: append the user's text
//! 2. `POST /threads/{thread}/runs`: start the assistant on the thread
//! 3. `GET  /threads/{thread}/runs/{run}`: poll while the run is pending
//! 4. `GET  /threads/{thread}/messages?run_id={run}`: read the reply
//!
//! A run still pending after the configured timeout is cancelled
//! (`POST /threads/{thread}/runs/{run}/cancel`) on a best-effort basis.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, error, info, warn};

use threadbot_core::config::schema::AssistantConfig;

use crate::error::AssistantError;
use crate::traits::AssistantProvider;
use crate::types::{collect_reply, AssistantInfo, MessageList, Run, RunStatus, ThreadObject};

/// Beta header required by the Assistants API.
const BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v2");

/// Per-request HTTP timeout. Long waits happen in the poll loop, not here.
const REQUEST_TIMEOUT_SECS: u64 = 30;

// ─────────────────────────────────────────────
// AssistantsClient
// ─────────────────────────────────────────────

/// Client for one configured assistant.
pub struct AssistantsClient {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// API base URL (e.g. `"https://api.openai.com/v1"`).
    api_base: String,
    /// API key for Bearer authentication.
    api_key: String,
    /// Assistant that runs on every thread.
    assistant_id: String,
    poll_interval: Duration,
    run_timeout: Duration,
}

impl std::fmt::Debug for AssistantsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantsClient")
            .field("api_base", &self.api_base)
            .field("assistant_id", &self.assistant_id)
            .field("poll_interval", &self.poll_interval)
            .field("run_timeout", &self.run_timeout)
            .finish()
    }
}

impl AssistantsClient {
    /// Build a client from the assistant section of the config.
    pub fn new(config: &AssistantConfig) -> Result<Self, AssistantError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            assistant_id: config.assistant_id.clone(),
            poll_interval: config.poll_interval(),
            run_timeout: config.run_timeout(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    /// Send an authenticated request and decode the JSON body.
    ///
    /// `what` names the resource for `NotFound` errors and logs.
    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, AssistantError> {
        let response = request
            .bearer_auth(&self.api_key)
            .header(BETA_HEADER.0, BETA_HEADER.1)
            .send()
            .await
            .map_err(|e| {
                error!(what = what, error = %e, "assistant HTTP request failed");
                AssistantError::Http(e)
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        warn!(what = what, status = %status, body = %body, "assistant API error");

        Err(match status.as_u16() {
            401 => AssistantError::Unauthorized,
            404 => AssistantError::NotFound {
                what: what.to_string(),
            },
            429 => AssistantError::RateLimited { body },
            code => AssistantError::Api { status: code, body },
        })
    }

    async fn add_user_message(&self, thread_id: &str, text: &str) -> Result<(), AssistantError> {
        let request = self
            .client
            .post(self.url(&format!("threads/{thread_id}/messages")))
            .json(&json!({ "role": "user", "content": text }));
        let _: serde_json::Value = self.send(request, "thread").await?;
        Ok(())
    }

    async fn start_run(&self, thread_id: &str) -> Result<Run, AssistantError> {
        let request = self
            .client
            .post(self.url(&format!("threads/{thread_id}/runs")))
            .json(&json!({ "assistant_id": self.assistant_id }));
        self.send(request, "thread").await
    }

    async fn retrieve_run(&self, thread_id: &str, run_id: &str) -> Result<Run, AssistantError> {
        let request = self
            .client
            .get(self.url(&format!("threads/{thread_id}/runs/{run_id}")));
        self.send(request, "run").await
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) {
        let request = self
            .client
            .post(self.url(&format!("threads/{thread_id}/runs/{run_id}/cancel")));
        match self.send::<serde_json::Value>(request, "run").await {
            Ok(_) => info!(run = %run_id, "cancelled run"),
            Err(e) => warn!(run = %run_id, error = %e, "failed to cancel run"),
        }
    }

    async fn run_messages(&self, thread_id: &str, run_id: &str) -> Result<MessageList, AssistantError> {
        let request = self
            .client
            .get(self.url(&format!("threads/{thread_id}/messages")))
            .query(&[("run_id", run_id), ("order", "asc")]);
        self.send(request, "thread").await
    }

    /// Poll `run` until it reaches a terminal status or the timeout elapses.
    async fn wait_for_run(&self, thread_id: &str, mut run: Run) -> Result<Run, AssistantError> {
        let started = Instant::now();

        while run.status.is_pending() {
            if started.elapsed() >= self.run_timeout {
                warn!(run = %run.id, thread = %thread_id, "run timed out waiting for completion");
                self.cancel_run(thread_id, &run.id).await;
                return Err(AssistantError::Timeout {
                    run_id: run.id,
                    waited: self.run_timeout,
                });
            }

            tokio::time::sleep(self.poll_interval).await;
            run = self.retrieve_run(thread_id, &run.id).await?;
        }

        debug!(run = %run.id, status = %run.status, elapsed_ms = started.elapsed().as_millis() as u64, "run finished");
        Ok(run)
    }
}

#[async_trait]
impl AssistantProvider for AssistantsClient {
    async fn create_thread(&self) -> Result<String, AssistantError> {
        let request = self.client.post(self.url("threads")).json(&json!({}));
        let thread: ThreadObject = self.send(request, "threads endpoint").await?;
        debug!(thread = %thread.id, "created assistant thread");
        Ok(thread.id)
    }

    async fn reply(&self, thread_id: &str, text: &str) -> Result<String, AssistantError> {
        self.add_user_message(thread_id, text).await?;

        let run = self.start_run(thread_id).await?;
        debug!(run = %run.id, thread = %thread_id, assistant = %self.assistant_id, "run started");

        let run = self.wait_for_run(thread_id, run).await?;

        match run.status {
            RunStatus::Completed => {
                let messages = self.run_messages(thread_id, &run.id).await?;
                let reply = collect_reply(&messages.data, &run.id);
                if reply.is_empty() {
                    warn!(run = %run.id, thread = %thread_id, "run completed without text");
                    return Err(AssistantError::EmptyReply { run_id: run.id });
                }
                Ok(reply)
            }
            RunStatus::RequiresAction => {
                // Tool outputs are never submitted; free the thread for the next message.
                self.cancel_run(thread_id, &run.id).await;
                Err(AssistantError::RequiresAction { run_id: run.id })
            }
            RunStatus::Failed => {
                let (code, message) = match run.last_error {
                    Some(e) => (Some(e.code), Some(e.message)),
                    None => (None, None),
                };
                error!(run = %run.id, code = ?code, message = ?message, "run failed");
                Err(AssistantError::RunFailed {
                    run_id: run.id,
                    code,
                    message,
                })
            }
            status => {
                error!(run = %run.id, status = %status, "run ended with unhandled status");
                Err(AssistantError::RunEnded {
                    run_id: run.id,
                    status,
                })
            }
        }
    }

    async fn verify_assistant(&self) -> Result<AssistantInfo, AssistantError> {
        let request = self
            .client
            .get(self.url(&format!("assistants/{}", self.assistant_id)));
        self.send(request, &format!("assistant {}", self.assistant_id))
            .await
    }

    fn display_name(&self) -> &str {
        "OpenAI Assistants"
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
