//! Discord channel: raw Gateway WebSocket + REST API.
//!
//! Uses the Discord Gateway (WebSocket) for receiving messages and the REST
//! API for sending. No Discord library required.
//!
//! Features:
//! - Gateway v10 WebSocket with heartbeat + resume
//! - Direct messages are always relayed; guild messages only when the bot
//!   is mentioned (the mention is stripped before relaying)
//! - Typing indicator while the relay works
//! - Allow-list by Discord user ID
//! - Message chunking for >2000 char replies
//! - Rate-limit retry (HTTP 429)
//! - Fatal close codes (bad token, disallowed intents) stop the channel

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use threadbot_core::bus::queue::MessageBus;
use threadbot_core::bus::types::{
    InboundMessage, OutboundMessage, META_GUILD_ID, META_MENTION, META_MESSAGE_ID,
};
use threadbot_core::utils::truncate_string;

use crate::base::Channel;

// ─────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────

/// Discord REST API base URL.
const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Default Gateway WebSocket URL.
const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Query string appended to the resume URL handed out in READY.
const GATEWAY_QUERY: &str = "/?v=10&encoding=json";

/// Discord message length limit, in characters.
const DISCORD_MAX_LEN: usize = 2000;

/// Typing indicator refresh interval (Discord typing lasts ~10s).
const TYPING_INTERVAL_SECS: u64 = 8;

/// Characters of message text shown in logs.
const LOG_PREVIEW_CHARS: usize = 50;

/// Attempts per REST send, for server errors and for rate limits alike.
const MAX_SEND_ATTEMPTS: u32 = 3;

/// Delay before reconnecting after a transient gateway failure.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// GUILDS(1) + GUILD_MESSAGES(512) + DIRECT_MESSAGES(4096) + MESSAGE_CONTENT(32768).
const DEFAULT_INTENTS: u64 = 1 + 512 + 4096 + 32768;

// Gateway opcodes
const OP_DISPATCH: u64 = 0;
const OP_HEARTBEAT: u64 = 1;
const OP_IDENTIFY: u64 = 2;
const OP_RESUME: u64 = 6;
const OP_RECONNECT: u64 = 7;
const OP_INVALID_SESSION: u64 = 9;
const OP_HELLO: u64 = 10;
const OP_HEARTBEAT_ACK: u64 = 11;

/// The gateway closed the connection with a code that reconnecting cannot fix.
#[derive(Debug, thiserror::Error)]
#[error("discord gateway closed the connection ({code} {reason}): {hint}")]
pub struct FatalClose {
    pub code: u16,
    pub reason: String,
    pub hint: &'static str,
}

/// Operator-facing hint for close codes that must not be retried.
fn fatal_close_hint(code: u16) -> Option<&'static str> {
    match code {
        4004 => Some("authentication failed, check DISCORD_BOT_TOKEN"),
        4010 => Some("invalid shard sent when identifying"),
        4011 => Some("sharding is required for this bot"),
        4012 => Some("invalid gateway API version"),
        4013 => Some("invalid intents sent when identifying"),
        4014 => Some(
            "disallowed intents, enable the Message Content intent in the Discord developer portal",
        ),
        _ => None,
    }
}

/// Frames the heartbeat task hands to the session loop.
enum GatewayFrame {
    Send(String),
    /// The previous heartbeat was never acknowledged.
    Zombie,
}

// ─────────────────────────────────────────────
// DiscordChannel
// ─────────────────────────────────────────────

/// Discord channel using raw Gateway WebSocket + REST API.
pub struct DiscordChannel {
    /// Bot token from the Discord Developer Portal.
    token: String,
    /// Message bus for inbound/outbound.
    bus: Arc<MessageBus>,
    /// Allow-list of Discord user IDs. Empty = allow everyone.
    allowed_users: Vec<String>,
    gateway_url: String,
    /// REST base URL.
    api_base: String,
    /// Gateway intents bitmask.
    intents: u64,
    shutdown: Arc<Notify>,
    /// HTTP client for REST API calls.
    http: reqwest::Client,
    /// Active typing indicator tasks keyed by the message being answered
    /// (channel id when there is none).
    typing_tasks: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
    /// Gateway sequence number for heartbeats.
    seq: Arc<Mutex<Option<u64>>>,
    /// Whether the last heartbeat was ACKed (zombie detection).
    heartbeat_acked: Arc<Mutex<bool>>,
    /// Session ID for resume.
    session_id: Arc<Mutex<Option<String>>>,
    /// Resume gateway URL.
    resume_url: Arc<Mutex<Option<String>>>,
    /// The bot's own user id, learned from READY.
    bot_user_id: Arc<RwLock<Option<String>>>,
}

impl DiscordChannel {
    pub fn new(
        token: String,
        bus: Arc<MessageBus>,
        allowed_users: Vec<String>,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            token,
            bus,
            allowed_users,
            gateway_url: DEFAULT_GATEWAY_URL.into(),
            api_base: DISCORD_API_BASE.into(),
            intents: DEFAULT_INTENTS,
            shutdown: Arc::new(Notify::new()),
            http,
            typing_tasks: Arc::new(RwLock::new(HashMap::new())),
            seq: Arc::new(Mutex::new(None)),
            heartbeat_acked: Arc::new(Mutex::new(true)),
            session_id: Arc::new(Mutex::new(None)),
            resume_url: Arc::new(Mutex::new(None)),
            bot_user_id: Arc::new(RwLock::new(None)),
        })
    }

    /// Override the Gateway WebSocket URL.
    pub fn with_gateway_url(mut self, gateway_url: impl Into<String>) -> Self {
        self.gateway_url = gateway_url.into();
        self
    }

    /// Override the REST base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.iter().any(|u| u == sender_id)
    }

    /// Run the Gateway WebSocket connection with auto-reconnect.
    ///
    /// Returns `Ok` on shutdown and [`FatalClose`] when the gateway rejects
    /// the bot's configuration.
    async fn run_gateway(&self) -> anyhow::Result<()> {
        loop {
            match self.gateway_session().await {
                Ok(()) => {
                    info!("discord gateway session ended normally");
                    return Ok(());
                }
                Err(e) if e.is::<FatalClose>() => {
                    error!(error = %e, "discord gateway refused the bot, not reconnecting");
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, "discord gateway error, reconnecting in 5s");
                    tokio::select! {
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        _ = self.shutdown.notified() => {
                            info!("discord shutdown during reconnect wait");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Single Gateway WebSocket session. `Ok` only on shutdown.
    async fn gateway_session(&self) -> anyhow::Result<()> {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        let url = self
            .resume_url
            .lock()
            .await
            .clone()
            .unwrap_or_else(|| self.gateway_url.clone());

        debug!(url = %url, "connecting to discord gateway");
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        let (frame_tx, mut frame_rx) = mpsc::channel::<GatewayFrame>(16);
        let mut heartbeat: Option<JoinHandle<()>> = None;

        let outcome: anyhow::Result<()> = loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    match frame {
                        Some(GatewayFrame::Send(text)) => {
                            if let Err(e) = write.send(WsMessage::text(text)).await {
                                break Err(e.into());
                            }
                        }
                        Some(GatewayFrame::Zombie) => {
                            break Err(anyhow::anyhow!("heartbeat not acknowledged"));
                        }
                        None => break Err(anyhow::anyhow!("heartbeat channel closed")),
                    }
                }
                msg = read.next() => {
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(e)) => break Err(e.into()),
                        None => break Err(anyhow::anyhow!("discord ws stream ended")),
                    };

                    let text = match msg {
                        WsMessage::Text(t) => t.to_string(),
                        WsMessage::Close(Some(frame)) => {
                            let code = u16::from(frame.code);
                            if let Some(hint) = fatal_close_hint(code) {
                                break Err(FatalClose {
                                    code,
                                    reason: frame.reason.to_string(),
                                    hint,
                                }
                                .into());
                            }
                            break Err(anyhow::anyhow!(
                                "discord ws closed by server ({code} {})",
                                frame.reason
                            ));
                        }
                        WsMessage::Close(None) => {
                            break Err(anyhow::anyhow!("discord ws closed by server"));
                        }
                        _ => continue,
                    };

                    let payload: Value = match serde_json::from_str(&text) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!(error = %e, "discord ws invalid json");
                            continue;
                        }
                    };

                    if let Some(s) = payload["s"].as_u64() {
                        *self.seq.lock().await = Some(s);
                    }

                    match payload["op"].as_u64().unwrap_or(u64::MAX) {
                        OP_HELLO => {
                            let interval = payload["d"]["heartbeat_interval"]
                                .as_u64()
                                .unwrap_or(41250);
                            debug!(interval_ms = interval, "discord HELLO received");

                            if let Some(h) = heartbeat.take() {
                                h.abort();
                            }
                            *self.heartbeat_acked.lock().await = true;
                            heartbeat = Some(self.spawn_heartbeat(interval, frame_tx.clone()));

                            let hello_reply = self.identify_or_resume().await;
                            if let Err(e) = write.send(WsMessage::text(hello_reply)).await {
                                break Err(e.into());
                            }
                        }
                        OP_DISPATCH => {
                            let event = payload["t"].as_str().unwrap_or("");
                            self.handle_dispatch(event, &payload["d"]).await;
                        }
                        OP_HEARTBEAT_ACK => {
                            *self.heartbeat_acked.lock().await = true;
                        }
                        OP_HEARTBEAT => {
                            // Server asked for an immediate heartbeat
                            let s = *self.seq.lock().await;
                            if let Err(e) = write.send(WsMessage::text(heartbeat_payload(s))).await {
                                break Err(e.into());
                            }
                        }
                        OP_RECONNECT => {
                            info!("discord server requested reconnect");
                            break Err(anyhow::anyhow!("reconnect requested"));
                        }
                        OP_INVALID_SESSION => {
                            let resumable = payload["d"].as_bool().unwrap_or(false);
                            warn!(resumable = resumable, "discord invalid session");
                            if !resumable {
                                *self.session_id.lock().await = None;
                                *self.resume_url.lock().await = None;
                            }
                            break Err(anyhow::anyhow!("invalid session"));
                        }
                        _ => {}
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("discord shutdown signal received");
                    let _ = write.send(WsMessage::Close(None)).await;
                    break Ok(());
                }
            }
        };

        if let Some(h) = heartbeat.take() {
            h.abort();
        }
        outcome
    }

    /// Periodic heartbeat, with initial jitter as the gateway requires.
    fn spawn_heartbeat(&self, interval_ms: u64, frames: mpsc::Sender<GatewayFrame>) -> JoinHandle<()> {
        let seq = self.seq.clone();
        let acked = self.heartbeat_acked.clone();

        tokio::spawn(async move {
            let jitter = interval_ms as f64 * rand_jitter();
            tokio::time::sleep(Duration::from_millis(jitter as u64)).await;

            loop {
                {
                    let mut acked = acked.lock().await;
                    if !*acked {
                        warn!("discord heartbeat not ACKed, requesting reconnect");
                        let _ = frames.send(GatewayFrame::Zombie).await;
                        break;
                    }
                    *acked = false;
                }

                let s = *seq.lock().await;
                if frames.send(GatewayFrame::Send(heartbeat_payload(s))).await.is_err() {
                    break;
                }

                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
            }
        })
    }

    /// IDENTIFY for a fresh session, RESUME when a session id is known.
    async fn identify_or_resume(&self) -> String {
        let session = self.session_id.lock().await.clone();
        match session {
            Some(sid) => {
                let s = *self.seq.lock().await;
                json!({
                    "op": OP_RESUME,
                    "d": { "token": self.token, "session_id": sid, "seq": s }
                })
            }
            None => json!({
                "op": OP_IDENTIFY,
                "d": {
                    "token": self.token,
                    "intents": self.intents,
                    "properties": {
                        "os": std::env::consts::OS,
                        "browser": "threadbot",
                        "device": "threadbot"
                    }
                }
            }),
        }
        .to_string()
    }

    /// Handle a DISPATCH (op 0) event.
    async fn handle_dispatch(&self, event: &str, data: &Value) {
        match event {
            "READY" => {
                if let Some(sid) = data["session_id"].as_str() {
                    *self.session_id.lock().await = Some(sid.to_string());
                }
                if let Some(url) = data["resume_gateway_url"].as_str() {
                    *self.resume_url.lock().await =
                        Some(format!("{}{GATEWAY_QUERY}", url.trim_end_matches('/')));
                }
                if let Some(id) = data["user"]["id"].as_str() {
                    *self.bot_user_id.write().await = Some(id.to_string());
                }
                let user = data["user"]["username"].as_str().unwrap_or("unknown");
                info!(user = user, "discord bot READY");
            }
            "RESUMED" => info!("discord session resumed"),
            "MESSAGE_CREATE" => self.handle_message_create(data).await,
            _ => debug!(event = event, "discord event (unhandled)"),
        }
    }

    /// Handle a MESSAGE_CREATE event from the Gateway.
    async fn handle_message_create(&self, data: &Value) {
        if data["author"]["bot"].as_bool().unwrap_or(false) {
            return;
        }

        let Some(sender_id) = data["author"]["id"].as_str() else {
            return;
        };
        let Some(channel_id) = data["channel_id"].as_str() else {
            return;
        };

        let bot_id = self.bot_user_id.read().await.clone();
        if bot_id.as_deref() == Some(sender_id) {
            return;
        }

        if !self.is_allowed(sender_id) {
            warn!(
                sender = %sender_id,
                channel = %channel_id,
                "discord message from unauthorized user, ignoring"
            );
            return;
        }

        let raw = data["content"].as_str().unwrap_or("");
        let guild_id = data["guild_id"].as_str();
        let mention = format!("<@{sender_id}>");

        let content = match guild_id {
            None => raw.trim().to_string(),
            Some(_) => {
                if data["mention_everyone"].as_bool().unwrap_or(false) {
                    debug!(channel = %channel_id, "ignoring @everyone/@here message");
                    return;
                }
                let Some(bot_id) = bot_id.as_deref() else {
                    debug!("bot user id not known yet, ignoring guild message");
                    return;
                };
                if !mentions_user(data, bot_id) {
                    return;
                }
                strip_mention(raw, bot_id)
            }
        };

        if content.is_empty() {
            if guild_id.is_some() {
                let greeting = OutboundMessage::new(
                    "discord",
                    channel_id,
                    format!("Hi {mention}, did you need something?"),
                );
                if let Err(e) = self.bus.publish_outbound(greeting).await {
                    error!(error = %e, "failed to publish discord greeting");
                }
            } else {
                debug!(sender = %sender_id, "ignoring direct message without text");
            }
            return;
        }

        info!(
            sender = %sender_id,
            channel = %channel_id,
            guild = guild_id.unwrap_or("dm"),
            preview = %truncate_string(&content, LOG_PREVIEW_CHARS),
            "discord inbound message"
        );

        let typing_key = data["id"].as_str().unwrap_or(channel_id);
        self.start_typing(channel_id, typing_key).await;

        let mut inbound = InboundMessage::new("discord", sender_id, channel_id, content);
        if let Some(guild) = guild_id {
            inbound = inbound
                .with_meta(META_GUILD_ID, guild)
                .with_meta(META_MENTION, mention);
        }
        if let Some(msg_id) = data["id"].as_str() {
            inbound = inbound.with_meta(META_MESSAGE_ID, msg_id);
        }

        if let Err(e) = self.bus.publish_inbound(inbound).await {
            error!(error = %e, "failed to publish discord message to bus");
            self.stop_typing(typing_key).await;
        }
    }

    /// Show the typing indicator in `channel_id` until `key` is stopped.
    async fn start_typing(&self, channel_id: &str, key: &str) {
        self.stop_typing(key).await;

        let url = format!("{}/channels/{channel_id}/typing", self.api_base);
        let token = self.token.clone();
        let shutdown = self.shutdown.clone();
        let channel_id_owned = channel_id.to_string();

        let http = self.http.clone();
        let handle = tokio::spawn(async move {
            loop {
                let _ = http
                    .post(&url)
                    .header("Authorization", format!("Bot {token}"))
                    .send()
                    .await;

                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(TYPING_INTERVAL_SECS)) => {}
                    _ = shutdown.notified() => break,
                }
            }
            debug!(channel = %channel_id_owned, "typing indicator stopped");
        });

        self.typing_tasks.write().await.insert(key.to_string(), handle);
    }

    async fn stop_typing(&self, key: &str) {
        if let Some(handle) = self.typing_tasks.write().await.remove(key) {
            handle.abort();
        }
    }

    async fn stop_all_typing(&self) {
        let mut tasks = self.typing_tasks.write().await;
        for (_, handle) in tasks.drain() {
            handle.abort();
        }
    }

    /// Send a message via the REST API with retry on rate-limit.
    async fn send_rest(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> anyhow::Result<()> {
        let url = format!("{}/channels/{channel_id}/messages", self.api_base);

        let mut body = json!({ "content": content });
        if let Some(ref_id) = reply_to {
            body["message_reference"] = json!({ "message_id": ref_id, "fail_if_not_exists": false });
            body["allowed_mentions"] = json!({ "parse": ["users"], "replied_user": false });
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let last_attempt = attempts >= MAX_SEND_ATTEMPTS;
            let resp = self
                .http
                .post(&url)
                .header("Authorization", format!("Bot {}", self.token))
                .json(&body)
                .send()
                .await?;

            let status = resp.status();
            if status.is_success() {
                return Ok(());
            }

            if status.as_u16() == 429 {
                let body_text = resp.text().await.unwrap_or_default();
                if last_attempt {
                    return Err(anyhow::anyhow!(
                        "discord send still rate limited after {MAX_SEND_ATTEMPTS} attempts: {body_text}"
                    ));
                }
                let retry_after: f64 = serde_json::from_str::<Value>(&body_text)
                    .ok()
                    .and_then(|v| v["retry_after"].as_f64())
                    .unwrap_or(1.0);
                warn!(
                    retry_after_s = retry_after,
                    attempt = attempts,
                    "discord rate limited"
                );
                tokio::time::sleep(Duration::from_secs_f64(retry_after.max(0.0))).await;
                continue;
            }

            if last_attempt {
                let err_text = resp.text().await.unwrap_or_default();
                return Err(anyhow::anyhow!(
                    "discord send failed after {MAX_SEND_ATTEMPTS} attempts (HTTP {status}): {err_text}"
                ));
            }

            warn!(
                status = %status,
                attempt = attempts,
                "discord send error, retrying in 1s"
            );
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
}

fn heartbeat_payload(seq: Option<u64>) -> String {
    json!({ "op": OP_HEARTBEAT, "d": seq }).to_string()
}

/// Whether a MESSAGE_CREATE payload mentions `user_id`.
fn mentions_user(data: &Value, user_id: &str) -> bool {
    let listed = data["mentions"]
        .as_array()
        .is_some_and(|users| users.iter().any(|u| u["id"].as_str() == Some(user_id)));
    let content = data["content"].as_str().unwrap_or("");
    listed
        || content.contains(&format!("<@{user_id}>"))
        || content.contains(&format!("<@!{user_id}>"))
}

/// Remove every `<@id>` / `<@!id>` mention of `bot_id` and trim the result.
pub fn strip_mention(content: &str, bot_id: &str) -> String {
    match Regex::new(&format!(r"<@!?{}>", regex::escape(bot_id))) {
        Ok(re) => re.replace_all(content, "").trim().to_string(),
        Err(_) => content
            .replace(&format!("<@!{bot_id}>"), "")
            .replace(&format!("<@{bot_id}>"), "")
            .trim()
            .to_string(),
    }
}

/// Split a message into chunks of at most `max_chars` characters.
/// Prefers to split at newline boundaries.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        let Some((limit, _)) = remaining.char_indices().nth(max_chars) else {
            chunks.push(remaining.to_string());
            break;
        };

        let split_at = remaining[..limit]
            .rfind('\n')
            .map(|i| i + 1)
            .unwrap_or(limit);

        chunks.push(remaining[..split_at].to_string());
        remaining = &remaining[split_at..];
    }

    chunks
}

/// Simple jitter: a fraction between 0.0 and 1.0 for the first heartbeat.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos as f64) / 1_000_000_000.0
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn start(&self) -> anyhow::Result<()> {
        if self.token.is_empty() {
            return Err(anyhow::anyhow!("discord token is empty"));
        }

        info!("starting discord channel (gateway v10)");
        self.run_gateway().await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        info!("stopping discord channel");
        self.shutdown.notify_waiters();
        self.stop_all_typing().await;
        Ok(())
    }

    async fn send(&self, msg: &OutboundMessage) -> anyhow::Result<()> {
        let chunks = split_message(&msg.content, DISCORD_MAX_LEN);

        let mut result = Ok(());
        for (i, chunk) in chunks.iter().enumerate() {
            // Only the first chunk carries the reply reference
            let ref_id = if i == 0 { msg.reply_to.as_deref() } else { None };
            result = self.send_rest(&msg.chat_id, chunk, ref_id).await;
            if result.is_err() {
                break;
            }
        }

        let typing_key = msg.reply_to.as_deref().unwrap_or(&msg.chat_id);
        self.stop_typing(typing_key).await;

        debug!(chat_id = %msg.chat_id, chunks = chunks.len(), "discord message sent");
        result
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
