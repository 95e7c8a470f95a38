//! Telegram channel: long-polls the Bot API for updates.
//!
//! `server` is the Bot API base URL, `password` the bot token and `user` the
//! bot's username. The sender identity of a message is the author's
//! username, falling back to the numeric user id; replies go to the chat id.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::channels::{Channel, Event, EventStream, IncomingMessage, OutgoingMessage};
use crate::error::ChannelError;

/// Default Bot API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to getUpdates.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause between polls after a failed request.
const POLL_ERROR_PAUSE: Duration = Duration::from_secs(5);

/// Telegram channel backed by Bot API long-polling.
pub struct TelegramChannel {
    api_base: String,
    bot_token: SecretString,
    bot_username: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(api_base: &str, bot_token: SecretString, bot_username: &str) -> Self {
        let api_base = if api_base.trim().is_empty() {
            DEFAULT_API_BASE
        } else {
            api_base.trim()
        };
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token,
            bot_username: bot_username.trim_start_matches('@').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.api_base, &self.bot_token, method)
    }

    /// Authenticate the token with getMe and return the bot's username.
    async fn get_me(&self) -> Result<String, ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::ConnectFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let data: Value = resp.json().await.map_err(|e| ChannelError::ConnectFailed {
            name: "telegram".into(),
            reason: e.to_string(),
        })?;

        if !status.is_success() || data.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(ChannelError::AuthFailed {
                name: "telegram".into(),
                reason: api_description(&data)
                    .unwrap_or_else(|| format!("getMe returned {status}")),
            });
        }

        Ok(data
            .pointer("/result/username")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    /// Send a text message, splitting at Telegram's 4096 char limit.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            self.send_message_chunk(chat_id, &chunk).await?;
        }
        Ok(())
    }

    /// Send a single chunk as plain text. Command output is not valid
    /// Markdown in general, so no parse_mode is set.
    async fn send_message_chunk(&self, chat_id: &str, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage returned {status}: {err}"),
            });
        }

        Ok(())
    }
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn connect(&self) -> Result<EventStream, ChannelError> {
        let username = self.get_me().await?;
        if !self.bot_username.is_empty() && username != self.bot_username {
            tracing::warn!(
                configured = %self.bot_username,
                actual = %username,
                "Bot token belongs to a different bot than the configured user"
            );
        }
        tracing::info!(bot = %username, "Telegram session authenticated");

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "my_chat_member", "chat_member"]
                });

                let results = match poll_updates(&client, &url, &body).await {
                    Ok(results) => results,
                    Err(e) => {
                        if tx.send(Err(e)).is_err() {
                            return;
                        }
                        tokio::time::sleep(POLL_ERROR_PAUSE).await;
                        continue;
                    }
                };

                for update in &results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    if tx.send(Ok(parse_update(update))).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send(&self, message: OutgoingMessage) -> Result<(), ChannelError> {
        self.send_message(&message.recipient, &message.text).await
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_url(base: &str, token: &SecretString, method: &str) -> String {
    format!("{base}/bot{}/{method}", token.expose_secret())
}

fn api_description(data: &Value) -> Option<String> {
    data.get("description")
        .and_then(Value::as_str)
        .map(String::from)
}

/// One getUpdates round trip.
async fn poll_updates(
    client: &reqwest::Client,
    url: &str,
    body: &Value,
) -> Result<Vec<Value>, ChannelError> {
    let receive_failed = |reason: String| ChannelError::ReceiveFailed {
        name: "telegram".into(),
        reason,
    };

    let resp = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| receive_failed(e.to_string()))?;

    let data: Value = resp
        .json()
        .await
        .map_err(|e| receive_failed(e.to_string()))?;

    if data.get("ok").and_then(Value::as_bool) != Some(true) {
        return Err(receive_failed(
            api_description(&data).unwrap_or_else(|| "getUpdates returned ok=false".into()),
        ));
    }

    Ok(data
        .get("result")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default())
}

/// Map one Bot API update to a transport event.
fn parse_update(update: &Value) -> Event {
    if let Some(member) = update
        .get("my_chat_member")
        .or_else(|| update.get("chat_member"))
    {
        let from = member
            .get("from")
            .and_then(sender_identity)
            .unwrap_or_default();
        return Event::Presence { from };
    }

    let Some(message) = update.get("message") else {
        return Event::Other;
    };

    let Some(text) = message.get("text").and_then(Value::as_str) else {
        return Event::Other;
    };

    let Some(sender) = message.get("from").and_then(sender_identity) else {
        return Event::Other;
    };

    let chat_id = message
        .pointer("/chat/id")
        .and_then(Value::as_i64)
        .map(|id| id.to_string())
        .unwrap_or_else(|| sender.clone());

    Event::Chat(IncomingMessage::new(sender, text).with_address(chat_id))
}

/// Username if the account has one, numeric id otherwise.
fn sender_identity(from: &Value) -> Option<String> {
    from.get("username")
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| from.get("id").and_then(Value::as_i64).map(|id| id.to_string()))
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts. Only the single
/// separator at a split point is dropped, so indentation survives.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Byte offset of the max_len-th char keeps the cut on a char boundary
        let limit = remaining
            .char_indices()
            .nth(max_len)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let chunk = &remaining[..limit];
        let (split_at, rest) = match chunk.rfind('\n').or_else(|| chunk.rfind(' ')) {
            // Separators are one byte wide
            Some(at) if at > 0 => (at, at + 1),
            _ => (limit, limit),
        };

        chunks.push(remaining[..split_at].to_string());
        remaining = &remaining[rest..];
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(base: &str) -> TelegramChannel {
        TelegramChannel::new(base, SecretString::from("123:ABC".to_string()), "@opsbot")
    }

    #[test]
    fn telegram_channel_name() {
        assert_eq!(channel("").name(), "telegram");
    }

    #[test]
    fn telegram_api_url_default_base() {
        assert_eq!(
            channel("").api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
    }

    #[test]
    fn telegram_api_url_custom_base_trailing_slash() {
        assert_eq!(
            channel("http://127.0.0.1:8081/").api_url("sendMessage"),
            "http://127.0.0.1:8081/bot123:ABC/sendMessage"
        );
    }

    #[test]
    fn bot_username_strips_at_sign() {
        assert_eq!(channel("").bot_username, "opsbot");
    }

    // ── Update parsing ──────────────────────────────────────────────

    #[test]
    fn parses_text_message() {
        let update = serde_json::json!({
            "update_id": 10,
            "message": {
                "from": {"id": 42, "username": "alice"},
                "chat": {"id": 99887766},
                "text": "uptime"
            }
        });
        assert_eq!(
            parse_update(&update),
            Event::Chat(IncomingMessage::new("alice", "uptime").with_address("99887766"))
        );
    }

    #[test]
    fn sender_falls_back_to_numeric_id() {
        let update = serde_json::json!({
            "message": {
                "from": {"id": 123456789},
                "chat": {"id": 123456789},
                "text": "ping"
            }
        });
        match parse_update(&update) {
            Event::Chat(msg) => assert_eq!(msg.sender, "123456789"),
            other => panic!("Expected Chat, got {:?}", other),
        }
    }

    #[test]
    fn non_text_message_is_other() {
        let update = serde_json::json!({
            "message": {
                "from": {"id": 42, "username": "alice"},
                "chat": {"id": 42},
                "photo": []
            }
        });
        assert_eq!(parse_update(&update), Event::Other);
    }

    #[test]
    fn membership_update_is_presence() {
        let update = serde_json::json!({
            "my_chat_member": {
                "from": {"id": 42, "username": "alice"},
                "chat": {"id": 42}
            }
        });
        assert_eq!(
            parse_update(&update),
            Event::Presence {
                from: "alice".into()
            }
        );
    }

    #[test]
    fn unknown_update_is_other() {
        let update = serde_json::json!({"update_id": 3, "poll": {}});
        assert_eq!(parse_update(&update), Event::Other);
    }

    #[test]
    fn empty_text_is_still_chat() {
        let update = serde_json::json!({
            "message": {"from": {"username": "alice"}, "chat": {"id": 1}, "text": ""}
        });
        assert!(matches!(parse_update(&update), Event::Chat(ref m) if m.text.is_empty()));
    }

    // ── Network errors (no server listening) ────────────────────────

    #[tokio::test]
    async fn connect_fails_without_server() {
        let ch = channel("http://127.0.0.1:9");
        let result = ch.connect().await;
        assert!(matches!(result, Err(ChannelError::ConnectFailed { .. })));
    }

    #[tokio::test]
    async fn send_fails_without_server() {
        let ch = channel("http://127.0.0.1:9");
        let result = ch
            .send(OutgoingMessage {
                recipient: "1".into(),
                text: "hello".into(),
            })
            .await;
        assert!(matches!(result, Err(ChannelError::SendFailed { .. })));
    }

    // ── Message splitting ───────────────────────────────────────────

    #[test]
    fn split_message_short() {
        let chunks = split_message("Hello", 4096);
        assert_eq!(chunks, vec!["Hello"]);
    }

    #[test]
    fn split_message_exact_limit() {
        let msg = "a".repeat(4096);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 4096);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "a".repeat(2000));
        assert_eq!(chunks[1], "b".repeat(3000));
    }

    #[test]
    fn split_message_keeps_indentation_at_boundary() {
        let mut msg = String::new();
        for _ in 0..99 {
            msg.push_str(&"x".repeat(40));
            msg.push('\n');
        }
        msg.push_str("    ");
        msg.push_str(&"z".repeat(260));
        let chunks = split_message(&msg, 4096);

        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].starts_with("    z"), "indent lost: {:?}", &chunks[1][..8]);
        // Rejoining on the dropped newline restores the output exactly.
        assert_eq!(chunks.join("\n"), msg);
    }

    #[test]
    fn split_message_on_space_drops_only_that_space() {
        let msg = format!("{}  {}", "a".repeat(4000), "b".repeat(200));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], format!("{} ", "a".repeat(4000)));
        assert_eq!(chunks[1], "b".repeat(200));
    }

    #[test]
    fn split_message_no_good_split_point() {
        let msg = "a".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_message_multibyte_counts_chars() {
        let msg = "é".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 4096);
        assert_eq!(chunks[1].chars().count(), 904);
    }
}
