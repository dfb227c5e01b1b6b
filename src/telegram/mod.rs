//! Telegram Bot API connector.
//!
//! [`BotApi`] is a thin reqwest client over the handful of Bot API
//! methods the relay needs.  It implements [`Transport`] so the
//! [`Relay`] can deliver replies through it, and [`dispatch`] turns a raw
//! [`Update`] into an inbound message or button press on its own task.
//! Long polling lives in [`polling`]; the webhook listener lives in
//! [`crate::gateway`].

pub mod polling;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::comm::{
    CallbackPress, ChatId, DeliveryError, Inbound, OutgoingMessage, Relay, Transport,
};
use crate::session::UserId;

/// Default Bot API host.
pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Update kinds requested from the platform.
pub const ALLOWED_UPDATES: [&str; 2] = ["message", "callback_query"];

/// Longest `sendMessage` text the Bot API accepts, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Bot API method {method} failed: {description}")]
    Api {
        method: &'static str,
        description: String,
    },
    #[error("Bot API request failed: {0}")]
    Network(#[from] reqwest::Error),
}

impl From<TelegramError> for DeliveryError {
    fn from(e: TelegramError) -> Self {
        match e {
            TelegramError::Api { .. } => DeliveryError::Rejected(e.to_string()),
            TelegramError::Network(_) => DeliveryError::Unreachable(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Update types (only the fields the relay reads)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

// ---------------------------------------------------------------------------
// Command parsing / update conversion
// ---------------------------------------------------------------------------

/// Return the command name if `text` is a bot command (`/start`,
/// `/start@my_bot`, `/start payload`).
pub fn command_name(text: &str) -> Option<&str> {
    let first = text.trim_start().strip_prefix('/')?.split_whitespace().next()?;
    let name = first.split('@').next().unwrap_or(first);
    (!name.is_empty()).then_some(name)
}

/// Convert a chat message into an [`Inbound`].  Messages without a human
/// sender (channel posts, other bots) yield `None`.
pub fn inbound_from_message(msg: &Message, start_command: &str) -> Option<Inbound> {
    let from = msg.from.as_ref().filter(|u| !u.is_bot)?;
    let is_initial = msg
        .text
        .as_deref()
        .and_then(command_name)
        .is_some_and(|c| c.eq_ignore_ascii_case(start_command));
    Some(Inbound {
        user_id: UserId(from.id),
        chat_id: ChatId(msg.chat.id),
        text: msg.text.clone(),
        is_initial,
    })
}

/// Split `text` into pieces of at most `limit` characters, cutting only
/// on char boundaries.  Always yields at least one piece.
pub fn split_text(text: &str, limit: usize) -> Vec<&str> {
    if text.is_empty() || limit == 0 {
        return vec![text];
    }
    let mut pieces = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let end = rest
            .char_indices()
            .nth(limit)
            .map_or(rest.len(), |(i, _)| i);
        let (head, tail) = rest.split_at(end);
        pieces.push(head);
        rest = tail;
    }
    pieces
}

pub fn press_from_callback(query: &CallbackQuery) -> CallbackPress {
    CallbackPress {
        id: query.id.clone(),
        user_id: UserId(query.from.id),
        chat_id: query.message.as_ref().map(|m| ChatId(m.chat.id)),
        token: query.data.clone(),
    }
}

/// Handle one update on its own task.  A slow or failing turn never
/// blocks the next update.
pub fn dispatch(relay: Arc<Relay>, update: Update) {
    let start_command = relay.engine().profile().start_command.clone();
    if let Some(query) = update.callback_query.as_ref() {
        let press = press_from_callback(query);
        tokio::spawn(async move { relay.on_callback(press).await });
    } else if let Some(inbound) = update
        .message
        .as_ref()
        .and_then(|m| inbound_from_message(m, &start_command))
    {
        tokio::spawn(async move { relay.on_message(inbound).await });
    } else {
        debug!(update_id = update.update_id, "update ignored");
    }
}

// ---------------------------------------------------------------------------
// BotApi
// ---------------------------------------------------------------------------

/// Client for the Bot API methods the relay uses.
pub struct BotApi {
    base: String,
    client: Client,
}

impl BotApi {
    /// `api_url` is the host (normally [`DEFAULT_API_URL`]).
    pub fn new(token: &str, api_url: &str) -> Result<Self, TelegramError> {
        // Long-poll requests stay open for up to `polling::LONG_POLL_SECS`.
        let client = Client::builder()
            .timeout(Duration::from_secs(polling::LONG_POLL_SECS + 15))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
            client,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        body: serde_json::Value,
    ) -> Result<T, TelegramError> {
        let resp: ApiResponse<T> = self
            .client
            .post(format!("{}/{}", self.base, method))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;
        match resp {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse { description, .. } => Err(TelegramError::Api {
                method,
                description: description.unwrap_or_else(|| "no description".into()),
            }),
        }
    }

    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, TelegramError> {
        let mut body = json!({
            "timeout": timeout_secs,
            "allowed_updates": ALLOWED_UPDATES,
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        self.call("getUpdates", body).await
    }

    /// Send `msg`, split into several messages when the text is over
    /// [`MAX_MESSAGE_CHARS`].  The button rides on the last piece.
    pub async fn send_message(
        &self,
        chat: ChatId,
        msg: &OutgoingMessage,
    ) -> Result<(), TelegramError> {
        let pieces = split_text(&msg.text, MAX_MESSAGE_CHARS);
        let last = pieces.len() - 1;
        for (i, piece) in pieces.into_iter().enumerate() {
            let mut body = json!({ "chat_id": chat.0, "text": piece });
            if let Some(button) = msg.button.as_ref().filter(|_| i == last) {
                body["reply_markup"] = json!({
                    "inline_keyboard": [[{
                        "text": button.label,
                        "callback_data": button.callback,
                    }]]
                });
            }
            let _: serde_json::Value = self.call("sendMessage", body).await?;
        }
        if last > 0 {
            debug!(chat_id = chat.0, pieces = last + 1, "long reply split");
        }
        Ok(())
    }

    pub async fn answer_callback_query(&self, callback_id: &str) -> Result<(), TelegramError> {
        let _: bool = self
            .call("answerCallbackQuery", json!({ "callback_query_id": callback_id }))
            .await?;
        Ok(())
    }

    /// Register `url` for push delivery, dropping anything queued while
    /// the relay was down.
    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<(), TelegramError> {
        let mut body = json!({
            "url": url,
            "drop_pending_updates": true,
            "allowed_updates": ALLOWED_UPDATES,
        });
        if let Some(secret) = secret {
            body["secret_token"] = json!(secret);
        }
        let _: bool = self.call("setWebhook", body).await?;
        info!(%url, "webhook registered");
        Ok(())
    }

    /// Remove any registered webhook; `getUpdates` is refused while one
    /// is set.
    pub async fn delete_webhook(&self) -> Result<(), TelegramError> {
        let _: bool = self
            .call("deleteWebhook", json!({ "drop_pending_updates": false }))
            .await?;
        debug!("webhook removed");
        Ok(())
    }
}

#[async_trait]
impl Transport for BotApi {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, chat: ChatId, msg: &OutgoingMessage) -> Result<(), DeliveryError> {
        Ok(self.send_message(chat, msg).await?)
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), DeliveryError> {
        Ok(self.answer_callback_query(callback_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: Option<&str>, from: Option<User>) -> Message {
        Message {
            message_id: 1,
            chat: Chat { id: 99 },
            from,
            text: text.map(String::from),
        }
    }

    fn human() -> Option<User> {
        Some(User {
            id: 7,
            is_bot: false,
        })
    }

    #[test]
    fn command_names() {
        assert_eq!(command_name("/start"), Some("start"));
        assert_eq!(command_name("/start@oracle_bot"), Some("start"));
        assert_eq!(command_name("  /start ref42"), Some("start"));
        assert_eq!(command_name("start"), None);
        assert_eq!(command_name("/"), None);
        assert_eq!(command_name("/@bot"), None);
    }

    #[test]
    fn start_command_marks_initial() {
        let inbound = inbound_from_message(&message(Some("/start"), human()), "start").unwrap();
        assert!(inbound.is_initial);
        assert_eq!(inbound.user_id, UserId(7));
        assert_eq!(inbound.chat_id, ChatId(99));
    }

    #[test]
    fn plain_text_is_not_initial() {
        let inbound =
            inbound_from_message(&message(Some("what is my number"), human()), "start").unwrap();
        assert!(!inbound.is_initial);
        assert_eq!(inbound.text.as_deref(), Some("what is my number"));
    }

    #[test]
    fn media_has_no_text() {
        let inbound = inbound_from_message(&message(None, human()), "start").unwrap();
        assert!(inbound.text.is_none());
        assert!(!inbound.is_initial);
    }

    #[test]
    fn senderless_and_bot_messages_ignored() {
        assert!(inbound_from_message(&message(Some("hi"), None), "start").is_none());
        let bot = Some(User { id: 8, is_bot: true });
        assert!(inbound_from_message(&message(Some("hi"), bot), "start").is_none());
    }

    #[test]
    fn update_deserializes_from_bot_api_json() {
        let raw = r#"{
            "update_id": 10,
            "callback_query": {
                "id": "cb1",
                "from": {"id": 7, "is_bot": false, "first_name": "A"},
                "message": {"message_id": 5, "chat": {"id": 99, "type": "private"}, "date": 0},
                "data": "open_key"
            }
        }"#;
        let update: Update = serde_json::from_str(raw).unwrap();
        let press = press_from_callback(update.callback_query.as_ref().unwrap());
        assert_eq!(press.chat_id, Some(ChatId(99)));
        assert_eq!(press.token.as_deref(), Some("open_key"));
    }

    #[test]
    fn split_text_respects_char_boundaries() {
        let text = "ключ".repeat(3);
        assert_eq!(split_text(&text, 5), ["ключк", "лючкл", "юч"]);
        assert_eq!(split_text("short", 4096), ["short"]);
        assert_eq!(split_text("", 4096), [""]);
        assert_eq!(split_text("abcd", 4), ["abcd"]);
    }

    #[test]
    fn refusal_envelope_has_no_result() {
        let raw = r#"{"ok": false, "error_code": 400, "description": "Bad Request"}"#;
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        assert!(!resp.ok);
        assert!(resp.result.is_none());
        assert_eq!(resp.description.as_deref(), Some("Bad Request"));

        let raw = r#"{"ok": true, "result": [{"update_id": 3}]}"#;
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.result.map(|u| u.len()), Some(1));
    }
}
