//! Generic communication layer.
//!
//! Provides the channel-agnostic inbound envelope ([`Inbound`]), the
//! outbound content model ([`OutgoingMessage`]), the [`Transport`] trait a
//! messaging platform implements, and [`Relay`], which feeds inbound
//! messages through the [`TurnEngine`] and delivers the result.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::TurnEngine;
use crate::session::UserId;

// ---------------------------------------------------------------------------
// Inbound / outbound models
// ---------------------------------------------------------------------------

/// Conversation (chat) a message is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A channel-agnostic inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    pub user_id: UserId,
    /// Where replies go.
    pub chat_id: ChatId,
    /// Message text; `None` for media, stickers and other non-text payloads.
    pub text: Option<String>,
    /// The message is the explicit session-start trigger.
    pub is_initial: bool,
}

/// A pressed inline button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackPress {
    /// Platform id used to acknowledge the press.
    pub id: String,
    pub user_id: UserId,
    /// Chat holding the message the button was attached to.
    pub chat_id: Option<ChatId>,
    /// Opaque callback token.
    pub token: Option<String>,
}

/// Interactive element attached to an outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineButton {
    pub label: String,
    /// Opaque token echoed back when the button is pressed.
    pub callback: String,
}

/// One deliverable message: plain text, optionally with a button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<InlineButton>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            button: None,
        }
    }

    pub fn with_button(mut self, button: InlineButton) -> Self {
        self.button = Some(button);
        self
    }
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// Failure delivering a message back to the user.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("transport rejected the message: {0}")]
    Rejected(String),
    #[error("transport unreachable: {0}")]
    Unreachable(String),
}

/// A messaging platform that can deliver outbound messages.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Deliver one message to `chat`.
    async fn send(&self, chat: ChatId, msg: &OutgoingMessage) -> Result<(), DeliveryError>;

    /// Acknowledge a button press so the client stops its spinner.
    async fn answer_callback(&self, callback_id: &str) -> Result<(), DeliveryError>;
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

/// Connects a [`Transport`] to the [`TurnEngine`].
///
/// Both delivery modes (long-poll and webhook) hand their decoded
/// messages to the same relay, so the engine never knows which is in use.
pub struct Relay {
    engine: Arc<TurnEngine>,
    transport: Arc<dyn Transport>,
}

impl Relay {
    pub fn new(engine: Arc<TurnEngine>, transport: Arc<dyn Transport>) -> Self {
        Self { engine, transport }
    }

    pub fn engine(&self) -> &TurnEngine {
        &self.engine
    }

    /// Run one turn and deliver its messages in order.
    pub async fn on_message(&self, inbound: Inbound) {
        let messages = self.engine.handle(&inbound).await;
        self.deliver(inbound.chat_id, inbound.user_id, &messages).await;
    }

    /// Answer a button press with the scripted response sequence.  Never
    /// touches session or conversation state.
    pub async fn on_callback(&self, press: CallbackPress) {
        if let Err(e) = self.transport.answer_callback(&press.id).await {
            warn!(transport = self.transport.name(), error = %e, "failed to acknowledge callback");
        }

        let Some(token) = press.token.as_deref() else {
            debug!(user_id = %press.user_id, "callback without data ignored");
            return;
        };
        let Some(script) = self.engine.callback_script(token) else {
            debug!(user_id = %press.user_id, token, "unknown callback token ignored");
            return;
        };
        let Some(chat) = press.chat_id else {
            warn!(user_id = %press.user_id, "callback message is gone, nothing to answer");
            return;
        };

        for (i, text) in script.messages.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(script.delay).await;
            }
            let msg = OutgoingMessage::text(text.as_str());
            if let Err(e) = self.transport.send(chat, &msg).await {
                warn!(
                    user_id = %press.user_id,
                    chat_id = %chat,
                    error = %e,
                    "callback delivery failed"
                );
                return;
            }
        }
    }

    /// Delivery stops at the first failed send; the user then gets the
    /// generic failure reply instead of a silent gap.
    async fn deliver(&self, chat: ChatId, user: UserId, messages: &[OutgoingMessage]) {
        for msg in messages {
            if let Err(e) = self.transport.send(chat, msg).await {
                warn!(
                    transport = self.transport.name(),
                    user_id = %user,
                    chat_id = %chat,
                    error = %e,
                    "reply delivery failed"
                );
                self.notify_failure(chat, user, msg).await;
                return;
            }
        }
    }

    async fn notify_failure(&self, chat: ChatId, user: UserId, failed: &OutgoingMessage) {
        let failure = self.engine.profile().replies.failure.as_str();
        if failure.is_empty() || failed.text == failure {
            return;
        }
        if let Err(e) = self.transport.send(chat, &OutgoingMessage::text(failure)).await {
            warn!(user_id = %user, chat_id = %chat, error = %e, "failure notice not delivered");
        }
    }
}
