//! Runtime configuration.
//!
//! Two sources:
//! - [`Credentials`]: secrets and endpoints from environment keys.
//! - [`Profile`]: bot behaviour (fixed replies, keywords, button) from an
//!   optional YAML file.  Every field has a default, so a missing file or
//!   a partial file is fine; unknown keys are rejected.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::assistant::openai::DEFAULT_BASE_URL as DEFAULT_OPENAI_URL;
use crate::telegram::DEFAULT_API_URL as DEFAULT_TELEGRAM_URL;

/// Listen port when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 8080;

/// Path the webhook listener accepts updates on.
pub const DEFAULT_WEBHOOK_PATH: &str = "/webhook";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Secrets and endpoints recognised from the environment.
#[derive(Clone)]
pub struct Credentials {
    /// `TELEGRAM_TOKEN`
    pub telegram_token: String,
    /// `OPENAI_API_KEY`
    pub openai_api_key: String,
    /// `ASSISTANT_ID`
    pub assistant_id: String,
    /// `WEBHOOK_HOST`: public base URL, webhook mode only.
    pub webhook_host: Option<String>,
    /// `WEBHOOK_SECRET`: expected secret-token header, webhook mode only.
    pub webhook_secret: Option<String>,
    /// `PORT`
    pub port: u16,
    /// `OPENAI_BASE_URL`
    pub openai_base_url: String,
    /// `TELEGRAM_API_URL`
    pub telegram_api_url: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("assistant_id", &self.assistant_id)
            .field("webhook_host", &self.webhook_host)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "***"))
            .field("port", &self.port)
            .field("openai_base_url", &self.openai_base_url)
            .field("telegram_api_url", &self.telegram_api_url)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Read credentials from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read credentials through `lookup`.  Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                key: "PORT",
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            telegram_token: require("TELEGRAM_TOKEN")?,
            openai_api_key: require("OPENAI_API_KEY")?,
            assistant_id: require("ASSISTANT_ID")?,
            webhook_host: get("WEBHOOK_HOST").map(|h| h.trim_end_matches('/').to_string()),
            webhook_secret: get("WEBHOOK_SECRET"),
            port,
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            telegram_api_url: get("TELEGRAM_API_URL")
                .unwrap_or_else(|| DEFAULT_TELEGRAM_URL.to_string()),
        })
    }

    /// Public URL the platform should push updates to.
    pub fn webhook_url(&self, path: &str) -> Option<String> {
        self.webhook_host.as_ref().map(|host| format!("{host}{path}"))
    }
}

// ---------------------------------------------------------------------------
// Delivery mode
// ---------------------------------------------------------------------------

/// How updates reach the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Long-poll `getUpdates`; no listener needed.
    Poll,
    /// Run an HTTP listener and register it with the platform.
    Webhook,
}

impl DeliveryMode {
    /// Webhook when a public host is configured, otherwise poll.
    pub fn infer(creds: &Credentials) -> Self {
        if creds.webhook_host.is_some() {
            DeliveryMode::Webhook
        } else {
            DeliveryMode::Poll
        }
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Bot behaviour loaded from `profile.yaml`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profile {
    /// Command that starts a fresh conversation (without the slash).
    pub start_command: String,
    /// Turn submitted in place of the user's text on session start.
    pub greeting: String,
    /// Run instructions used for the greeting turn.
    pub greeting_instructions: Option<String>,
    pub replies: Replies,
    pub marker: MarkerConfig,
    pub button: ButtonConfig,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            start_command: "start".into(),
            greeting: "Привет.".into(),
            greeting_instructions: Some("Ответь на приветствие пользователя.".into()),
            replies: Replies::default(),
            marker: MarkerConfig::default(),
            button: ButtonConfig::default(),
        }
    }
}

/// Fixed user-facing texts.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Replies {
    pub no_session: String,
    pub non_text: String,
    pub not_completed: String,
    pub no_reply: String,
    pub failure: String,
}

impl Default for Replies {
    fn default() -> Self {
        Self {
            no_session: "Пожалуйста, начните сначала с команды /start.".into(),
            non_text: "О это интересно. Я жду ответа 🫴".into(),
            not_completed: "Ошибка: обработка не завершена.".into(),
            no_reply: "Не удалось получить ответ от ассистента.".into(),
            failure: "Ошибка. Попробуйте позже.".into(),
        }
    }
}

/// Marker message sent ahead of replies that mention a keyword.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkerConfig {
    pub emoji: String,
    pub keywords: Vec<String>,
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            emoji: "🗝".into(),
            keywords: vec![
                "первый ключ".into(),
                "второй ключ".into(),
                "третий ключ".into(),
                "число твоей судьбы".into(),
            ],
        }
    }
}

/// Inline button and the scripted answer to pressing it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ButtonConfig {
    /// Phrase in the reply that attaches the button.  Empty disables it.
    pub trigger: String,
    pub label: String,
    /// Opaque callback token carried by the button.
    pub callback: String,
    /// Messages sent, in order, when the button is pressed.
    pub responses: Vec<String>,
    /// Pause between consecutive responses.
    pub delay_ms: u64,
}

impl Default for ButtonConfig {
    fn default() -> Self {
        Self {
            trigger: "нажми кнопку".into(),
            label: "🗝 Открыть".into(),
            callback: "open_key".into(),
            responses: vec!["Ключ поворачивается…".into(), "Дверь открыта 🚪".into()],
            delay_ms: 2000,
        }
    }
}

impl Profile {
    /// Load a profile from YAML.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("read profile {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("parse profile {}", path.display()))
    }

    /// Parse a profile from a YAML string.
    pub fn parse(yaml: &str) -> anyhow::Result<Self> {
        // An empty document deserialises to unit; treat it as all defaults.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml_ng::from_str(yaml)?)
    }

    /// Load from `path` when given, otherwise use the built-in defaults.
    pub async fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::load(p).await,
            None => Ok(Self::default()),
        }
    }
}
