//! Remote conversation client abstractions.
//!
//! Defines the [`ConversationClient`] trait, the wire-independent
//! [`Turn`] / [`RunResult`] types, and [`RemoteServiceError`].  The
//! concrete OpenAI Threads/Runs client lives in [`openai`].

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::ConversationId;

pub use openai::OpenAiThreadsClient;

// ---------------------------------------------------------------------------
// Turn
// ---------------------------------------------------------------------------

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A content fragment of a turn.  Only text fragments contribute to the
/// relayed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    /// Image, file reference or any other block kind the relay ignores.
    Other(String),
}

/// A single turn as read back from the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Turn {
    /// Concatenate all text fragments in order.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(t) => Some(t.as_str()),
                ContentPart::Other(_) => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Lifecycle of one execution against the remote assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Cancelling,
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
    Expired,
    Incomplete,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    /// `true` once the run will not change state on its own.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            RunStatus::Queued | RunStatus::InProgress | RunStatus::Cancelling
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::Cancelling => "cancelling",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Expired => "expired",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome of [`ConversationClient::run_to_completion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
}

impl RunResult {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure talking to the remote assistant service.
#[derive(Debug, Error)]
pub enum RemoteServiceError {
    #[error("assistant API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("assistant API request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed assistant API response: {0}")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// ConversationClient trait
// ---------------------------------------------------------------------------

/// Operations the engine needs from the remote conversation service.
///
/// The service is the source of truth for history; implementations keep
/// no local copy of turns.
#[async_trait]
pub trait ConversationClient: Send + Sync + 'static {
    /// Open a fresh conversation and return its id.
    async fn create_conversation(&self) -> Result<ConversationId, RemoteServiceError>;

    /// Append one turn.  Every call appends; there is no deduplication.
    async fn append_turn(
        &self,
        conversation: &ConversationId,
        role: Role,
        text: &str,
    ) -> Result<(), RemoteServiceError>;

    /// Start a run of `assistant_id` over the conversation and wait until
    /// it reaches a terminal status.  Latency is unbounded.
    async fn run_to_completion(
        &self,
        conversation: &ConversationId,
        assistant_id: &str,
        instructions: Option<&str>,
    ) -> Result<RunResult, RemoteServiceError>;

    /// List the conversation's turns, most recent first.
    async fn list_turns(&self, conversation: &ConversationId)
        -> Result<Vec<Turn>, RemoteServiceError>;
}
