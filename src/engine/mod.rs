//! Turn exchange engine.
//!
//! For every inbound message the engine resolves (or, on the start
//! trigger, creates) the user's remote conversation, submits the turn,
//! waits for the run to finish, reads back the newest assistant turn and
//! annotates it.  [`TurnEngine::exchange`] returns a tagged result;
//! [`TurnEngine::handle`] maps every outcome to the messages to deliver.
//!
//! Turns are serialised per user with [`TurnLocks`], so two quick
//! messages from one user cannot interleave on the same conversation.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::annotate::{Annotation, Annotator};
use crate::assistant::{ConversationClient, RemoteServiceError, Role, RunStatus};
use crate::comm::{Inbound, OutgoingMessage};
use crate::config::Profile;
use crate::session::{ConversationId, SessionStore, TurnLocks, UserId};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Successful exchange: the assistant's text plus UI directives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub conversation_id: ConversationId,
    pub text: String,
    pub annotation: Annotation,
}

/// Every way an exchange can stop short of a reply.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("no conversation bound to this user")]
    NoSession,

    #[error("inbound message carries no text")]
    NonTextInput,

    #[error(transparent)]
    Remote(#[from] RemoteServiceError),

    #[error("run {run_id} ended with status {status}")]
    RunNotCompleted { run_id: String, status: RunStatus },

    #[error("conversation has no assistant reply")]
    NoReply,
}

/// Scripted answer to a button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackScript {
    pub messages: Vec<String>,
    pub delay: Duration,
}

// ---------------------------------------------------------------------------
// TurnEngine
// ---------------------------------------------------------------------------

pub struct TurnEngine {
    client: Arc<dyn ConversationClient>,
    sessions: Arc<dyn SessionStore>,
    locks: TurnLocks,
    annotator: Annotator,
    assistant_id: String,
    profile: Profile,
}

impl TurnEngine {
    pub fn new(
        client: Arc<dyn ConversationClient>,
        sessions: Arc<dyn SessionStore>,
        assistant_id: impl Into<String>,
        profile: Profile,
    ) -> Self {
        Self {
            client,
            sessions,
            locks: TurnLocks::new(),
            annotator: Annotator::from_profile(&profile),
            assistant_id: assistant_id.into(),
            profile,
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn turn_locks(&self) -> &TurnLocks {
        &self.locks
    }

    /// Run one exchange and return the messages to deliver, in order.
    ///
    /// Never fails: every error is logged and turned into one of the
    /// fixed replies.  A stored session is never invalidated here.
    pub async fn handle(&self, inbound: &Inbound) -> Vec<OutgoingMessage> {
        let span = info_span!(
            "turn",
            user_id = %inbound.user_id,
            conversation_id = tracing::field::Empty,
            initial = inbound.is_initial,
        );
        async {
            match self
                .exchange(inbound.user_id, inbound.text.as_deref(), inbound.is_initial)
                .await
            {
                Ok(reply) => self.render(reply),
                Err(e) => {
                    log_failure(&e);
                    vec![OutgoingMessage::text(self.reply_for(&e))]
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Resolve the session, submit the turn, wait for the run and extract
    /// the reply.
    pub async fn exchange(
        &self,
        user: UserId,
        text: Option<&str>,
        is_initial: bool,
    ) -> Result<Reply, ExchangeError> {
        // 1. Session resolution.  Users without a session never get a
        // turn lock entry.
        let (_turn, conversation) = if is_initial {
            let turn = self.locks.acquire(user).await;
            let conversation = self.client.create_conversation().await?;
            self.sessions.put(user, conversation.clone()).await;
            info!(user_id = %user, conversation_id = %conversation, "session started");
            (turn, conversation)
        } else {
            if self.sessions.get(user).await.is_none() {
                return Err(ExchangeError::NoSession);
            }
            let turn = self.locks.acquire(user).await;
            // Re-read under the lock: a concurrent start may have rebound it.
            let conversation = self
                .sessions
                .get(user)
                .await
                .ok_or(ExchangeError::NoSession)?;
            (turn, conversation)
        };
        Span::current().record("conversation_id", tracing::field::display(&conversation));

        // 2. Input gating; the start trigger submits the greeting instead.
        let (turn_text, instructions) = if is_initial {
            (
                self.profile.greeting.as_str(),
                self.profile.greeting_instructions.as_deref(),
            )
        } else {
            (text.ok_or(ExchangeError::NonTextInput)?, None)
        };

        // 3. Turn submission.
        self.client
            .append_turn(&conversation, Role::User, turn_text)
            .await?;

        // 4. Execution.
        let run = self
            .client
            .run_to_completion(&conversation, &self.assistant_id, instructions)
            .await?;
        if !run.is_completed() {
            return Err(ExchangeError::RunNotCompleted {
                run_id: run.run_id,
                status: run.status,
            });
        }

        // 5. Reply extraction: newest assistant turn, text fragments only.
        let turns = self.client.list_turns(&conversation).await?;
        let text = turns
            .iter()
            .find(|t| t.role == Role::Assistant)
            .map(|t| t.text())
            .filter(|t| !t.is_empty())
            .ok_or(ExchangeError::NoReply)?;

        let annotation = self.annotator.annotate(&text);
        debug!(
            run_id = %run.run_id,
            reply_len = text.len(),
            marker = annotation.emit_marker,
            button = annotation.button.is_some(),
            "reply extracted"
        );

        Ok(Reply {
            conversation_id: conversation,
            text,
            annotation,
        })
    }

    /// Marker (if any) first, then the reply carrying the button.
    pub fn render(&self, reply: Reply) -> Vec<OutgoingMessage> {
        let mut out = Vec::with_capacity(2);
        if reply.annotation.emit_marker {
            out.push(OutgoingMessage::text(self.profile.marker.emoji.as_str()));
        }
        let mut main = OutgoingMessage::text(reply.text);
        if let Some(button) = reply.annotation.button {
            main = main.with_button(button);
        }
        out.push(main);
        out
    }

    /// Fixed user-facing text for an error.
    pub fn reply_for(&self, err: &ExchangeError) -> &str {
        let replies = &self.profile.replies;
        match err {
            ExchangeError::NoSession => replies.no_session.as_str(),
            ExchangeError::NonTextInput => replies.non_text.as_str(),
            ExchangeError::RunNotCompleted { .. } => replies.not_completed.as_str(),
            ExchangeError::NoReply => replies.no_reply.as_str(),
            ExchangeError::Remote(_) => replies.failure.as_str(),
        }
    }

    /// Response sequence for a pressed button, `None` for unknown tokens.
    pub fn callback_script(&self, token: &str) -> Option<CallbackScript> {
        let button = &self.profile.button;
        (!button.callback.is_empty() && button.callback == token).then(|| CallbackScript {
            messages: button.responses.clone(),
            delay: Duration::from_millis(button.delay_ms),
        })
    }
}

fn log_failure(err: &ExchangeError) {
    match err {
        ExchangeError::NoSession => debug!("message before session start"),
        ExchangeError::NonTextInput => debug!("non-text message gated"),
        ExchangeError::RunNotCompleted { run_id, status } => {
            warn!(run_id = %run_id, status = %status, "run did not complete")
        }
        ExchangeError::NoReply => warn!("completed run left no assistant reply"),
        ExchangeError::Remote(e) => error!(error = %e, "assistant service call failed"),
    }
}
