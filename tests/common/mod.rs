//! Shared fakes for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thread_relay::assistant::{
    ContentPart, ConversationClient, RemoteServiceError, Role, RunResult, RunStatus, Turn,
};
use thread_relay::comm::{ChatId, DeliveryError, OutgoingMessage, Transport};
use thread_relay::config::Profile;
use thread_relay::engine::TurnEngine;
use thread_relay::session::{ConversationId, MemorySessionStore};

// ---------------------------------------------------------------------------
// Fake conversation client
// ---------------------------------------------------------------------------

/// One recorded call against the fake service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create,
    Append { conversation: String, text: String },
    Run { conversation: String, instructions: Option<String> },
    List { conversation: String },
}

/// What the assistant "says" after a completed run.
#[derive(Debug, Clone)]
pub enum ReplyMode {
    /// Fixed text.
    Fixed(String),
    /// `echo: <last user text>`.
    Echo,
    /// No assistant turn at all.
    Silent,
}

/// In-memory stand-in for the assistant service.
pub struct FakeClient {
    calls: Mutex<Vec<Call>>,
    threads: AtomicUsize,
    pub status: Mutex<RunStatus>,
    pub reply: Mutex<ReplyMode>,
    /// Name of the operation that should fail (`create`, `append`, `run`, `list`).
    pub fail_on: Mutex<Option<&'static str>>,
    pub run_delay: Duration,
    last_user_text: Mutex<String>,
}

impl FakeClient {
    pub fn replying(text: &str) -> Self {
        Self::with_mode(ReplyMode::Fixed(text.to_string()))
    }

    pub fn with_mode(mode: ReplyMode) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            threads: AtomicUsize::new(0),
            status: Mutex::new(RunStatus::Completed),
            reply: Mutex::new(mode),
            fail_on: Mutex::new(None),
            run_delay: Duration::ZERO,
            last_user_text: Mutex::new(String::new()),
        }
    }

    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    pub fn set_status(&self, status: RunStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn fail_on(&self, op: &'static str) {
        *self.fail_on.lock().unwrap() = Some(op);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, op: &str) -> Result<(), RemoteServiceError> {
        if *self.fail_on.lock().unwrap() == Some(op) {
            return Err(RemoteServiceError::Api {
                status: 500,
                message: format!("injected {op} failure"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationClient for FakeClient {
    async fn create_conversation(&self) -> Result<ConversationId, RemoteServiceError> {
        self.record(Call::Create);
        self.check("create")?;
        let n = self.threads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ConversationId(format!("thread_{n}")))
    }

    async fn append_turn(
        &self,
        conversation: &ConversationId,
        _role: Role,
        text: &str,
    ) -> Result<(), RemoteServiceError> {
        self.record(Call::Append {
            conversation: conversation.to_string(),
            text: text.to_string(),
        });
        self.check("append")?;
        *self.last_user_text.lock().unwrap() = text.to_string();
        Ok(())
    }

    async fn run_to_completion(
        &self,
        conversation: &ConversationId,
        _assistant_id: &str,
        instructions: Option<&str>,
    ) -> Result<RunResult, RemoteServiceError> {
        self.record(Call::Run {
            conversation: conversation.to_string(),
            instructions: instructions.map(String::from),
        });
        self.check("run")?;
        if !self.run_delay.is_zero() {
            tokio::time::sleep(self.run_delay).await;
        }
        Ok(RunResult {
            run_id: "run_1".into(),
            status: *self.status.lock().unwrap(),
        })
    }

    async fn list_turns(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Turn>, RemoteServiceError> {
        self.record(Call::List {
            conversation: conversation.to_string(),
        });
        self.check("list")?;
        let user_text = self.last_user_text.lock().unwrap().clone();
        let user_turn = Turn {
            role: Role::User,
            content: vec![ContentPart::Text(user_text.clone())],
        };
        let assistant_text = match &*self.reply.lock().unwrap() {
            ReplyMode::Fixed(t) => Some(t.clone()),
            ReplyMode::Echo => Some(format!("echo: {user_text}")),
            ReplyMode::Silent => None,
        };
        Ok(match assistant_text {
            Some(text) => vec![
                Turn {
                    role: Role::Assistant,
                    content: vec![ContentPart::Text(text)],
                },
                user_turn,
            ],
            None => vec![user_turn],
        })
    }
}

// ---------------------------------------------------------------------------
// Recording transport
// ---------------------------------------------------------------------------

/// Transport that records what would have been sent.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<(ChatId, OutgoingMessage, Instant)>>,
    pub acks: Mutex<Vec<String>>,
    pub fail_sends: bool,
    /// Reject texts longer than this many characters, like a platform cap.
    pub max_chars: Option<usize>,
}

impl RecordingTransport {
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m, _)| m.text.clone())
            .collect()
    }

    pub fn sent(&self) -> Vec<(ChatId, OutgoingMessage)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(c, m, _)| (*c, m.clone()))
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, chat: ChatId, msg: &OutgoingMessage) -> Result<(), DeliveryError> {
        if self.fail_sends {
            return Err(DeliveryError::Unreachable("offline".into()));
        }
        if self.max_chars.is_some_and(|max| msg.text.chars().count() > max) {
            return Err(DeliveryError::Rejected("message is too long".into()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((chat, msg.clone(), Instant::now()));
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), DeliveryError> {
        self.acks.lock().unwrap().push(callback_id.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Engine over `client` with a fresh in-memory store.
pub fn engine(client: Arc<FakeClient>) -> (TurnEngine, Arc<MemorySessionStore>) {
    engine_with_profile(client, Profile::default())
}

pub fn engine_with_profile(
    client: Arc<FakeClient>,
    profile: Profile,
) -> (TurnEngine, Arc<MemorySessionStore>) {
    let store = Arc::new(MemorySessionStore::new());
    let engine = TurnEngine::new(client, store.clone(), "asst_test", profile);
    (engine, store)
}
