//! OpenAI Assistants (v2) client: threads, messages and runs.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{ContentPart, ConversationClient, RemoteServiceError, Role, RunResult, RunStatus, Turn};
use crate::session::ConversationId;

/// Default base URL for the OpenAI REST API.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Poll interval used when the API does not suggest one.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Response header carrying the server-suggested poll delay.
const POLL_AFTER_HEADER: &str = "openai-poll-after-ms";

/// Client for the thread/run endpoints of the Assistants API.
pub struct OpenAiThreadsClient {
    api_key: String,
    base_url: String,
    client: Client,
    poll_interval: Duration,
}

impl OpenAiThreadsClient {
    /// Create a client against `base_url` (normally [`DEFAULT_BASE_URL`]).
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, RemoteServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Override the fallback poll interval (tests use a few milliseconds).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn get_run(
        &self,
        conversation: &ConversationId,
        run_id: &str,
    ) -> Result<(RunObject, Option<Duration>), RemoteServiceError> {
        let resp = self
            .authorized(
                self.client
                    .get(self.url(&format!("threads/{conversation}/runs/{run_id}"))),
            )
            .send()
            .await?;
        let hint = poll_hint(&resp);
        let run = parse_response(resp).await?;
        Ok((run, hint))
    }
}

// -- wire types ----------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ThreadObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    status: RunStatus,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<MessageObject>,
}

#[derive(Debug, Deserialize)]
struct MessageObject {
    role: Role,
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<TextBlock>,
}

#[derive(Debug, Deserialize)]
struct TextBlock {
    value: String,
}

impl From<MessageObject> for Turn {
    fn from(msg: MessageObject) -> Self {
        let content = msg
            .content
            .into_iter()
            .map(|block| match (block.kind.as_str(), block.text) {
                ("text", Some(text)) => ContentPart::Text(text.value),
                _ => ContentPart::Other(block.kind),
            })
            .collect();
        Turn {
            role: msg.role,
            content,
        }
    }
}

// -- response helpers ------------------------------------------------------------

fn poll_hint(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(POLL_AFTER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}

/// Turn a non-2xx response into [`RemoteServiceError::Api`], preferring
/// the provider's `error.message` over the raw body.
async fn parse_response<T: DeserializeOwned>(resp: Response) -> Result<T, RemoteServiceError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(String::from))
            .unwrap_or(body);
        return Err(RemoteServiceError::Api {
            status: status.as_u16(),
            message,
        });
    }
    serde_json::from_str(&body).map_err(|e| RemoteServiceError::Malformed(e.to_string()))
}

// -- trait impl --------------------------------------------------------------------

#[async_trait]
impl ConversationClient for OpenAiThreadsClient {
    async fn create_conversation(&self) -> Result<ConversationId, RemoteServiceError> {
        let resp = self
            .authorized(self.client.post(self.url("threads")))
            .json(&json!({}))
            .send()
            .await?;
        let thread: ThreadObject = parse_response(resp).await?;
        debug!(conversation_id = %thread.id, "thread created");
        Ok(ConversationId(thread.id))
    }

    async fn append_turn(
        &self,
        conversation: &ConversationId,
        role: Role,
        text: &str,
    ) -> Result<(), RemoteServiceError> {
        let resp = self
            .authorized(
                self.client
                    .post(self.url(&format!("threads/{conversation}/messages"))),
            )
            .json(&json!({ "role": role.as_str(), "content": text }))
            .send()
            .await?;
        let _: serde_json::Value = parse_response(resp).await?;
        debug!(conversation_id = %conversation, role = role.as_str(), "turn appended");
        Ok(())
    }

    async fn run_to_completion(
        &self,
        conversation: &ConversationId,
        assistant_id: &str,
        instructions: Option<&str>,
    ) -> Result<RunResult, RemoteServiceError> {
        let mut body = json!({ "assistant_id": assistant_id });
        if let Some(instructions) = instructions {
            body["instructions"] = json!(instructions);
        }

        let resp = self
            .authorized(
                self.client
                    .post(self.url(&format!("threads/{conversation}/runs"))),
            )
            .json(&body)
            .send()
            .await?;
        let mut hint = poll_hint(&resp);
        let mut run: RunObject = parse_response(resp).await?;
        debug!(
            conversation_id = %conversation,
            run_id = %run.id,
            status = %run.status,
            "run created"
        );

        while !run.status.is_terminal() {
            tokio::time::sleep(hint.unwrap_or(self.poll_interval)).await;
            let (next, next_hint) = self.get_run(conversation, &run.id).await?;
            run = next;
            hint = next_hint;
        }

        debug!(
            conversation_id = %conversation,
            run_id = %run.id,
            status = %run.status,
            "run finished"
        );
        Ok(RunResult {
            run_id: run.id,
            status: run.status,
        })
    }

    async fn list_turns(
        &self,
        conversation: &ConversationId,
    ) -> Result<Vec<Turn>, RemoteServiceError> {
        let resp = self
            .authorized(
                self.client
                    .get(self.url(&format!("threads/{conversation}/messages"))),
            )
            .send()
            .await?;
        let list: MessageList = parse_response(resp).await?;
        Ok(list.data.into_iter().map(Turn::from).collect())
    }
}
