//! The completion engine models conversations as long-lived threads.  Each user message starts a
//! run against a thread, and we poll the run until it finishes.

use serde::Deserialize;
use std::collections::BTreeMap;

#[cfg(test)]
pub mod fake;
pub mod openai;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("could not decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("thread {0} has no assistant reply")]
    MissingReply(String),
}

/// Remote assistant record
#[derive(Clone, Debug, PartialEq, serde::Deserialize)]
pub struct RemoteAssistant {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub metadata: BTreeMap<String, String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Everything needed to create or update a remote assistant.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct AssistantSpec {
    pub name: String,
    pub description: String,
    pub instructions: String,
    pub tools: Vec<serde_json::Value>,
    pub model: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Completed,
    Cancelled,
    Expired,
    Failed,
    Incomplete,
}

impl RunStatus {
    /// Terminal states that did not produce an answer
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            RunStatus::Cancelled | RunStatus::Expired | RunStatus::Failed | RunStatus::Incomplete
        )
    }
}

/// The model asked us to call a tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments, as the model wrote them
    pub arguments: String,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub status: RunStatus,
    /// Populated when `status` is `RequiresAction`
    pub tool_calls: Vec<ToolCallRequest>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadMessage {
    pub role: MessageRole,
    pub text: String,
}

#[async_trait::async_trait]
pub trait CompletionEngine: Send + Sync {
    async fn list_assistants(&self) -> Result<Vec<RemoteAssistant>>;
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<RemoteAssistant>;
    async fn update_assistant(&self, id: &str, spec: &AssistantSpec) -> Result<RemoteAssistant>;
    async fn delete_assistant(&self, id: &str) -> Result<()>;

    /// Returns the new thread's id
    async fn create_thread(&self) -> Result<String>;
    /// Appends a user message to the thread
    async fn add_message(&self, thread_id: &str, content: &str) -> Result<()>;
    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run>;
    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<()>;
    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<()>;
    /// Thread messages, newest first
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>>;
}
