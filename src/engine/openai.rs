//! OpenAI Assistants API (v2) over HTTP.

use super::{
    AssistantSpec, CompletionEngine, EngineError, MessageRole, RemoteAssistant, Result, Run,
    RunStatus, ThreadMessage, ToolCallRequest, ToolOutput,
};
use crate::log_internal;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

/// Remote assistants listed per request.  We only look at our own handful.
const LIST_LIMIT: u32 = 100;

pub struct OpenAiEngine {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(serde::Deserialize)]
struct List<T> {
    data: Vec<T>,
}

#[derive(serde::Deserialize)]
struct Id {
    id: String,
}

#[derive(serde::Deserialize)]
struct WireRun {
    id: String,
    thread_id: String,
    status: RunStatus,
    #[serde(default)]
    required_action: Option<RequiredAction>,
}

#[derive(serde::Deserialize)]
struct RequiredAction {
    submit_tool_outputs: SubmitToolOutputs,
}

#[derive(serde::Deserialize)]
struct SubmitToolOutputs {
    tool_calls: Vec<WireToolCall>,
}

#[derive(serde::Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(serde::Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(serde::Deserialize)]
struct WireMessage {
    role: MessageRole,
    #[serde(default)]
    content: Vec<WireContent>,
}

/// Only text parts are of interest.  Images and the like have no `text`.
#[derive(serde::Deserialize)]
struct WireContent {
    #[serde(default)]
    text: Option<WireText>,
}

#[derive(serde::Deserialize)]
struct WireText {
    value: String,
}

#[derive(serde::Deserialize)]
struct WireError {
    error: WireErrorBody,
}

#[derive(serde::Deserialize)]
struct WireErrorBody {
    message: String,
}

impl From<WireRun> for Run {
    fn from(run: WireRun) -> Self {
        let tool_calls = run
            .required_action
            .map(|action| {
                action
                    .submit_tool_outputs
                    .tool_calls
                    .into_iter()
                    .map(|call| ToolCallRequest {
                        id: call.id,
                        name: call.function.name,
                        arguments: call.function.arguments,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Run {
            id: run.id,
            thread_id: run.thread_id,
            status: run.status,
            tool_calls,
        }
    }
}

impl From<WireMessage> for ThreadMessage {
    fn from(msg: WireMessage) -> Self {
        let text = msg
            .content
            .into_iter()
            .filter_map(|part| part.text.map(|t| t.value))
            .collect::<Vec<_>>()
            .join("\n");
        ThreadMessage {
            role: msg.role,
            text,
        }
    }
}

/// Prefer the API's own explanation, fall back to the raw body.
fn api_error(status: u16, body: &str) -> EngineError {
    let message = serde_json::from_str::<WireError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.to_owned());
    EngineError::Api { status, message }
}

impl OpenAiEngine {
    pub fn new(cfg: &crate::config::OpenAi) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key: cfg.api_key.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait::async_trait]
impl CompletionEngine for OpenAiEngine {
    async fn list_assistants(&self) -> Result<Vec<RemoteAssistant>> {
        let list: List<RemoteAssistant> = self
            .send(
                self.request(Method::GET, "/assistants")
                    .query(&[("limit", LIST_LIMIT)]),
            )
            .await?;
        Ok(list.data)
    }

    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<RemoteAssistant> {
        log_internal!("Creating assistant {}", spec.name);
        self.send(self.request(Method::POST, "/assistants").json(spec))
            .await
    }

    async fn update_assistant(&self, id: &str, spec: &AssistantSpec) -> Result<RemoteAssistant> {
        log_internal!("Updating assistant {} ({})", spec.name, id);
        self.send(
            self.request(Method::POST, &format!("/assistants/{}", id))
                .json(spec),
        )
        .await
    }

    async fn delete_assistant(&self, id: &str) -> Result<()> {
        log_internal!("Deleting assistant {}", id);
        let _: serde_json::Value = self
            .send(self.request(Method::DELETE, &format!("/assistants/{}", id)))
            .await?;
        Ok(())
    }

    async fn create_thread(&self) -> Result<String> {
        let thread: Id = self
            .send(self.request(Method::POST, "/threads").json(&json!({})))
            .await?;
        Ok(thread.id)
    }

    async fn add_message(&self, thread_id: &str, content: &str) -> Result<()> {
        let _: Id = self
            .send(
                self.request(Method::POST, &format!("/threads/{}/messages", thread_id))
                    .json(&json!({ "role": "user", "content": content })),
            )
            .await?;
        Ok(())
    }

    async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run> {
        let run: WireRun = self
            .send(
                self.request(Method::POST, &format!("/threads/{}/runs", thread_id))
                    .json(&json!({ "assistant_id": assistant_id })),
            )
            .await?;
        Ok(run.into())
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        let run: WireRun = self
            .send(self.request(
                Method::GET,
                &format!("/threads/{}/runs/{}", thread_id, run_id),
            ))
            .await?;
        Ok(run.into())
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<()> {
        let _: WireRun = self
            .send(
                self.request(
                    Method::POST,
                    &format!(
                        "/threads/{}/runs/{}/submit_tool_outputs",
                        thread_id, run_id
                    ),
                )
                .json(&json!({ "tool_outputs": outputs })),
            )
            .await?;
        Ok(())
    }

    async fn cancel_run(&self, thread_id: &str, run_id: &str) -> Result<()> {
        let _: WireRun = self
            .send(self.request(
                Method::POST,
                &format!("/threads/{}/runs/{}/cancel", thread_id, run_id),
            ))
            .await?;
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let list: List<WireMessage> = self
            .send(
                self.request(Method::GET, &format!("/threads/{}/messages", thread_id))
                    .query(&[("order", "desc"), ("limit", "20")]),
            )
            .await?;
        Ok(list.data.into_iter().map(Into::into).collect())
    }
}
