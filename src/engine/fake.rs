//! In-memory completion engine for tests.  Runs only move when a test moves them.

use super::{
    AssistantSpec, CompletionEngine, EngineError, MessageRole, RemoteAssistant, Result, Run,
    RunStatus, ThreadMessage, ToolCallRequest, ToolOutput,
};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

#[derive(Default)]
pub struct FakeState {
    pub assistants: Vec<RemoteAssistant>,
    pub creates: usize,
    pub updates: usize,
    pub deleted: Vec<String>,
    pub threads: Vec<String>,
    /// Messages per thread, oldest first
    pub messages: HashMap<String, Vec<ThreadMessage>>,
    pub runs: HashMap<String, Run>,
    /// Run ids in creation order
    pub run_order: Vec<String>,
    pub submitted: Vec<(String, Vec<ToolOutput>)>,
    pub cancelled: Vec<String>,
    /// Make every `get_run` fail, as if the network were down
    pub fail_polls: bool,
    /// Make every `create_run` fail
    pub fail_runs: bool,
    /// Make every `submit_tool_outputs` fail
    pub fail_submits: bool,
    next_id: usize,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_{}", prefix, self.next_id)
    }
}

#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn run_ids(&self) -> Vec<String> {
        self.state().run_order.clone()
    }

    pub fn run(&self, run_id: &str) -> Run {
        self.state().runs[run_id].clone()
    }

    pub fn set_status(&self, run_id: &str, status: RunStatus) {
        self.state().runs.get_mut(run_id).unwrap().status = status;
    }

    pub fn require_action(&self, run_id: &str, calls: Vec<ToolCallRequest>) {
        let mut state = self.state();
        let run = state.runs.get_mut(run_id).unwrap();
        run.status = RunStatus::RequiresAction;
        run.tool_calls = calls;
    }

    /// Finishes the run with `reply` as the assistant's answer.
    pub fn complete(&self, run_id: &str, reply: &str) {
        let mut state = self.state();
        let run = state.runs.get_mut(run_id).unwrap();
        run.status = RunStatus::Completed;
        run.tool_calls.clear();
        let thread_id = run.thread_id.clone();
        state
            .messages
            .entry(thread_id)
            .or_default()
            .push(ThreadMessage {
                role: MessageRole::Assistant,
                text: reply.to_owned(),
            });
    }
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_owned(),
        name: name.to_owned(),
        arguments: arguments.to_owned(),
    }
}

fn not_found(what: &str) -> EngineError {
    EngineError::Api {
        status: 404,
        message: format!("No {} found", what),
    }
}

#[async_trait::async_trait]
impl CompletionEngine for FakeEngine {
    async fn list_assistants(&self) -> Result<Vec<RemoteAssistant>> {
        Ok(self.state().assistants.clone())
    }

    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<RemoteAssistant> {
        let mut state = self.state();
        state.creates += 1;
        let assistant = RemoteAssistant {
            id: state.next_id("asst"),
            name: Some(spec.name.clone()),
            metadata: spec.metadata.clone(),
        };
        state.assistants.push(assistant.clone());
        Ok(assistant)
    }

    async fn update_assistant(&self, id: &str, spec: &AssistantSpec) -> Result<RemoteAssistant> {
        let mut state = self.state();
        state.updates += 1;
        let assistant = state
            .assistants
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| not_found("assistant"))?;
        assistant.name = Some(spec.name.clone());
        assistant.metadata = spec.metadata.clone();
        Ok(assistant.clone())
    }

    async fn delete_assistant(&self, id: &str) -> Result<()> {
        let mut state = self.state();
        state.assistants.retain(|a| a.id != id);
        state.deleted.push(id.to_owned());
        Ok(())
    }

    async fn create_thread(&self) -> Result<String> {
        let mut state = self.state();
        let id = state.next_id("thread");
        state.threads.push(id.clone());
        Ok(id)
    }

    async fn add_message(&self, thread_id: &str, content: &str) -> Result<()> {
        self.state()
            .messages
            .entry(thread_id.to_owned())
            .or_default()
            .push(ThreadMessage {
                role: MessageRole::User,
                text: content.to_owned(),
            });
        Ok(())
    }

    async fn create_run(&self, thread_id: &str, _assistant_id: &str) -> Result<Run> {
        let mut state = self.state();
        if state.fail_runs {
            return Err(EngineError::Api {
                status: 500,
                message: "could not create run".to_owned(),
            });
        }
        let id = state.next_id("run");
        let run = Run {
            id: id.clone(),
            thread_id: thread_id.to_owned(),
            status: RunStatus::Queued,
            tool_calls: Vec::new(),
        };
        state.runs.insert(id.clone(), run.clone());
        state.run_order.push(id);
        Ok(run)
    }

    async fn get_run(&self, _thread_id: &str, run_id: &str) -> Result<Run> {
        let state = self.state();
        if state.fail_polls {
            return Err(EngineError::Api {
                status: 503,
                message: "unavailable".to_owned(),
            });
        }
        state.runs.get(run_id).cloned().ok_or_else(|| not_found("run"))
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<()> {
        let mut state = self.state();
        if state.fail_submits {
            return Err(EngineError::Api {
                status: 502,
                message: "bad gateway".to_owned(),
            });
        }
        let run = state.runs.get_mut(run_id).ok_or_else(|| not_found("run"))?;
        run.status = RunStatus::InProgress;
        run.tool_calls.clear();
        state.submitted.push((run_id.to_owned(), outputs.to_vec()));
        Ok(())
    }

    async fn cancel_run(&self, _thread_id: &str, run_id: &str) -> Result<()> {
        let mut state = self.state();
        let run = state.runs.get_mut(run_id).ok_or_else(|| not_found("run"))?;
        run.status = RunStatus::Cancelled;
        state.cancelled.push(run_id.to_owned());
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>> {
        let state = self.state();
        let mut messages = state.messages.get(thread_id).cloned().unwrap_or_default();
        messages.reverse();
        Ok(messages)
    }
}
