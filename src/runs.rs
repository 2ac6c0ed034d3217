//! Tracking of in-flight runs on the completion engine.
//!
//! A thread may only have one active run.  Each thread gets a one-permit semaphore; the permit
//! lives inside the run's record, so it is released exactly when the run reaches a terminal state
//! and the record is dropped.  Messages for a busy thread wait in a queue instead of blocking the
//! router.

use crate::{
    assistant::new_query,
    engine::{CompletionEngine, EngineError, MessageRole, RunStatus, ToolCallRequest, ToolOutput},
    log_internal,
    task::{Task, TaskState},
    tool::{ToolError, ToolRegistry},
};
use futures::future::join_all;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    time::Instant,
};

/// What the user sees when a run ends without an answer.
pub const RUN_FAILED_REPLY: &str = "Sorry, the assistant could not complete this request.";

struct ActiveRun {
    run_id: String,
    thread_id: String,
    task: Task,
    started: Instant,
    _permit: OwnedSemaphorePermit,
}

enum Outcome {
    Pending,
    Answered(String),
    Failed(String),
}

/// Runs in flight plus the messages waiting for their thread to free up.
#[derive(Default)]
pub struct RunPoller {
    locks: HashMap<String, Arc<Semaphore>>,
    active: Vec<ActiveRun>,
    waiting: VecDeque<(String, Task)>,
    timeout: Option<Duration>,
}

impl RunPoller {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// A thread is busy while it has an active run or queued messages.
    pub fn is_busy(&self, thread_id: &str) -> bool {
        self.is_locked(thread_id) || self.waiting.iter().any(|(t, _)| t == thread_id)
    }

    fn is_locked(&self, thread_id: &str) -> bool {
        self.locks
            .get(thread_id)
            .is_some_and(|lock| lock.available_permits() == 0)
    }

    fn try_lock(&mut self, thread_id: &str) -> Option<OwnedSemaphorePermit> {
        self.locks
            .entry(thread_id.to_owned())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
            .try_acquire_owned()
            .ok()
    }

    /// Drops the lock of a thread that will not be used again.
    pub fn forget(&mut self, thread_id: &str) {
        if !self.is_busy(thread_id) {
            self.locks.remove(thread_id);
        }
    }

    /// Starts a run for `task` on `thread_id`, or queues it behind the thread's current run.
    ///
    /// Returns an error reply if the run could not be started.
    pub async fn submit(
        &mut self,
        engine: &dyn CompletionEngine,
        assistant_id: &str,
        thread_id: String,
        task: Task,
        from: &str,
    ) -> Option<Task> {
        let task = task.with_state(TaskState::Processing);
        let has_waiting = self.waiting.iter().any(|(t, _)| *t == thread_id);
        let permit = match has_waiting {
            true => None,
            false => self.try_lock(&thread_id),
        };
        let Some(permit) = permit else {
            log_internal!("Thread {} is busy, queueing task {}", thread_id, task.id);
            self.waiting.push_back((thread_id, task));
            return None;
        };

        self.start(engine, assistant_id, thread_id, task, permit, from)
            .await
    }

    async fn start(
        &mut self,
        engine: &dyn CompletionEngine,
        assistant_id: &str,
        thread_id: String,
        task: Task,
        permit: OwnedSemaphorePermit,
        from: &str,
    ) -> Option<Task> {
        let query = new_query(&task.context, &task.content);
        let started = match engine.add_message(&thread_id, &query).await {
            Ok(()) => engine.create_run(&thread_id, assistant_id).await,
            Err(e) => Err(e),
        };

        match started {
            Ok(run) => {
                log_internal!("Task {} assigned to run {} on {}", task.id, run.id, thread_id);
                self.active.push(ActiveRun {
                    run_id: run.id,
                    thread_id,
                    task,
                    started: Instant::now(),
                    _permit: permit,
                });
                None
            }
            Err(e) => {
                tracing::error!("Could not start a run for task {}: {}", task.id, e);
                Some(task.reply(RUN_FAILED_REPLY, from))
            }
        }
    }

    /// Polls every active run once.  Returns replies for runs that finished, then starts any
    /// queued messages whose thread is now free.
    pub async fn poll(
        &mut self,
        engine: &dyn CompletionEngine,
        tools: &ToolRegistry,
        assistant_id: &str,
        from: &str,
    ) -> Vec<Task> {
        let timeout = self.timeout;
        let outcomes = join_all(
            self.active
                .iter()
                .map(|run| poll_one(engine, tools, run, timeout)),
        )
        .await;

        let mut replies = Vec::new();
        let mut finished = Vec::new();
        for (i, outcome) in outcomes.into_iter().enumerate() {
            let run = &self.active[i];
            match outcome {
                Outcome::Pending => continue,
                Outcome::Answered(text) => {
                    log_internal!("Run {} completed", run.run_id);
                    replies.push(run.task.reply(text, from));
                }
                Outcome::Failed(reason) => {
                    tracing::warn!("Run {} failed: {}", run.run_id, reason);
                    replies.push(run.task.reply(RUN_FAILED_REPLY, from));
                }
            }
            finished.push(i);
        }

        // Dropping the records releases their thread locks
        for i in finished.into_iter().rev() {
            self.active.remove(i);
        }

        replies.extend(self.start_waiting(engine, assistant_id, from).await);
        replies
    }

    /// Starts the oldest waiting message of every thread whose lock is free.
    async fn start_waiting(
        &mut self,
        engine: &dyn CompletionEngine,
        assistant_id: &str,
        from: &str,
    ) -> Vec<Task> {
        let mut replies = Vec::new();
        let mut still_waiting = VecDeque::new();

        while let Some((thread_id, task)) = self.waiting.pop_front() {
            let blocked = still_waiting.iter().any(|(t, _): &(String, Task)| *t == thread_id);
            let permit = match blocked {
                true => None,
                false => self.try_lock(&thread_id),
            };
            match permit {
                Some(permit) => {
                    if let Some(reply) = self
                        .start(engine, assistant_id, thread_id, task, permit, from)
                        .await
                    {
                        replies.push(reply);
                    }
                }
                None => still_waiting.push_back((thread_id, task)),
            }
        }

        self.waiting = still_waiting;
        replies
    }
}

async fn poll_one(
    engine: &dyn CompletionEngine,
    tools: &ToolRegistry,
    run: &ActiveRun,
    timeout: Option<Duration>,
) -> Outcome {
    let timed_out = timeout.is_some_and(|timeout| run.started.elapsed() >= timeout);

    let remote = match engine.get_run(&run.thread_id, &run.run_id).await {
        Ok(remote) => remote,
        Err(e) if timed_out => {
            cancel(engine, run).await;
            return Outcome::Failed(format!("timed out, last poll failed: {}", e));
        }
        Err(e) => {
            // Try again next tick
            tracing::warn!("Could not poll run {}: {}", run.run_id, e);
            return Outcome::Pending;
        }
    };

    match remote.status {
        RunStatus::Completed => match latest_reply(engine, &run.thread_id).await {
            Ok(text) => Outcome::Answered(text),
            Err(e) => Outcome::Failed(e.to_string()),
        },
        status if status.is_failure() => Outcome::Failed(format!("status {:?}", status)),
        _ if timed_out => {
            cancel(engine, run).await;
            Outcome::Failed("timed out".to_owned())
        }
        RunStatus::RequiresAction => answer_tool_calls(engine, tools, run, &remote.tool_calls).await,
        _ => Outcome::Pending,
    }
}

/// Runs the requested tools and hands their outputs back.  Anything short of submitting every
/// output fails the run, since retrying would run the tools again.
async fn answer_tool_calls(
    engine: &dyn CompletionEngine,
    tools: &ToolRegistry,
    run: &ActiveRun,
    calls: &[ToolCallRequest],
) -> Outcome {
    if calls.is_empty() {
        cancel(engine, run).await;
        return Outcome::Failed("action required without any tool calls".to_owned());
    }

    let outputs = match call_tools(tools, calls).await {
        Ok(outputs) => outputs,
        Err(e) => {
            cancel(engine, run).await;
            return Outcome::Failed(e.to_string());
        }
    };

    log_internal!("Submitting {} tool output(s) for run {}", outputs.len(), run.run_id);
    match engine
        .submit_tool_outputs(&run.thread_id, &run.run_id, &outputs)
        .await
    {
        Ok(()) => Outcome::Pending,
        Err(e) => {
            cancel(engine, run).await;
            Outcome::Failed(format!("could not submit tool outputs: {}", e))
        }
    }
}

/// Runs every requested tool.  Fails without running anything if a tool is unknown, and fails
/// as a whole if any tool fails, so partial outputs are never submitted.
async fn call_tools(
    tools: &ToolRegistry,
    calls: &[ToolCallRequest],
) -> Result<Vec<ToolOutput>, ToolError> {
    if let Some(unknown) = calls.iter().find(|call| !tools.contains(&call.name)) {
        return Err(ToolError::UnknownTool(unknown.name.clone()));
    }

    join_all(calls.iter().map(|call| async move {
        tools
            .invoke(&call.name, &call.arguments)
            .await
            .map(|output| ToolOutput {
                tool_call_id: call.id.clone(),
                output,
            })
    }))
    .await
    .into_iter()
    .collect()
}

async fn latest_reply(engine: &dyn CompletionEngine, thread_id: &str) -> Result<String, EngineError> {
    engine
        .list_messages(thread_id)
        .await?
        .into_iter()
        .find(|msg| msg.role == MessageRole::Assistant)
        .map(|msg| msg.text)
        .ok_or_else(|| EngineError::MissingReply(thread_id.to_owned()))
}

/// Best effort.  The run is abandoned locally either way.
async fn cancel(engine: &dyn CompletionEngine, run: &ActiveRun) {
    if let Err(e) = engine.cancel_run(&run.thread_id, &run.run_id).await {
        tracing::warn!("Could not cancel run {}: {}", run.run_id, e);
    }
}

/// One conversation thread per user, forgotten after sitting idle for `ttl`.
pub struct ThreadCache {
    threads: HashMap<String, CachedThread>,
    ttl: Duration,
}

struct CachedThread {
    id: String,
    last_used: Instant,
}

impl ThreadCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            threads: HashMap::new(),
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// The user's thread, unless it expired.  Busy threads never expire.
    pub fn get(&mut self, key: &str, busy: impl Fn(&str) -> bool) -> Option<String> {
        let ttl = self.ttl;
        let thread = self.threads.get_mut(key)?;
        if thread.last_used.elapsed() >= ttl && !busy(&thread.id) {
            log_internal!("Thread {} for {} expired", thread.id, key);
            self.threads.remove(key);
            return None;
        }
        thread.last_used = Instant::now();
        Some(thread.id.clone())
    }

    pub fn insert(&mut self, key: &str, thread_id: String) {
        self.threads.insert(
            key.to_owned(),
            CachedThread {
                id: thread_id,
                last_used: Instant::now(),
            },
        );
    }

    /// Forgets every expired idle thread.  Returns their ids.
    pub fn evict_idle(&mut self, busy: impl Fn(&str) -> bool) -> Vec<String> {
        let ttl = self.ttl;
        let mut evicted = Vec::new();
        self.threads.retain(|_, thread| {
            let keep = thread.last_used.elapsed() < ttl || busy(&thread.id);
            if !keep {
                evicted.push(thread.id.clone());
            }
            keep
        });
        evicted
    }
}
