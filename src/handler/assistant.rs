use super::{Handler, Result};
use crate::{
    assistant::{self, AssistantDefinition, FINGERPRINT_KEY},
    config,
    engine::{self, CompletionEngine},
    log_internal,
    runs::{RunPoller, ThreadCache, RUN_FAILED_REPLY},
    task::Task,
};
use std::sync::Arc;

/// Bridges the router to one assistant on the completion engine.
///
/// Every user gets their own thread.  Tasks sent here become runs on that thread, and replies
/// come back out of `recv` once the runs finish.
pub struct AssistantHandler {
    engine: Arc<dyn CompletionEngine>,
    definition: AssistantDefinition,
    /// Remote id, resolved on first use
    assistant_id: Option<String>,
    threads: ThreadCache,
    runs: RunPoller,
    /// Replies produced outside of polling, e.g. runs that failed to start
    outbox: Vec<Task>,
}

impl AssistantHandler {
    pub fn new(
        engine: Arc<dyn CompletionEngine>,
        definition: AssistantDefinition,
        cfg: &config::Assistant,
    ) -> Self {
        Self {
            engine,
            definition,
            assistant_id: None,
            threads: ThreadCache::new(cfg.thread_ttl()),
            runs: RunPoller::new(cfg.run_timeout()),
            outbox: Vec::new(),
        }
    }

    async fn ensure_assistant(&mut self) -> engine::Result<String> {
        if let Some(id) = &self.assistant_id {
            return Ok(id.clone());
        }
        let id = assistant::ensure_assistant(&*self.engine, &self.definition).await?;
        log_internal!(
            "Assistant {} is {} with {} tool(s)",
            self.definition.name,
            id,
            self.definition.tools.len()
        );
        self.assistant_id = Some(id.clone());
        Ok(id)
    }

    /// The user's conversation thread, created on first contact.
    async fn ensure_thread(&mut self, user_key: &str) -> engine::Result<String> {
        self.evict_idle_threads();
        let runs = &self.runs;
        if let Some(thread_id) = self.threads.get(user_key, |t| runs.is_busy(t)) {
            return Ok(thread_id);
        }
        let thread_id = self.engine.create_thread().await?;
        log_internal!("New thread {} for {}", thread_id, user_key);
        self.threads.insert(user_key, thread_id.clone());
        Ok(thread_id)
    }

    fn evict_idle_threads(&mut self) {
        let runs = &self.runs;
        let evicted = self.threads.evict_idle(|t| runs.is_busy(t));
        if evicted.is_empty() {
            return;
        }
        for thread_id in &evicted {
            log_internal!("Forgetting idle thread {}", thread_id);
            self.runs.forget(thread_id);
        }
        log_internal!(
            "{} thread(s) evicted, {} still cached",
            evicted.len(),
            self.threads.len()
        );
    }

    async fn submit(&mut self, task: Task) {
        let key = task.conversation_key();
        let prepared = match self.ensure_assistant().await {
            Ok(assistant_id) => self
                .ensure_thread(&key)
                .await
                .map(|thread_id| (assistant_id, thread_id)),
            Err(e) => Err(e),
        };

        match prepared {
            Ok((assistant_id, thread_id)) => {
                let failed = self
                    .runs
                    .submit(
                        &*self.engine,
                        &assistant_id,
                        thread_id,
                        task,
                        &self.definition.name,
                    )
                    .await;
                self.outbox.extend(failed);
            }
            Err(e) => {
                tracing::error!("Could not hand task {} to {}: {}", task.id, self.definition.name, e);
                self.outbox
                    .push(task.reply(RUN_FAILED_REPLY, &self.definition.name));
            }
        }
    }
}

#[async_trait::async_trait]
impl Handler for AssistantHandler {
    fn name(&self) -> &str {
        &self.definition.name
    }

    /// Deletes every remote assistant this bot created.  Failures are logged, never returned.
    async fn teardown(&mut self) -> Result<()> {
        let assistants = match self.engine.list_assistants().await {
            Ok(assistants) => assistants,
            Err(e) => {
                tracing::warn!("Could not list assistants for cleanup: {}", e);
                return Ok(());
            }
        };

        for remote in assistants
            .into_iter()
            .filter(|a| a.metadata.contains_key(FINGERPRINT_KEY))
        {
            match self.engine.delete_assistant(&remote.id).await {
                Ok(()) => log_internal!("Deleted assistant {}", remote.id),
                Err(e) => tracing::warn!("Could not delete assistant {}: {}", remote.id, e),
            }
        }
        self.assistant_id = None;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<Task>> {
        self.evict_idle_threads();

        let mut replies: Vec<Task> = self.outbox.drain(..).collect();
        if let Some(assistant_id) = &self.assistant_id {
            replies.extend(
                self.runs
                    .poll(
                        &*self.engine,
                        &self.definition.tools,
                        assistant_id,
                        &self.definition.name,
                    )
                    .await,
            );
        }
        if !replies.is_empty() {
            log_internal!(
                "{} reply task(s) from {}, {} run(s) active, {} waiting",
                replies.len(),
                self.definition.name,
                self.runs.active_count(),
                self.runs.waiting_count()
            );
        }
        Ok(replies)
    }

    async fn send(&mut self, tasks: Vec<Task>) -> Result<()> {
        for task in tasks {
            self.submit(task).await;
        }
        Ok(())
    }
}
