//! The scheduler.  Every tick it collects new tasks from all handlers, addresses them, and hands
//! each one to exactly one handler.

use crate::{
    handler::{Handler, HandlerError},
    log_event, log_internal,
    task::{Command, Task, TaskState},
};
use futures::future::join_all;
use std::{collections::HashSet, future::Future, time::Duration};

#[derive(thiserror::Error, Debug)]
pub enum RouterError {
    #[error("two handlers are named `{0}`")]
    DuplicateHandler(String),

    #[error("default handler `{0}` is not registered")]
    UnknownDefaultHandler(String),

    #[error("handler `{handler}` failed to set up: {source}")]
    Setup {
        handler: String,
        #[source]
        source: HandlerError,
    },
}

/// What happened during one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub collected: usize,
    pub delivered: usize,
    pub unroutable: usize,
    pub terminated: bool,
}

pub struct Router {
    handlers: Vec<Box<dyn Handler>>,
    default_handler: String,
    tick: Duration,
    running: bool,
}

impl Router {
    pub fn new(
        handlers: Vec<Box<dyn Handler>>,
        default_handler: &str,
        tick: Duration,
    ) -> Result<Self, RouterError> {
        let mut names = HashSet::new();
        for handler in &handlers {
            if !names.insert(handler.name().to_owned()) {
                return Err(RouterError::DuplicateHandler(handler.name().to_owned()));
            }
        }
        if !names.contains(default_handler) {
            return Err(RouterError::UnknownDefaultHandler(default_handler.to_owned()));
        }

        Ok(Self {
            handlers,
            default_handler: default_handler.to_owned(),
            tick,
            running: false,
        })
    }

    /// Sets up every handler, ticks until a terminate command arrives or `shutdown` resolves,
    /// then tears every handler down.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) -> Result<(), RouterError> {
        self.setup().await?;
        self.running = true;
        log_internal!("Router started with {} handler(s)", self.handlers.len());

        tokio::pin!(shutdown);
        while self.running {
            self.tick().await;
            if !self.running {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.tick) => {}
                _ = &mut shutdown => {
                    log_internal!("Shutdown requested");
                    self.running = false;
                }
            }
        }

        self.teardown().await;
        log_internal!("Router stopped");
        Ok(())
    }

    async fn setup(&mut self) -> Result<(), RouterError> {
        for i in 0..self.handlers.len() {
            if let Err(source) = self.handlers[i].setup().await {
                let handler = self.handlers[i].name().to_owned();
                tracing::error!("Handler {} failed to set up: {}", handler, source);
                for ready in self.handlers[..i].iter_mut() {
                    if let Err(e) = ready.teardown().await {
                        tracing::warn!("Handler {} failed to tear down: {}", ready.name(), e);
                    }
                }
                return Err(RouterError::Setup { handler, source });
            }
        }
        Ok(())
    }

    async fn teardown(&mut self) {
        for handler in self.handlers.iter_mut() {
            if let Err(e) = handler.teardown().await {
                tracing::warn!("Handler {} failed to tear down: {}", handler.name(), e);
            }
        }
    }

    /// One collect, process, route pass.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        let tasks = self.collect().await;
        report.collected = tasks.len();

        let mut batches: Vec<Vec<Task>> = self.handlers.iter().map(|_| Vec::new()).collect();
        for task in tasks {
            if task.is_command(Command::Terminate) {
                log_internal!(
                    "Terminate command from {}",
                    task.source.handler.as_deref().unwrap_or("<unset>")
                );
                self.running = false;
                report.terminated = true;
                continue;
            }
            let task = self.address(task);

            let target = self
                .handlers
                .iter()
                .position(|h| task.destination.is(h.name()));
            match target {
                Some(i) => batches[i].push(task),
                None => {
                    let task = task.with_state(TaskState::Complete);
                    tracing::warn!("Dropping unroutable task {}", task);
                    report.unroutable += 1;
                }
            }
        }

        report.delivered = batches.iter().map(Vec::len).sum();
        self.route(batches).await;
        report
    }

    /// Every handler's new tasks, in handler order and then arrival order.
    async fn collect(&mut self) -> Vec<Task> {
        let batches = join_all(self.handlers.iter_mut().map(|handler| async move {
            let name = handler.name().to_owned();
            let tasks = match handler.recv().await {
                Ok(tasks) => tasks,
                Err(e) => {
                    tracing::error!("Handler {} failed to receive: {}", name, e);
                    Vec::new()
                }
            };
            tasks
                .into_iter()
                .map(|task| task.with_source_handler(&name))
                .collect::<Vec<_>>()
        }))
        .await;

        batches.into_iter().flatten().collect()
    }

    fn address(&self, task: Task) -> Task {
        let task = match task.destination.handler {
            Some(_) => task,
            None => {
                let mut destination = task.destination.clone();
                destination.handler = Some(self.default_handler.clone());
                task.with_destination(destination)
            }
        };
        log_event!("{}", task);
        task.with_state(TaskState::Outbound)
    }

    async fn route(&mut self, batches: Vec<Vec<Task>>) {
        join_all(
            self.handlers
                .iter_mut()
                .zip(batches)
                .filter(|(_, batch)| !batch.is_empty())
                .map(|(handler, batch)| async move {
                    if let Err(e) = handler.send(batch).await {
                        tracing::error!("Handler {} failed to send: {}", handler.name(), e);
                    }
                }),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        handler::{
            loopback::{Loopback, LOOPBACK},
            Result,
        },
        task::HandlerRef,
    };
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    };
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    /// Counts warnings emitted while it is the default subscriber.
    #[derive(Clone, Default)]
    struct WarnCounter(Arc<AtomicUsize>);

    impl WarnCounter {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarnCounter {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Handler that emits scripted tasks and records everything else.
    #[derive(Clone, Default)]
    struct Scripted {
        name: String,
        inbox: Arc<Mutex<Vec<Task>>>,
        sent: Arc<Mutex<Vec<Task>>>,
        lifecycle: Arc<Mutex<Vec<String>>>,
        fail_setup: bool,
    }

    impl Scripted {
        fn new(name: &str) -> Self {
            Self {
                name: name.into(),
                ..Self::default()
            }
        }

        fn emit(&self, task: Task) {
            self.inbox.lock().unwrap().push(task);
        }

        fn sent(&self) -> Vec<Task> {
            self.sent.lock().unwrap().clone()
        }

        fn lifecycle(&self) -> Vec<String> {
            self.lifecycle.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Handler for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        async fn setup(&mut self) -> Result<()> {
            if self.fail_setup {
                return Err(HandlerError::Setup("no".into()));
            }
            self.lifecycle.lock().unwrap().push("setup".into());
            Ok(())
        }

        async fn teardown(&mut self) -> Result<()> {
            self.lifecycle.lock().unwrap().push("teardown".into());
            Ok(())
        }

        async fn recv(&mut self) -> Result<Vec<Task>> {
            Ok(self.inbox.lock().unwrap().drain(..).collect())
        }

        async fn send(&mut self, tasks: Vec<Task>) -> Result<()> {
            self.sent.lock().unwrap().extend(tasks);
            Ok(())
        }
    }

    fn router(handlers: Vec<Box<dyn Handler>>) -> Router {
        Router::new(handlers, LOOPBACK, Duration::from_millis(1)).unwrap()
    }

    #[tokio::test]
    async fn round_trip_through_default_handler() {
        let chat = Scripted::new("Chat");
        let mut router = router(vec![Box::new(chat.clone()), Box::new(Loopback::new())]);

        let tasks: Vec<Task> = ["one", "two", "three"]
            .into_iter()
            .map(|c| Task::message(c, ""))
            .collect();
        for task in &tasks {
            chat.emit(task.clone());
        }

        let report = router.tick().await;
        assert_eq!(report.collected, 3);
        assert_eq!(report.delivered, 3);
        assert!(chat.sent().is_empty());

        let report = router.tick().await;
        assert_eq!(report.delivered, 3);

        let replies = chat.sent();
        assert_eq!(replies, tasks);
        let contents: Vec<_> = replies.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, ["one", "two", "three"]);
        for reply in &replies {
            assert!(reply.source.is(LOOPBACK));
            assert!(reply.destination.is("Chat"));
            assert_eq!(reply.state, TaskState::Outbound);
        }

        // Nothing lingers in the router
        assert_eq!(router.tick().await, TickReport::default());
    }

    #[tokio::test]
    async fn unroutable_tasks_are_dropped_once() {
        let chat = Scripted::new("Chat");
        let mut router = router(vec![Box::new(chat.clone()), Box::new(Loopback::new())]);

        let warnings = WarnCounter::default();
        let _guard = tracing_subscriber::registry()
            .with(warnings.clone())
            .set_default();

        chat.emit(Task::message("lost", "").with_destination(HandlerRef::to("Nobody")));
        let report = router.tick().await;

        assert_eq!(report.collected, 1);
        assert_eq!(report.unroutable, 1);
        assert_eq!(report.delivered, 0);
        assert_eq!(warnings.count(), 1);

        assert_eq!(router.tick().await, TickReport::default());
        assert_eq!(warnings.count(), 1);
        assert!(chat.sent().is_empty());
    }

    #[tokio::test]
    async fn explicit_destination_wins_over_default() {
        let chat = Scripted::new("Chat");
        let other = Scripted::new("Other");
        let mut router = router(vec![
            Box::new(chat.clone()),
            Box::new(other.clone()),
            Box::new(Loopback::new()),
        ]);

        let task = Task::message("direct", "").with_destination(HandlerRef::to("Other"));
        chat.emit(task.clone());
        router.tick().await;

        assert_eq!(other.sent(), vec![task]);
        assert!(other.sent()[0].source.is("Chat"));
    }

    #[tokio::test]
    async fn terminate_stops_the_loop() {
        let chat = Scripted::new("Chat");
        let mut router = router(vec![Box::new(chat.clone()), Box::new(Loopback::new())]);

        chat.emit(Task::command(Command::Terminate));
        router.run_until(futures::future::pending::<()>()).await.unwrap();

        assert_eq!(chat.lifecycle(), ["setup", "teardown"]);
        assert!(chat.sent().is_empty());
    }

    #[tokio::test]
    async fn shutdown_future_stops_the_loop() {
        let chat = Scripted::new("Chat");
        let mut router = router(vec![Box::new(chat.clone()), Box::new(Loopback::new())]);

        router.run_until(async {}).await.unwrap();

        assert_eq!(chat.lifecycle(), ["setup", "teardown"]);
    }

    #[tokio::test]
    async fn failed_setup_unwinds() {
        let first = Scripted::new("First");
        let broken = Scripted {
            fail_setup: true,
            ..Scripted::new("Broken")
        };
        let last = Scripted::new("Last");
        let mut router = Router::new(
            vec![
                Box::new(first.clone()),
                Box::new(broken.clone()),
                Box::new(last.clone()),
            ],
            "First",
            Duration::from_millis(1),
        )
        .unwrap();

        let err = router.run_until(async {}).await.unwrap_err();

        assert!(matches!(err, RouterError::Setup { ref handler, .. } if handler == "Broken"));
        assert_eq!(first.lifecycle(), ["setup", "teardown"]);
        assert!(broken.lifecycle().is_empty());
        assert!(last.lifecycle().is_empty());
    }

    #[test]
    fn handler_names_must_be_unique_and_default_known() {
        let dup: Vec<Box<dyn Handler>> = vec![Box::new(Scripted::new("A")), Box::new(Scripted::new("A"))];
        assert!(matches!(
            Router::new(dup, "A", Duration::ZERO),
            Err(RouterError::DuplicateHandler(name)) if name == "A"
        ));

        let handlers: Vec<Box<dyn Handler>> = vec![Box::new(Scripted::new("A"))];
        assert!(matches!(
            Router::new(handlers, "B", Duration::ZERO),
            Err(RouterError::UnknownDefaultHandler(name)) if name == "B"
        ));
    }
}
