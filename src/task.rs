//! Tasks are the unit of work the router moves between handlers: a user's message on its way to
//! an assistant, or an assistant's reply on its way back.

use std::collections::BTreeMap;
use std::fmt;

/// Correlation id.  A reply carries the id of the task it answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(uuid::Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Freshly received, not yet seen by the router
    New,
    /// Routed and on its way to a handler
    Outbound,
    /// Accepted by a handler that owes a reply
    Processing,
    /// Delivered or dropped.  No handler owns it anymore.
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Stop the router after the current tick
    Terminate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Message,
    Command(Command),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserRef {
    pub id: Option<String>,
    pub name: Option<String>,
    /// Display name, e.g. a per-server nickname
    pub nick: Option<String>,
}

/// One end of a task's route.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HandlerRef {
    /// Name of the handler.  `None` until assigned.
    pub handler: Option<String>,
    pub user: UserRef,
    /// Handler-specific addressing, e.g. Discord channel and message ids
    pub meta: BTreeMap<String, String>,
}

impl HandlerRef {
    pub fn to(handler: impl Into<String>) -> Self {
        Self {
            handler: Some(handler.into()),
            ..Self::default()
        }
    }

    pub fn is(&self, handler: &str) -> bool {
        self.handler.as_deref() == Some(handler)
    }

    pub fn with_user(mut self, user: UserRef) -> Self {
        self.user = user;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Raw message text
    pub content: String,
    /// Conversation backdrop for the completion engine.  Not part of the message itself.
    pub context: String,
    pub source: HandlerRef,
    pub destination: HandlerRef,
    pub state: TaskState,
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Task {}

impl Task {
    pub fn message(content: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            kind: TaskKind::Message,
            content: content.into(),
            context: context.into(),
            source: HandlerRef::default(),
            destination: HandlerRef::default(),
            state: TaskState::New,
        }
    }

    pub fn command(command: Command) -> Self {
        Self {
            kind: TaskKind::Command(command),
            ..Self::message("", "")
        }
    }

    pub fn is_command(&self, command: Command) -> bool {
        self.kind == TaskKind::Command(command)
    }

    pub fn with_source(mut self, source: HandlerRef) -> Self {
        self.source = source;
        self
    }

    /// Tags the originating handler unless one is already set.
    pub fn with_source_handler(mut self, handler: &str) -> Self {
        if self.source.handler.is_none() {
            self.source.handler = Some(handler.to_owned());
        }
        self
    }

    pub fn with_destination(mut self, destination: HandlerRef) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.state = state;
        self
    }

    /// Builds the answer to this task: routed back to where it came from, sent by `from`.
    pub fn reply(&self, content: impl Into<String>, from: &str) -> Self {
        let mut source = self.destination.clone();
        source.handler = Some(from.to_owned());
        Self {
            id: self.id,
            kind: TaskKind::Message,
            content: content.into(),
            context: String::new(),
            source,
            destination: self.source.clone(),
            state: TaskState::Outbound,
        }
    }

    /// Key of the conversation this task belongs to: the user, or failing that the handler.
    pub fn conversation_key(&self) -> String {
        match (&self.source.user.id, &self.source.handler) {
            (Some(id), _) => id.clone(),
            (None, Some(handler)) => handler.clone(),
            (None, None) => "anonymous".to_owned(),
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} [{} -> {}] {:?}",
            self.id,
            self.source.handler.as_deref().unwrap_or("<unset>"),
            self.destination.handler.as_deref().unwrap_or("<unset>"),
            self.content,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> HandlerRef {
        HandlerRef::to("Discord")
            .with_user(UserRef {
                id: Some("42".into()),
                name: Some("alice".into()),
                nick: None,
            })
            .with_meta("message_id", "1001")
    }

    #[test]
    fn reply_swaps_route_and_keeps_id() {
        let task = Task::message("What's my horoscope?", "")
            .with_source(alice())
            .with_destination(HandlerRef::to("Mila"));

        let reply = task.reply("Memento mori.", "Mila");

        assert_eq!(reply.id, task.id);
        assert_eq!(reply, task);
        assert_eq!(reply.content, "Memento mori.");
        assert!(reply.destination.is("Discord"));
        assert_eq!(reply.destination.meta["message_id"], "1001");
        assert!(reply.source.is("Mila"));
        assert_eq!(reply.state, TaskState::Outbound);
    }

    #[test]
    fn source_handler_is_only_set_once() {
        let task = Task::message("hi", "")
            .with_source_handler("Discord")
            .with_source_handler("Loopback");
        assert!(task.source.is("Discord"));
    }

    #[test]
    fn equality_is_by_id_not_content() {
        let a = Task::message("same", "");
        let b = Task::message("same", "");
        assert_ne!(a, b);
        assert_eq!(a.clone().with_state(TaskState::Complete), a);
    }

    #[test]
    fn commands_are_tagged_variants() {
        let kill = Task::command(Command::Terminate);
        assert!(kill.is_command(Command::Terminate));
        assert!(!Task::message("TERMINATE", "COMMAND").is_command(Command::Terminate));
    }

    #[test]
    fn conversation_key_prefers_user() {
        let task = Task::message("hi", "").with_source(alice());
        assert_eq!(task.conversation_key(), "42");
        let task = Task::message("hi", "").with_source_handler("Loopback");
        assert_eq!(task.conversation_key(), "Loopback");
    }
}
