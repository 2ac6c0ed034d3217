//! The Discord chat surface.  Messages addressed to the bot become tasks, and replies routed back
//! here are posted in place of the "thinking" placeholder.

use crate::{
    config::Config,
    handler::{Handler, HandlerError, Result},
    log_event, log_internal,
    task::{Task, TaskState},
};
use serenity::{
    all::{
        ChannelId, CreateMessage, EditMessage, GatewayIntents, Http, MessageId, ShardManager,
    },
    Client,
};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};

mod chunk;
mod event;
mod helper;
mod history;

pub const DISCORD: &str = "Discord";

/// What the event callbacks need to know
pub struct Settings {
    pub bot_owners: Vec<String>,
    pub command_prefix: String,
    pub context_message_count: u8,
}

/// Connection state, present between setup and teardown
struct Connection {
    http: Arc<Http>,
    shard_manager: Arc<ShardManager>,
    intake: UnboundedReceiver<Task>,
}

pub struct DiscordHandler {
    token: String,
    settings: Arc<Settings>,
    message_limit: usize,
    connection: Option<Connection>,
}

impl DiscordHandler {
    pub fn new(cfg: &Config) -> Self {
        Self {
            token: cfg.general.discord_token.clone(),
            settings: Arc::new(Settings {
                bot_owners: cfg.general.bot_owners.clone(),
                command_prefix: cfg.general.command_prefix.clone(),
                context_message_count: cfg.discord.context_message_count,
            }),
            message_limit: cfg.discord.message_limit,
            connection: None,
        }
    }
}

#[async_trait::async_trait]
impl Handler for DiscordHandler {
    fn name(&self) -> &str {
        DISCORD
    }

    async fn setup(&mut self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(HandlerError::Setup("no Discord token configured".to_owned()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let intake = event::Intake {
            tasks: tx,
            settings: self.settings.clone(),
        };

        // Things we want discord to tell us about.
        let intents = GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MEMBERS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let mut client = Client::builder(&self.token, intents)
            .event_handler(intake)
            .await?;

        self.connection = Some(Connection {
            http: client.http.clone(),
            shard_manager: client.shard_manager.clone(),
            intake: rx,
        });

        tokio::spawn(async move {
            if let Err(e) = client.start().await {
                tracing::error!("Discord client stopped: {}", e);
            }
        });
        log_internal!("Discord client started");
        Ok(())
    }

    async fn teardown(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            connection.shard_manager.shutdown_all().await;
            log_internal!("Discord client shut down");
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Vec<Task>> {
        let Some(connection) = &mut self.connection else {
            return Ok(Vec::new());
        };

        let mut tasks = Vec::new();
        while let Ok(task) = connection.intake.try_recv() {
            tasks.push(task);
        }
        Ok(tasks)
    }

    async fn send(&mut self, tasks: Vec<Task>) -> Result<()> {
        let Some(connection) = &self.connection else {
            return Err(HandlerError::Delivery("Discord is not connected".to_owned()));
        };

        for task in tasks {
            if let Err(e) = deliver(&connection.http, &task, self.message_limit).await {
                tracing::error!("Could not deliver task {}: {}", task.id, e);
                continue;
            }
            let task = task.with_state(TaskState::Complete);
            log_event!("{}", task);
        }
        Ok(())
    }
}

/// Posts a reply: the first piece replaces the placeholder, the rest follow as replies to the
/// user's message.
async fn deliver(http: &Arc<Http>, task: &Task, limit: usize) -> Result<()> {
    let meta = &task.destination.meta;
    let channel_id = meta_id(meta.get("channel_id"))
        .map(ChannelId::new)
        .ok_or_else(|| HandlerError::Delivery(format!("task {} has no channel", task.id)))?;
    let message_id = meta_id(meta.get("message_id")).map(MessageId::new);
    let placeholder_id = meta_id(meta.get("placeholder_id")).map(MessageId::new);

    let mut posts = chunk::posts(&task.content, limit).into_iter();
    let first = posts
        .next()
        .filter(|post| !post.is_empty())
        .unwrap_or_else(|| "_(no reply)_".to_owned());

    match placeholder_id {
        Some(placeholder_id) => {
            channel_id
                .edit_message(http, placeholder_id, EditMessage::new().content(first))
                .await?;
        }
        None => {
            channel_id
                .send_message(http, reply_to(channel_id, message_id, first))
                .await?;
        }
    }

    for post in posts {
        channel_id
            .send_message(http, reply_to(channel_id, message_id, post))
            .await?;
    }
    Ok(())
}

fn reply_to(channel_id: ChannelId, message_id: Option<MessageId>, content: String) -> CreateMessage {
    let message = CreateMessage::new().content(content);
    match message_id {
        Some(message_id) => message.reference_message((channel_id, message_id)),
        None => message,
    }
}

/// Discord snowflakes are never zero
fn meta_id(value: Option<&String>) -> Option<u64> {
    value
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|&id| id != 0)
}
