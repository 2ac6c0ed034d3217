//! Serenity is designed around callbacks for Discord events.  This does not mesh with the router,
//! which pulls tasks on its own schedule, so the callbacks here turn interesting messages into
//! tasks and queue them for the handler to hand out.

use super::{helper::MessageHelper, history, Settings, DISCORD};
use crate::{
    log_event, log_internal,
    task::{Command, HandlerRef, Task, UserRef},
};
use anyhow::Result;
use serenity::all::{Context, EventHandler, Message, Ready};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

const PLACEHOLDER: &str = "_Thinking..._";

pub struct Intake {
    pub tasks: UnboundedSender<Task>,
    pub settings: Arc<Settings>,
}

#[serenity::async_trait]
impl EventHandler for Intake {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        log_internal!("Connected to Discord as {}", ready.user.name);
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if let Err(e) = self.handle_message(&ctx, &msg).await {
            tracing::error!("Could not take message {}: {}", msg.id, e);
        }
    }
}

impl Intake {
    async fn handle_message(&self, ctx: &Context, msg: &Message) -> Result<()> {
        if msg.author.bot {
            return Ok(());
        }

        if msg.is_bot_cmd(&self.settings.command_prefix, "terminate") {
            if msg.is_from_owner(&self.settings.bot_owners) {
                log_internal!("{} asked to terminate", msg.author.name);
                msg.reply(ctx, "Shutting down.").await?;
                self.queue(Task::command(Command::Terminate));
            } else {
                msg.reply(ctx, "Only a bot owner can do that.").await?;
            }
            return Ok(());
        }

        if !msg.is_to_me(ctx).await? {
            return Ok(());
        }

        let placeholder = msg.reply(ctx, PLACEHOLDER).await?;
        let content = msg.human_format_content(ctx).await;
        let context =
            history::recent_context(ctx, msg, self.settings.context_message_count).await;
        log_event!("{}: {}", msg.author.name, content);

        let user = UserRef {
            id: Some(msg.author.id.to_string()),
            name: Some(msg.author.name.clone()),
            nick: msg.author_nick(ctx).await,
        };
        let mut source = HandlerRef::to(DISCORD)
            .with_user(user)
            .with_meta("channel_id", msg.channel_id.to_string())
            .with_meta("message_id", msg.id.to_string())
            .with_meta("placeholder_id", placeholder.id.to_string());
        if let Some(guild_id) = msg.guild_id {
            source = source.with_meta("guild_id", guild_id.to_string());
        }

        self.queue(Task::message(content, context).with_source(source));
        Ok(())
    }

    fn queue(&self, task: Task) {
        // Only fails once the handler is gone, i.e. during shutdown
        if self.tasks.send(task).is_err() {
            log_internal!("Dropping Discord message received during shutdown");
        }
    }
}
