//! Conversation context handed to the assistant along with each message.

use super::helper::{MessageHelper, UserHelper};
use crate::log_internal;
use serenity::all::{Context, GetMessages, Message};

/// The `count` messages before `msg` in its channel, oldest first, plus where the chat happens.
pub async fn recent_context(ctx: &Context, msg: &Message, count: u8) -> String {
    let server = msg.guild_id.map(|guild_id| {
        guild_id
            .name(&ctx.cache)
            .unwrap_or_else(|| "an unknown".to_owned())
    });

    // Ignore errors here.  A message without context is still worth answering.
    let backfill = match msg
        .channel_id
        .messages(ctx, GetMessages::new().before(msg.id).limit(count))
        .await
    {
        Ok(messages) => messages,
        Err(e) => {
            log_internal!("Could not backfill channel {}: {}", msg.channel_id, e);
            Vec::new()
        }
    };

    // Messages are provided newest to oldest
    let mut entries = Vec::new();
    for earlier in backfill.iter().rev() {
        // Fetched messages lack the guild id, so use the one of the message being answered
        let author = earlier.author.nick_in_guild(ctx, msg.guild_id).await;
        entries.push((author, earlier.human_format_content(ctx).await));
    }

    format_context(server.as_deref(), &entries)
}

/// Renders (author, content) pairs IRC-style under a line saying where the chat takes place.
pub fn format_context(server: Option<&str>, entries: &[(String, String)]) -> String {
    let mut context = match server {
        Some(server) => format!("You are in the {} Discord server.", server),
        None => "You are in a private direct-message chat.".to_owned(),
    };
    for (author, content) in entries {
        context.push_str(&format!("\n<{}> {}", author, content));
    }
    context
}
