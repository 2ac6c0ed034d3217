//! Miscellaneous convenience methods

use anyhow::Result;
use serenity::all::{Context, GuildId, Message, User};
use std::collections::HashMap;

#[serenity::async_trait]
pub trait UserHelper {
    async fn nick_in_guild(&self, ctx: &Context, guild_id: Option<GuildId>) -> String;
}

#[serenity::async_trait]
impl UserHelper for User {
    async fn nick_in_guild(&self, ctx: &Context, guild_id: Option<GuildId>) -> String {
        let nick_in_guild = match guild_id {
            Some(guild_id) => self.nick_in(ctx, guild_id).await,
            None => None,
        };

        // May not be in a guild, e.g. DM.  Fall back to global username.
        match nick_in_guild {
            Some(nick_in_guild) => nick_in_guild,
            None => self.name.clone(),
        }
    }
}

#[serenity::async_trait]
pub trait MessageHelper {
    async fn human_format_content(&self, ctx: &Context) -> String;
    async fn is_to_me(&self, ctx: &Context) -> Result<bool>;
    fn is_from_owner(&self, owners: &[String]) -> bool;
    fn is_bot_cmd(&self, prefix: &str, cmd: &str) -> bool;
}

#[serenity::async_trait]
impl MessageHelper for Message {
    /// Convert discord-formatted message content, which may contain non-user-friendly markup, to a
    /// human-friendly format the assistant can read.
    ///
    /// Serenity's `content_safe()` uses global discord names rather than per-server names, so the
    /// replacement is done here with the preferred name.
    async fn human_format_content(&self, ctx: &Context) -> String {
        let mut mention_map: HashMap<String, String> = HashMap::new();

        // User mentions, e.g. `<@!1234567890>`
        for user in &self.mentions {
            let name = user.nick_in_guild(ctx, self.guild_id).await;
            mention_map.insert(format!("<@!{}>", user.id), name.clone());
            mention_map.insert(format!("<@{}>", user.id), name);
        }

        if let Some(guild) = self.guild(&ctx.cache) {
            // Role mentions, e.g. `<@&1234567890>`
            for role_id in &self.mention_roles {
                let name = match guild.roles.get(role_id) {
                    Some(role) => format!("@{}", role.name),
                    None => "@UnknownRole".to_owned(),
                };
                mention_map.insert(format!("<@&{}>", role_id), name);
            }

            // Channel mentions, e.g. `<#1234567890>`
            for channel in &self.mention_channels {
                let name = match guild.channels.get(&channel.id) {
                    Some(channel) => format!("#{}", channel.name),
                    None => "#UnknownChannel".to_owned(),
                };
                mention_map.insert(format!("<#{}>", channel.id), name);
            }
        }

        let mut content = self.content.clone();
        for (mention, name) in mention_map {
            content = content.replace(&mention, &name);
        }
        content
    }

    async fn is_to_me(&self, ctx: &Context) -> Result<bool> {
        // Direct messages are always to me
        if self.guild_id.is_none() {
            return Ok(true);
        }

        if self.mentions_me(ctx).await? {
            return Ok(true);
        }

        // A reply to something the bot said
        let my_id = ctx.cache.current_user().id;
        if let Some(replied_to) = &self.referenced_message {
            return Ok(replied_to.author.id == my_id);
        }
        Ok(false)
    }

    fn is_from_owner(&self, owners: &[String]) -> bool {
        owners.contains(&self.author.name)
    }

    /// Whether the message is the bot command `cmd`, e.g. `;terminate` with prefix `;`.
    fn is_bot_cmd(&self, prefix: &str, cmd: &str) -> bool {
        is_bot_cmd(&self.content, prefix, cmd)
    }
}

fn is_bot_cmd(content: &str, prefix: &str, cmd: &str) -> bool {
    content
        .split_ascii_whitespace()
        .next()
        .and_then(|word| word.strip_prefix(prefix))
        == Some(cmd)
}
