//! Miscellaneous convenience methods, plus the Discord side of the pipeline's reply and
//! notification seams

use crate::{
    context::{CacheHttp, Context},
    misses::Notifier,
    pipeline::{InboundMessage, ReplySink},
};
use anyhow::{anyhow, Result};
use serenity::all::{CreateMessage, Http, Message, UserId};
use std::sync::Arc;

#[serenity::async_trait]
pub trait MessageHelper {
    async fn author_name(&self, ctx: &Context) -> String;
    async fn is_from_owner(&self, ctx: &Context) -> bool;
    async fn is_from_admin(&self, ctx: &Context) -> bool;
    async fn to_inbound(&self, ctx: &Context) -> InboundMessage;
}

#[serenity::async_trait]
impl MessageHelper for Message {
    /// Per-server nickname, falling back to the global username, e.g. in a DM.
    async fn author_name(&self, ctx: &Context) -> String {
        let nick = match self.guild_id {
            Some(guild_id) => self.author.nick_in(ctx.cache_http, guild_id).await,
            None => None,
        };
        nick.unwrap_or_else(|| self.author.name.clone())
    }

    async fn is_from_owner(&self, ctx: &Context) -> bool {
        let owners = &ctx.cfg.read().await.general.bot_owners;
        let author_global_name = &self.author.name;

        owners.contains(author_global_name)
    }

    /// Bot owners, or the owner of the guild the message was sent in
    async fn is_from_admin(&self, ctx: &Context) -> bool {
        if self.is_from_owner(ctx).await {
            return true;
        }
        let Some(guild_id) = self.guild_id else {
            return false;
        };

        let cached_owner = self.guild(ctx.cache).map(|guild| guild.owner_id);
        let owner_id = match cached_owner {
            Some(owner_id) => Some(owner_id),
            None => guild_id
                .to_partial_guild(ctx.cache_http)
                .await
                .ok()
                .map(|guild| guild.owner_id),
        };
        owner_id == Some(self.author.id)
    }

    async fn to_inbound(&self, ctx: &Context) -> InboundMessage {
        let server_name = self
            .guild(ctx.cache)
            .map(|guild| guild.name.clone())
            .unwrap_or_else(|| "Direct Message".to_owned());
        let channel_name = match self.channel_id.name(ctx.cache_http).await {
            Ok(name) => format!("#{}", name),
            Err(_) => self.channel_id.to_string(),
        };

        InboundMessage {
            author_id: self.author.id.to_string(),
            author_tag: self.author_name(ctx).await,
            author_is_bot: self.author.bot,
            server_id: self.guild_id.map(|id| id.to_string()),
            server_name,
            channel_id: self.channel_id.to_string(),
            channel_name,
            content: self.content.clone(),
        }
    }
}

/// Replies to one Discord message
pub struct MessageReply<'a> {
    pub cache_http: &'a CacheHttp,
    pub msg: &'a Message,
}

#[serenity::async_trait]
impl ReplySink for MessageReply<'_> {
    async fn reply(&self, text: &str) -> Result<()> {
        self.msg.reply(self.cache_http, text).await?;
        Ok(())
    }
}

/// Sends direct messages to users by id
pub struct DirectMessenger {
    http: Arc<Http>,
}

impl DirectMessenger {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[serenity::async_trait]
impl Notifier for DirectMessenger {
    async fn notify(&self, recipient: &str, message: &str) -> Result<()> {
        let id: u64 = recipient
            .parse()
            .map_err(|_| anyhow!("`{}` is not a user id", recipient))?;
        if id == 0 {
            return Err(anyhow!("`{}` is not a user id", recipient));
        }

        UserId::new(id)
            .direct_message(self.http.as_ref(), CreateMessage::new().content(message))
            .await?;
        Ok(())
    }
}
