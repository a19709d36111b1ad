use crate::{
    admin::{AdminCommand, Caller, USAGE},
    event::*,
    helper::MessageHelper,
    log_internal,
    logging::*,
    plugin::*,
};
use anyhow::Result;

/// Knowledge base administration for bot owners and the guild owner
pub struct Kb;

#[serenity::async_trait]
impl Plugin for Kb {
    fn name(&self) -> &'static str {
        "kb"
    }

    async fn usage(&self, ctx: &Context) -> Option<String> {
        let prefix = &ctx.cfg.read().await.general.command_prefix;
        Some(format!(
            "{}{} - (server owner only; tier and other users' usage: bot owner only)",
            prefix, USAGE
        ))
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        let Some((msg, args)) = event.is_bot_cmd(ctx, self.name()).await else {
            return Ok(EventHandled::No);
        };

        let Some(guild_id) = msg.guild_id else {
            msg.reply(ctx.cache_http, "Knowledge base commands only work in a server")
                .await?;
            return Ok(EventHandled::Yes);
        };
        if !msg.is_from_admin(ctx).await {
            msg.reply(
                ctx.cache_http,
                "Only the server owner can manage the knowledge base",
            )
            .await?;
            return Ok(EventHandled::Yes);
        }

        let (prefix, knowledge_dir) = {
            let cfg = ctx.cfg.read().await;
            (cfg.general.command_prefix.clone(), cfg.knowledge_dir()?)
        };
        let author_id = msg.author.id.to_string();
        let caller = Caller {
            id: &author_id,
            bot_owner: msg.is_from_owner(ctx).await,
        };
        let response = match AdminCommand::parse(args) {
            Ok(cmd) => {
                log_internal!("{} ran {:?}", msg.author.color(), cmd);
                ctx.services
                    .admin
                    .execute(cmd, &guild_id.to_string(), caller, &knowledge_dir)
                    .await
                    .unwrap_or_else(|e| format!("Command failed: {}", e))
            }
            Err(e) => format!("{}\nUsage: `{}{}`", e, prefix, USAGE),
        };

        msg.reply(ctx.cache_http, response).await?;
        Ok(EventHandled::Yes)
    }
}
