use crate::{
    config::ServerConfigStore, event::*, log_error, log_warn, logging::*, plugin::*,
};
use anyhow::Result;

/// Removes spam in servers that turned the filter on
pub struct SpamGuard;

#[serenity::async_trait]
impl Plugin for SpamGuard {
    fn name(&self) -> &'static str {
        "spam_guard"
    }

    async fn usage(&self, _ctx: &Context) -> Option<String> {
        None
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        let Event::Message(msg) = event else {
            return Ok(EventHandled::No);
        };
        let Some(guild_id) = msg.guild_id else {
            return Ok(EventHandled::No);
        };

        let config = ctx
            .services
            .state
            .server_config(&guild_id.to_string())
            .await?;
        if !config.spam_filter {
            return Ok(EventHandled::No);
        }
        let Some(reason) = ctx.services.spam.check(&msg.content) else {
            return Ok(EventHandled::No);
        };

        log_warn!("Spam from {}: {}", msg.author.color(), reason);
        if let Err(e) = msg.delete(ctx.cache_http).await {
            log_error!("Could not delete spam from {}: {}", msg.author.color(), e);
        }
        msg.channel_id
            .say(
                ctx.cache_http,
                format!("<@{}>, your message was removed: {}", msg.author.id, reason),
            )
            .await?;
        Ok(EventHandled::Yes)
    }
}
