use crate::{
    config::ServerConfigStore,
    event::*,
    helper::{MessageHelper, MessageReply},
    log_internal,
    logging::*,
    pipeline::Outcome,
    plugin::*,
};
use anyhow::Result;

/// Answers questions from the server's knowledge base
pub struct Answer;

#[serenity::async_trait]
impl Plugin for Answer {
    fn name(&self) -> &'static str {
        "answer"
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

        // Unknown commands are not questions
        let prefix = ctx.cfg.read().await.general.command_prefix.clone();
        if msg.content.trim_start().starts_with(prefix.as_str()) {
            return Ok(EventHandled::No);
        }

        // Only show typing where an answer may follow
        let config = ctx
            .services
            .state
            .server_config(&guild_id.to_string())
            .await?;
        if !config.ai_enabled || !config.channel_allowed(&msg.channel_id.to_string()) {
            return Ok(EventHandled::No);
        }

        let typing = msg.channel_id.start_typing(ctx.http);
        let inbound = msg.to_inbound(ctx).await;
        let reply = MessageReply {
            cache_http: ctx.cache_http,
            msg,
        };
        let outcome = ctx.services.pipeline.handle(&inbound, &reply).await;
        typing.stop();

        log_internal!("{} -> {:?}", msg.author.color(), outcome);
        match outcome {
            Outcome::Ignored => Ok(EventHandled::No),
            _ => Ok(EventHandled::Yes),
        }
    }
}
