use crate::{answer::AnswerSettings, event::*, helper::MessageHelper, log_internal, plugin::*};
use anyhow::Result;

pub struct Reload;

#[serenity::async_trait]
impl Plugin for Reload {
    fn name(&self) -> &'static str {
        "reload"
    }

    async fn usage(&self, ctx: &Context) -> Option<String> {
        let prefix = &ctx.cfg.read().await.general.command_prefix;
        Some(format!(
            "{}{} - reload config (bot owner only; the token, worker_concurrency, knowledge_dir \
             and [llm] settings other than daily_limit, timeout_ms and queue_wait_ms need a \
             restart)",
            prefix,
            self.name()
        ))
    }

    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled> {
        let Some((msg, _)) = event.is_bot_cmd(ctx, self.name()).await else {
            return Ok(EventHandled::No);
        };

        if !msg.is_from_owner(ctx).await {
            msg.reply(ctx.cache_http, "Only bot owners can reload the configuration")
                .await?;
            return Ok(EventHandled::Yes);
        }

        let reloaded = ctx.cfg.write().await.reload().await;
        let response = match reloaded {
            Ok(()) => {
                // Tunables that live outside the config lock
                let cfg = ctx.cfg.read().await;
                let pipeline = &ctx.services.pipeline;
                pipeline.search().set_threshold(cfg.search.score_threshold);
                pipeline.misses().set_threshold(cfg.misses.threshold);
                pipeline
                    .answers()
                    .update_settings(AnswerSettings::from_config(&cfg.llm));
                ctx.services.state.set_limits(cfg.usage);
                log_internal!("Configuration reloaded");
                "Configuration reloaded successfully. Changes to the token, worker_concurrency, \
                 knowledge_dir and [llm] settings other than daily_limit, timeout_ms and \
                 queue_wait_ms apply after a restart."
                    .to_owned()
            }
            Err(e) => format!("Could not reload configuration: {}", e),
        };

        msg.reply(ctx.cache_http, response).await?;
        Ok(EventHandled::Yes)
    }
}
