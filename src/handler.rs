use crate::{
    config::Config,
    context::{Context, Services},
    event::Event,
    log_error,
};
use serenity::all::{Message, Ready};
use tokio::sync::{RwLock, Semaphore};

/// Discord event handler
pub struct Handler {
    cfg: RwLock<Config>,
    services: Services,
    /// Bounds how many messages are processed at once.  Waiters are served in arrival order.
    workers: Semaphore,
}

impl<'a> Handler {
    pub fn new(cfg: Config, services: Services) -> Self {
        let workers = Semaphore::new(cfg.general.worker_concurrency.max(1));
        Self {
            cfg: RwLock::new(cfg),
            services,
            workers,
        }
    }

    fn ctx(&'a self, discord_ctx: &'a serenity::all::Context) -> Context<'a> {
        Context {
            cfg: &self.cfg,
            services: &self.services,
            cache: &discord_ctx.cache,
            http: &discord_ctx.http,
            cache_http: discord_ctx,
        }
    }
}

#[serenity::async_trait]
impl serenity::all::EventHandler for Handler {
    async fn ready(&self, discord_ctx: serenity::all::Context, ready: Ready) {
        Event::Ready(ready).handle(self.ctx(&discord_ctx)).await;
    }

    async fn message(&self, discord_ctx: serenity::all::Context, msg: Message) {
        let _permit = match self.workers.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                log_error!("Worker pool closed: {}", e);
                return;
            }
        };
        Event::Message(msg).handle(self.ctx(&discord_ctx)).await;
    }
}
