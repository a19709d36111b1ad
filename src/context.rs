use crate::{
    admin::Admin, config::Config, pipeline::Pipeline, spam::SpamDetector, store::StateStore,
};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Long-lived services built once at startup
pub struct Services {
    pub pipeline: Pipeline,
    pub admin: Admin,
    pub spam: SpamDetector,
    pub state: Arc<StateStore>,
}

/// Collection of data that is shared across events
pub struct Context<'a> {
    // Bot's own context types
    pub cfg: &'a RwLock<Config>,
    pub services: &'a Services,
    // Discord/Serenity context types
    pub cache: &'a Arc<serenity::all::Cache>,
    pub http: &'a Arc<serenity::all::Http>,
    pub cache_http: &'a CacheHttp,
}

/// Many Serenity functions take a `impl CacheHttp` in order to first check the cache if the item
/// is available and fall back to an http request otherwise.  The most readily available type that
/// impl's this is named very differently in a way that could be confusing, and so we alias it.
pub type CacheHttp = serenity::all::Context;
