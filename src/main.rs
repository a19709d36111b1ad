mod admin;
mod answer;
mod config;
mod context;
mod event;
mod handler;
mod helper;
mod knowledge;
mod logging;
mod misses;
mod model;
mod pipeline;
mod plugin;
mod scorer;
mod search;
mod spam;
mod store;
mod tokenizer;
mod usage;

use crate::{
    admin::Admin,
    answer::{AnswerService, AnswerSettings},
    context::Services,
    helper::DirectMessenger,
    knowledge::MemoryKnowledgeStore,
    misses::MissTracker,
    model::{ChatClient, LlmSettings},
    pipeline::Pipeline,
    search::KnowledgeSearch,
    spam::SpamDetector,
    store::StateStore,
};
use serenity::{
    all::{GatewayIntents, Http},
    Client,
};
use std::{sync::Arc, time::Duration};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = crate::config::Config::load().await?;
    let token = cfg.general.discord_token.clone();

    let state = Arc::new(StateStore::load(cfg.usage).await?);

    let knowledge = Arc::new(MemoryKnowledgeStore::new());
    let knowledge_dir = cfg.knowledge_dir()?;
    let servers = knowledge.load_dir(&knowledge_dir).await?;
    log_internal!(
        "Loaded knowledge for {} server(s) from `{}`",
        servers,
        knowledge_dir.to_string_lossy()
    );

    let model = Arc::new(ChatClient::new(LlmSettings::from_config(&cfg.llm)));
    let answers = Arc::new(AnswerService::new(
        model,
        state.clone(),
        AnswerSettings::from_config(&cfg.llm),
    ));
    answers
        .clone()
        .spawn_sweeper(Duration::from_secs(cfg.llm.sweep_interval_secs.max(1)));

    let search = Arc::new(KnowledgeSearch::new(
        knowledge.clone(),
        cfg.search.score_threshold,
    ));
    let misses = Arc::new(MissTracker::new(cfg.misses.threshold));
    let notifier = Arc::new(DirectMessenger::new(Arc::new(Http::new(&token))));

    let pipeline = Pipeline::new(
        search,
        answers.clone(),
        misses.clone(),
        state.clone(),
        state.clone(),
        notifier,
        cfg.general.owner_contact.clone(),
        cfg.search.result_limit,
    );
    let admin = Admin {
        servers: state.clone(),
        usage: state.clone(),
        knowledge,
        answers,
        misses,
    };
    let services = Services {
        pipeline,
        admin,
        spam: SpamDetector::new()?,
        state,
    };
    let handler = handler::Handler::new(cfg, services);

    // Things we want discord to tell us about.
    let intents = GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    Client::builder(&token, intents)
        .event_handler(handler)
        .await?
        .start()
        .await
        .map_err(Into::into)
}
