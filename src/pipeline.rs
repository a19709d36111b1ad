//! Turns one chat message into at most one reply.
//!
//! Everything below this point absorbs its own failures; whatever still escapes is reported to
//! the user as a single generic error reply.

use crate::{
    answer::{AnswerService, REFUSAL_PHRASE},
    config::{ServerConfig, ServerConfigStore},
    log_error, log_internal,
    misses::{MissContext, MissTracker, Notifier},
    search::KnowledgeSearch,
    usage::UsageStore,
};
use anyhow::Result;
use std::sync::Arc;

pub const LIMIT_REACHED_REPLY: &str =
    "You have reached your monthly message limit. Please upgrade to continue using the bot.";

pub const NO_MATCH_REPLY: &str = "I couldn't find relevant information in my knowledge base to \
                                  answer your question. Please try rephrasing or contact support \
                                  for help.";

pub const ERROR_REPLY: &str =
    "Sorry, I encountered an error while processing your question. Please try again.";

pub fn low_confidence_reply(score: f64) -> String {
    format!(
        "I found some potentially relevant information, but I'm not confident enough ({:.1}% \
         confidence) to provide an accurate answer. Please try rephrasing your question or \
         contact support.",
        score * 100.0
    )
}

/// Sends a reply to the message being handled.
#[serenity::async_trait]
pub trait ReplySink: Send + Sync {
    async fn reply(&self, text: &str) -> Result<()>;
}

/// The parts of a chat message the pipeline looks at.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub author_id: String,
    pub author_tag: String,
    pub author_is_bot: bool,
    /// `None` for direct messages
    pub server_id: Option<String>,
    pub server_name: String,
    pub channel_id: String,
    pub channel_name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Not for us; nothing was sent
    Ignored,
    LimitReached,
    NoMatch,
    LowConfidence(f64),
    Answered,
    /// The generic error reply was sent (or attempted)
    Failed,
}

pub struct Pipeline {
    search: Arc<KnowledgeSearch>,
    answers: Arc<AnswerService>,
    misses: Arc<MissTracker>,
    usage: Arc<dyn UsageStore>,
    servers: Arc<dyn ServerConfigStore>,
    notifier: Arc<dyn Notifier>,
    /// Escalation contact for servers without their own
    default_owner_contact: Option<String>,
    result_limit: usize,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        search: Arc<KnowledgeSearch>,
        answers: Arc<AnswerService>,
        misses: Arc<MissTracker>,
        usage: Arc<dyn UsageStore>,
        servers: Arc<dyn ServerConfigStore>,
        notifier: Arc<dyn Notifier>,
        default_owner_contact: Option<String>,
        result_limit: usize,
    ) -> Self {
        Self {
            search,
            answers,
            misses,
            usage,
            servers,
            notifier,
            default_owner_contact,
            result_limit,
        }
    }

    pub fn answers(&self) -> &AnswerService {
        &self.answers
    }

    pub fn search(&self) -> &KnowledgeSearch {
        &self.search
    }

    pub fn misses(&self) -> &MissTracker {
        &self.misses
    }

    pub async fn handle(&self, msg: &InboundMessage, reply: &dyn ReplySink) -> Outcome {
        if msg.author_is_bot {
            return Outcome::Ignored;
        }
        let Some(server_id) = msg.server_id.as_deref() else {
            return Outcome::Ignored;
        };

        match self.process(msg, server_id, reply).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log_error!("Error processing query from {}: {}", msg.author_tag, e);
                if let Err(e) = reply.reply(ERROR_REPLY).await {
                    log_error!("Failed to send error reply: {}", e);
                }
                Outcome::Failed
            }
        }
    }

    async fn process(
        &self,
        msg: &InboundMessage,
        server_id: &str,
        reply: &dyn ReplySink,
    ) -> Result<Outcome> {
        let config = self.servers.server_config(server_id).await?;
        if !config.ai_enabled || !config.channel_allowed(&msg.channel_id) {
            return Ok(Outcome::Ignored);
        }

        let quota = self.usage.try_reserve(&msg.author_id).await?;
        if !quota.allowed {
            log_internal!(
                "{} is at their limit ({}/{})",
                msg.author_tag,
                quota.current,
                quota.limit
            );
            reply.reply(LIMIT_REACHED_REPLY).await?;
            return Ok(Outcome::LimitReached);
        }

        // The reserved message only stays counted once an answer was delivered.
        let outcome = self.respond(msg, server_id, &config, reply).await;
        if !matches!(outcome, Ok(Outcome::Answered)) {
            if let Err(e) = self.usage.release(&msg.author_id).await {
                log_error!("Could not return reserved usage for {}: {}", msg.author_tag, e);
            }
        }
        outcome
    }

    async fn respond(
        &self,
        msg: &InboundMessage,
        server_id: &str,
        config: &ServerConfig,
        reply: &dyn ReplySink,
    ) -> Result<Outcome> {
        let matches = self
            .search
            .search(&msg.content, server_id, self.result_limit)
            .await?;

        let Some(best) = matches.first() else {
            self.miss(msg, config, reply, NO_MATCH_REPLY).await?;
            return Ok(Outcome::NoMatch);
        };

        if best.score < config.confidence_threshold {
            let score = best.score;
            self.miss(msg, config, reply, &low_confidence_reply(score))
                .await?;
            return Ok(Outcome::LowConfidence(score));
        }

        let response = self
            .answers
            .generate_response(&msg.content, &matches, self.answers.default_timeout())
            .await;
        if response.contains(REFUSAL_PHRASE) {
            self.miss(msg, config, reply, NO_MATCH_REPLY).await?;
            return Ok(Outcome::NoMatch);
        }

        reply.reply(&response).await?;
        self.misses.reset_miss(&msg.author_id);
        Ok(Outcome::Answered)
    }

    /// Reply with `text`, then count the miss and escalate if due.  Nothing is counted when the
    /// reply fails.
    async fn miss(
        &self,
        msg: &InboundMessage,
        config: &ServerConfig,
        reply: &dyn ReplySink,
        text: &str,
    ) -> Result<()> {
        reply.reply(text).await?;

        self.misses.track_miss(&msg.author_id);
        let context = MissContext {
            user_tag: msg.author_tag.clone(),
            server_name: msg.server_name.clone(),
            channel_name: msg.channel_name.clone(),
            query: msg.content.clone(),
            owner_contact: config
                .owner_contact
                .clone()
                .or_else(|| self.default_owner_contact.clone()),
        };
        self.misses
            .check_and_notify_owner(&msg.author_id, &context, self.notifier.as_ref())
            .await;
        Ok(())
    }
}
