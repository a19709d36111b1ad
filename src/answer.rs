//! Generated answers grounded in knowledge base matches.
//!
//! Model calls are budgeted per UTC day.  A call takes its slot before it starts and hands it
//! back if it never completes, so concurrent callers cannot overdraw the budget.  While the
//! budget lasts every call races a timer; the templated answer built from the best match stands
//! in whenever the model errors, loses the race, or has no budget left.  Requests over budget wait in a FIFO queue for a bounded time,
//! during which a periodic sweep may serve them once the budget reopens.

use crate::{
    config, log_error, log_internal, log_warn, model::ModelClient, search::SearchResult,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::{
    collections::VecDeque,
    fmt::Write,
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};
use tokio::{sync::oneshot, task::JoinHandle};

/// The model is told to answer with this phrase when the entries don't cover the question.
pub const REFUSAL_PHRASE: &str = "I don't have enough information";

/// Reply when there is nothing to ground an answer in.
pub const NO_KNOWLEDGE_REPLY: &str = "I couldn't find relevant information in my knowledge base \
                                      to answer your question. Please try rephrasing or ask \
                                      something else.";

/// Discord's message length ceiling, in characters.
pub const MESSAGE_LIMIT: usize = 2000;

const TRUNCATION_MARKER: &str = "...";

/// Remaining daily budget at or under which each admission logs a warning.
const LOW_BUDGET_WARNING: u32 = 50;

/// Daily count of model calls, keyed by period.
#[serenity::async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn get(&self, period_key: &str) -> Result<u32>;
    /// Take one call from the period if fewer than `limit` were taken, checking and counting in
    /// one step.  Returns the new count, or `None` when the budget is spent.
    async fn try_acquire(&self, period_key: &str, limit: u32) -> Result<Option<u32>>;
    /// Hand back a call that never completed.
    async fn release(&self, period_key: &str) -> Result<()>;
}

/// Rate-limit period a timestamp falls in, e.g. `2026-10-19`.
pub fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

#[derive(Debug, Clone)]
pub struct AnswerSettings {
    pub daily_limit: u32,
    /// Default bound on one model call
    pub timeout: Duration,
    /// How long an over-budget request waits in the queue
    pub queue_wait: Duration,
}

/// Result of asking the budget for one model call
enum Admission {
    /// Slot taken under this period key
    Granted(String),
    /// Counter unreachable; the call goes ahead uncounted
    Unmetered,
    Denied,
}

impl AnswerSettings {
    pub fn from_config(llm: &config::Llm) -> Self {
        Self {
            daily_limit: llm.daily_limit,
            timeout: Duration::from_millis(llm.timeout_ms),
            queue_wait: Duration::from_millis(llm.queue_wait_ms),
        }
    }
}

struct QueuedRequest {
    query: String,
    matches: Vec<SearchResult>,
    timeout: Duration,
    /// Dropped receiver means the waiter already fell back
    responder: oneshot::Sender<String>,
}

pub struct AnswerService {
    model: Arc<dyn ModelClient>,
    rate_limits: Arc<dyn RateLimitStore>,
    settings: RwLock<AnswerSettings>,
    queue: Mutex<VecDeque<QueuedRequest>>,
}

impl AnswerService {
    pub fn new(
        model: Arc<dyn ModelClient>,
        rate_limits: Arc<dyn RateLimitStore>,
        settings: AnswerSettings,
    ) -> Self {
        Self {
            model,
            rate_limits,
            settings: RwLock::new(settings),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn settings(&self) -> AnswerSettings {
        self.settings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// New settings apply from the next admission; calls already running keep their timeout.
    pub fn update_settings(&self, settings: AnswerSettings) {
        *self
            .settings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = settings;
    }

    pub fn default_timeout(&self) -> Duration {
        self.settings().timeout
    }

    /// Answer `query` from `matches` (best first).  Never fails: every failure becomes a
    /// templated answer.
    pub async fn generate_response(
        &self,
        query: &str,
        matches: &[SearchResult],
        timeout: Duration,
    ) -> String {
        if matches.is_empty() {
            return NO_KNOWLEDGE_REPLY.to_owned();
        }

        let admission = self.admit().await;
        if let Admission::Denied = admission {
            log_warn!("Daily model budget spent, queueing request");
            return self.enqueue(query, matches, timeout).await;
        }

        match self.call_model(query, matches, timeout).await {
            Some(answer) => answer,
            None => {
                self.refund(&admission).await;
                fallback_answer(matches)
            }
        }
    }

    /// Serve queued requests in arrival order while budget lasts.  Requests whose waiter already
    /// gave up are dropped without calling the model.
    pub async fn process_queue(&self) {
        loop {
            let has_live_request = {
                let mut queue = self.lock_queue();
                while queue.front().is_some_and(|r| r.responder.is_closed()) {
                    queue.pop_front();
                }
                !queue.is_empty()
            };
            if !has_live_request {
                break;
            }

            let admission = self.admit().await;
            if let Admission::Denied = admission {
                log_internal!("Still over the daily model budget, leaving queue for later");
                break;
            }

            let next = self.lock_queue().pop_front();
            let Some(request) = next else {
                self.refund(&admission).await;
                break;
            };
            if request.responder.is_closed() {
                self.refund(&admission).await;
                continue;
            }

            match self
                .call_model(&request.query, &request.matches, request.timeout)
                .await
            {
                Some(answer) => {
                    // The waiter may have timed out during the call; it already has its fallback.
                    if request.responder.send(answer).is_err() {
                        log_internal!("Queued request abandoned during the model call");
                        self.refund(&admission).await;
                    }
                }
                None => {
                    self.refund(&admission).await;
                    let _ = request.responder.send(fallback_answer(&request.matches));
                }
            }
        }
    }

    /// Run [`Self::process_queue`] every `period` until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                self.process_queue().await;
            }
        })
    }

    pub fn queue_len(&self) -> usize {
        self.lock_queue().len()
    }

    /// Model calls left today.  An unreadable counter reports the full budget.
    pub async fn remaining_requests(&self) -> u32 {
        let key = day_key(Utc::now());
        let daily_limit = self.settings().daily_limit;
        match self.rate_limits.get(&key).await {
            Ok(count) => daily_limit.saturating_sub(count),
            Err(e) => {
                log_error!("Could not read model budget for {}: {}", key, e);
                daily_limit
            }
        }
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<QueuedRequest>> {
        // Entries are pushed and popped whole, so a poisoned queue is still consistent.
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take one slot of today's budget.  Fails open: an unreachable counter should not silence
    /// every answer.
    async fn admit(&self) -> Admission {
        let key = day_key(Utc::now());
        let daily_limit = self.settings().daily_limit;
        match self.rate_limits.try_acquire(&key, daily_limit).await {
            Ok(Some(count)) => {
                let remaining = daily_limit.saturating_sub(count);
                if remaining <= LOW_BUDGET_WARNING {
                    log_warn!("Model budget low: {} calls remaining today", remaining);
                }
                Admission::Granted(key)
            }
            Ok(None) => Admission::Denied,
            Err(e) => {
                log_error!("Could not reach model budget for {}, allowing call: {}", key, e);
                Admission::Unmetered
            }
        }
    }

    /// Give back a slot whose call produced nothing the user will see.
    async fn refund(&self, admission: &Admission) {
        let Admission::Granted(key) = admission else {
            return;
        };
        if let Err(e) = self.rate_limits.release(key).await {
            log_error!("Could not return model budget slot for {}: {}", key, e);
        }
    }

    /// One model call raced against `timeout`.  A call that loses the race is dropped.
    async fn call_model(
        &self,
        query: &str,
        matches: &[SearchResult],
        timeout: Duration,
    ) -> Option<String> {
        let prompt = build_prompt(query, matches);
        let text = match tokio::time::timeout(timeout, self.model.complete(&prompt)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                log_error!("Model call failed, using knowledge base answer: {}", e);
                return None;
            }
            Err(_) => {
                log_warn!(
                    "Model call timed out after {}ms, using knowledge base answer",
                    timeout.as_millis()
                );
                return None;
            }
        };

        Some(sanitize_for_discord(&text))
    }

    async fn enqueue(&self, query: &str, matches: &[SearchResult], timeout: Duration) -> String {
        let (responder, response) = oneshot::channel();
        let queue_len = {
            let mut queue = self.lock_queue();
            queue.push_back(QueuedRequest {
                query: query.to_owned(),
                matches: matches.to_vec(),
                timeout,
                responder,
            });
            queue.len()
        };
        log_internal!("Request queued. Queue size: {}", queue_len);

        let queue_wait = self.settings().queue_wait;
        match tokio::time::timeout(queue_wait, response).await {
            Ok(Ok(answer)) => answer,
            _ => {
                log_warn!(
                    "Queued request not served within {}ms, using knowledge base answer",
                    queue_wait.as_millis()
                );
                fallback_answer(matches)
            }
        }
    }
}

/// Instructions plus the numbered entries the model may draw on.
pub fn build_prompt(query: &str, matches: &[SearchResult]) -> String {
    let context = matches
        .iter()
        .enumerate()
        .map(|(i, m)| format!("[{}] Q: {}\nA: {}", i + 1, m.entry.question, m.entry.answer))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are a helpful assistant answering questions based on a knowledge base. Follow these \
         rules strictly:\n\
         1. Answer the question concisely (2-3 sentences max) using ONLY information from the \
         provided KB entries below.\n\
         2. If the KB entries don't contain enough information to answer the question, say \
         \"{} about that in my knowledge base.\"\n\
         3. Do NOT make up or infer information that isn't explicitly in the KB entries.\n\
         4. Cite the KB entry numbers in your response (e.g., [1], [2]).\n\
         5. Be direct and helpful.\n\
         \n\
         Question: {}\n\
         \n\
         Knowledge Base Entries:\n\
         {}\n\
         \n\
         Answer:",
        REFUSAL_PHRASE,
        query,
        context
    )
}

/// Best match's stored answer with a reference list.
pub fn fallback_answer(matches: &[SearchResult]) -> String {
    let Some(top) = matches.first() else {
        return NO_KNOWLEDGE_REPLY.to_owned();
    };

    let mut answer = format!(
        "Based on my knowledge base [1]:\n\n{}\n\n\n**References:**",
        top.entry.answer
    );
    for (i, m) in matches.iter().enumerate() {
        let _ = write!(
            answer,
            "\n[{}] {} (confidence: {:.1}%)",
            i + 1,
            m.entry.question,
            m.score * 100.0
        );
    }
    truncate_for_discord(answer.trim())
}

/// Neutralize code fences the model echoes back and fit Discord's length limit.
pub fn sanitize_for_discord(text: &str) -> String {
    let escaped = text.replace("```", "\\`\\`\\`");
    truncate_for_discord(&escaped).trim().to_owned()
}

fn truncate_for_discord(text: &str) -> String {
    if text.chars().count() <= MESSAGE_LIMIT {
        return text.to_owned();
    }
    let keep = MESSAGE_LIMIT - TRUNCATION_MARKER.len();
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}
