//! Consecutive unanswered questions per user, escalated to a human once they pile up.

use crate::{log_error, log_internal};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex, MutexGuard,
    },
};

/// Delivers a direct message to a user.
#[serenity::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &str, message: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissRecord {
    pub user_id: String,
    /// At least 1 while the record exists
    pub count: u32,
    pub last_miss_at: DateTime<Utc>,
    /// An escalation for this record is being delivered
    escalating: bool,
}

/// Where a miss happened, for the escalation notice.
#[derive(Debug, Clone)]
pub struct MissContext {
    pub user_tag: String,
    pub server_name: String,
    pub channel_name: String,
    pub query: String,
    /// Who gets notified.  `None` disables escalation.
    pub owner_contact: Option<String>,
}

pub struct MissTracker {
    records: Mutex<HashMap<String, MissRecord>>,
    threshold: AtomicU32,
}

impl MissTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            threshold: AtomicU32::new(threshold),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold.load(Ordering::Relaxed)
    }

    pub fn set_threshold(&self, threshold: u32) {
        self.threshold.store(threshold, Ordering::Relaxed);
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, MissRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record one more miss for `user_id`.  Returns the new count.
    pub fn track_miss(&self, user_id: &str) -> u32 {
        let now = Utc::now();
        let mut records = self.records();
        let record = records
            .entry(user_id.to_owned())
            .or_insert_with(|| MissRecord {
                user_id: user_id.to_owned(),
                count: 0,
                last_miss_at: now,
                escalating: false,
            });
        record.count += 1;
        record.last_miss_at = now;
        record.count
    }

    pub fn reset_miss(&self, user_id: &str) {
        self.records().remove(user_id);
    }

    pub fn miss_count(&self, user_id: &str) -> u32 {
        self.records().get(user_id).map(|r| r.count).unwrap_or(0)
    }

    pub fn record(&self, user_id: &str) -> Option<MissRecord> {
        self.records().get(user_id).cloned()
    }

    /// Notify the owner contact once `user_id` reaches the miss threshold.  A delivered notice
    /// resets the user; a failed one leaves the count so the next miss tries again.  Returns
    /// whether a notice was delivered.
    pub async fn check_and_notify_owner(
        &self,
        user_id: &str,
        context: &MissContext,
        notifier: &dyn Notifier,
    ) -> bool {
        let Some(owner) = context.owner_contact.as_deref() else {
            return false;
        };

        // Claim the escalation so concurrent misses from the same user send one notice.
        let count = {
            let mut records = self.records();
            match records.get_mut(user_id) {
                Some(record) if record.count >= self.threshold() && !record.escalating => {
                    record.escalating = true;
                    record.count
                }
                _ => return false,
            }
        };

        let notice = escalation_notice(user_id, context, count);
        match notifier.notify(owner, &notice).await {
            Ok(()) => {
                log_internal!("Notified {} about {} misses by {}", owner, count, context.user_tag);
                self.reset_miss(user_id);
                true
            }
            Err(e) => {
                log_error!("Failed to notify owner {}: {}", owner, e);
                if let Some(record) = self.records().get_mut(user_id) {
                    record.escalating = false;
                }
                false
            }
        }
    }
}

fn escalation_notice(user_id: &str, context: &MissContext, count: u32) -> String {
    format!(
        "**Repeated Knowledge Base Misses Alert**\n\n\
         User: {} ({})\n\
         Server: {}\n\
         Channel: {}\n\
         Miss Count: {}\n\
         Latest Query: \"{}\"\n\n\
         Consider reviewing the knowledge base to add this information.",
        context.user_tag, user_id, context.server_name, context.channel_name, count, context.query
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct FakeNotifier {
        sent: Mutex<Vec<(String, String)>>,
        failing: AtomicBool,
    }

    #[serenity::async_trait]
    impl Notifier for FakeNotifier {
        async fn notify(&self, recipient: &str, message: &str) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(anyhow!("user has DMs closed"));
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_owned(), message.to_owned()));
            Ok(())
        }
    }

    fn context(owner: Option<&str>) -> MissContext {
        MissContext {
            user_tag: "asker".to_owned(),
            server_name: "Support Server".to_owned(),
            channel_name: "#help".to_owned(),
            query: "where is the thing".to_owned(),
            owner_contact: owner.map(str::to_owned),
        }
    }

    #[test]
    fn misses_accumulate_and_reset() {
        let tracker = MissTracker::new(3);
        assert_eq!(tracker.miss_count("u"), 0);
        for expected in 1..=4 {
            assert_eq!(tracker.track_miss("u"), expected);
        }
        assert_eq!(tracker.miss_count("other"), 0);

        let record = tracker.record("u").unwrap();
        assert_eq!(record.user_id, "u");
        assert!(record.last_miss_at <= Utc::now());

        tracker.reset_miss("u");
        assert_eq!(tracker.miss_count("u"), 0);
        assert!(tracker.record("u").is_none());
        tracker.reset_miss("never-missed");
    }

    #[tokio::test]
    async fn escalates_once_at_threshold() {
        let tracker = MissTracker::new(3);
        let notifier = FakeNotifier::default();
        let ctx = context(Some("owner"));

        for _ in 0..2 {
            tracker.track_miss("u");
            assert!(!tracker.check_and_notify_owner("u", &ctx, &notifier).await);
        }
        assert!(notifier.sent.lock().unwrap().is_empty());

        tracker.track_miss("u");
        assert!(tracker.check_and_notify_owner("u", &ctx, &notifier).await);
        assert_eq!(tracker.miss_count("u"), 0);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "owner");
        assert!(sent[0].1.contains("User: asker (u)"));
        assert!(sent[0].1.contains("Server: Support Server"));
        assert!(sent[0].1.contains("Channel: #help"));
        assert!(sent[0].1.contains("Miss Count: 3"));
        assert!(sent[0].1.contains("Latest Query: \"where is the thing\""));
    }

    #[tokio::test]
    async fn failed_delivery_keeps_count_and_retries() {
        let tracker = MissTracker::new(2);
        let notifier = FakeNotifier::default();
        notifier.failing.store(true, Ordering::SeqCst);
        let ctx = context(Some("owner"));

        tracker.track_miss("u");
        tracker.track_miss("u");
        assert!(!tracker.check_and_notify_owner("u", &ctx, &notifier).await);
        assert_eq!(tracker.miss_count("u"), 2);

        notifier.failing.store(false, Ordering::SeqCst);
        tracker.track_miss("u");
        assert!(tracker.check_and_notify_owner("u", &ctx, &notifier).await);
        assert_eq!(notifier.sent.lock().unwrap().len(), 1);
        assert!(notifier.sent.lock().unwrap()[0].1.contains("Miss Count: 3"));
    }

    #[tokio::test]
    async fn no_contact_means_no_escalation() {
        let tracker = MissTracker::new(1);
        let notifier = FakeNotifier::default();
        tracker.track_miss("u");
        assert!(!tracker.check_and_notify_owner("u", &context(None), &notifier).await);
        assert_eq!(tracker.miss_count("u"), 1);
    }

    #[tokio::test]
    async fn threshold_is_adjustable() {
        let tracker = MissTracker::new(5);
        let notifier = FakeNotifier::default();
        tracker.track_miss("u");
        tracker.set_threshold(1);
        assert_eq!(tracker.threshold(), 1);
        assert!(tracker.check_and_notify_owner("u", &context(Some("o")), &notifier).await);
    }
}
