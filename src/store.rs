//! Bot state that outlives a message: server settings, subscription tiers, usage counters and
//! the daily model budget.
//!
//! Kept in memory and, when the store has a path, written back to a TOML file after every
//! change.

use crate::{
    answer::RateLimitStore,
    config::{self, ServerConfig, ServerConfigStore, ServerConfigUpdate},
    usage::{month_key, Quota, Tier, TierLimits, UsageStore},
};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::{collections::HashMap, io::ErrorKind, path::PathBuf, sync::RwLock};
use tokio::sync::Mutex;

const STATE_FILE: &str = "state.toml";

/// State which persists across sessions
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct PersistentState {
    #[serde(default)]
    pub servers: HashMap<String, ServerConfig>,
    #[serde(default)]
    pub tiers: HashMap<String, Tier>,
    #[serde(default)]
    pub usage: HashMap<String, UsageRecord>,
    /// Model calls per day key
    #[serde(default)]
    pub model_calls: HashMap<String, u32>,
}

/// Messages a subject sent during `period`
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct UsageRecord {
    pub period: String,
    pub count: u32,
}

impl UsageRecord {
    /// Count within `period`; a record from an earlier period counts as zero.
    fn count_in(&self, period: &str) -> u32 {
        if self.period == period {
            self.count
        } else {
            0
        }
    }
}

pub struct StateStore {
    state: Mutex<PersistentState>,
    path: Option<PathBuf>,
    limits: RwLock<TierLimits>,
}

impl StateStore {
    /// Store that never touches disk
    pub fn in_memory(limits: TierLimits) -> Self {
        Self {
            state: Mutex::new(PersistentState::default()),
            path: None,
            limits: RwLock::new(limits),
        }
    }

    /// `~/.config/supportbot/state.toml`, or empty state if the file doesn't exist yet.
    pub async fn load(limits: TierLimits) -> Result<Self> {
        let path = config::config_dir()?.join(STATE_FILE);
        Self::load_from(path, limits).await
    }

    pub async fn load_from(path: PathBuf, limits: TierLimits) -> Result<Self> {
        let state = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => toml::from_str(&contents).map_err(|e| {
                anyhow!(
                    "Could not parse state at `{}`: {}",
                    path.to_string_lossy(),
                    e
                )
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => PersistentState::default(),
            Err(e) => {
                return Err(anyhow!(
                    "Could not read state at `{}`: {}",
                    path.to_string_lossy(),
                    e
                ))
            }
        };

        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
            limits: RwLock::new(limits),
        })
    }

    pub fn limits(&self) -> TierLimits {
        *self
            .limits
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// New tier limits apply from the next quota check.
    pub fn set_limits(&self, limits: TierLimits) {
        *self
            .limits
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = limits;
    }

    async fn save(&self, state: &PersistentState) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let state_str = toml::to_string_pretty(state)
            .map_err(|e| anyhow!("Could not serialize state: {}", e))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                anyhow!(
                    "Could not create directory `{}`: {}",
                    parent.to_string_lossy(),
                    e
                )
            })?;
        }

        // Write beside the target, then rename over it, so readers never see half a file.
        let tmp_path = path.with_extension("toml.new");

        tokio::fs::write(&tmp_path, state_str).await.map_err(|e| {
            anyhow!(
                "Could not write state to temporary file `{}`: {}",
                tmp_path.to_string_lossy(),
                e
            )
        })?;

        tokio::fs::rename(&tmp_path, path).await.map_err(|e| {
            anyhow!(
                "Could not rename temporary file `{}` to `{}`: {}",
                tmp_path.to_string_lossy(),
                path.to_string_lossy(),
                e
            )
        })?;

        Ok(())
    }

    fn quota_in(&self, state: &PersistentState, subject_id: &str, period: &str) -> Quota {
        let tier = state.tiers.get(subject_id).copied().unwrap_or_default();
        let current = state
            .usage
            .get(subject_id)
            .map(|r| r.count_in(period))
            .unwrap_or(0);
        Quota::new(current, self.limits().monthly_limit(tier))
    }

    pub async fn check_quota_at(&self, subject_id: &str, now: DateTime<Utc>) -> Quota {
        let state = self.state.lock().await;
        self.quota_in(&state, subject_id, &month_key(now))
    }

    /// Check and count under one lock, held across the write-back, so reservations of one
    /// subject never interleave.
    pub async fn reserve_at(&self, subject_id: &str, now: DateTime<Utc>) -> Result<Quota> {
        let period = month_key(now);
        let mut state = self.state.lock().await;
        let quota = self.quota_in(&state, subject_id, &period);
        if !quota.allowed {
            return Ok(quota);
        }

        let record = state
            .usage
            .entry(subject_id.to_owned())
            .or_insert_with(|| UsageRecord {
                period: period.clone(),
                count: 0,
            });
        if record.period != period {
            *record = UsageRecord { period, count: 0 };
        }
        record.count += 1;
        self.save(&state).await?;
        Ok(quota)
    }

    /// Undo one reservation in the period `now` falls in.  A reservation from an earlier period
    /// has already been forgotten.
    pub async fn release_at(&self, subject_id: &str, now: DateTime<Utc>) -> Result<()> {
        let period = month_key(now);
        let mut state = self.state.lock().await;
        match state.usage.get_mut(subject_id) {
            Some(record) if record.period == period && record.count > 0 => record.count -= 1,
            _ => return Ok(()),
        }
        self.save(&state).await
    }
}

#[serenity::async_trait]
impl UsageStore for StateStore {
    async fn check_quota(&self, subject_id: &str) -> Result<Quota> {
        Ok(self.check_quota_at(subject_id, Utc::now()).await)
    }

    async fn try_reserve(&self, subject_id: &str) -> Result<Quota> {
        self.reserve_at(subject_id, Utc::now()).await
    }

    async fn release(&self, subject_id: &str) -> Result<()> {
        self.release_at(subject_id, Utc::now()).await
    }

    async fn tier(&self, subject_id: &str) -> Result<Tier> {
        let state = self.state.lock().await;
        Ok(state.tiers.get(subject_id).copied().unwrap_or_default())
    }

    async fn set_tier(&self, subject_id: &str, tier: Tier) -> Result<()> {
        let mut state = self.state.lock().await;
        match tier {
            Tier::Free => state.tiers.remove(subject_id),
            Tier::Pro => state.tiers.insert(subject_id.to_owned(), tier),
        };
        self.save(&state).await
    }
}

#[serenity::async_trait]
impl RateLimitStore for StateStore {
    async fn get(&self, period_key: &str) -> Result<u32> {
        let state = self.state.lock().await;
        Ok(state.model_calls.get(period_key).copied().unwrap_or(0))
    }

    async fn try_acquire(&self, period_key: &str, limit: u32) -> Result<Option<u32>> {
        let mut state = self.state.lock().await;
        // Only the current day is ever read again.
        if !state.model_calls.contains_key(period_key) {
            state.model_calls.clear();
        }
        let count = state.model_calls.entry(period_key.to_owned()).or_insert(0);
        if *count >= limit {
            return Ok(None);
        }
        *count += 1;
        let count = *count;
        self.save(&state).await?;
        Ok(Some(count))
    }

    async fn release(&self, period_key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.model_calls.get_mut(period_key) {
            Some(count) if *count > 0 => *count -= 1,
            _ => return Ok(()),
        }
        self.save(&state).await
    }
}

#[serenity::async_trait]
impl ServerConfigStore for StateStore {
    async fn server_config(&self, server_id: &str) -> Result<ServerConfig> {
        let state = self.state.lock().await;
        Ok(state.servers.get(server_id).cloned().unwrap_or_default())
    }

    async fn update_server_config(
        &self,
        server_id: &str,
        update: ServerConfigUpdate,
    ) -> Result<ServerConfig> {
        let mut state = self.state.lock().await;
        let current = state.servers.get(server_id).cloned().unwrap_or_default();
        let updated = current.apply(update);
        state.servers.insert(server_id.to_owned(), updated.clone());
        self.save(&state).await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    fn store() -> StateStore {
        StateStore::in_memory(TierLimits {
            free_monthly_limit: 2,
            pro_monthly_limit: 5,
        })
    }

    #[tokio::test]
    async fn quota_fills_up_and_resets_next_month() {
        let store = store();
        let october = at(2026, 10, 19);
        assert_eq!(store.check_quota_at("u", october).await, Quota::new(0, 2));

        assert!(store.reserve_at("u", october).await.unwrap().allowed);
        assert!(store.reserve_at("u", october).await.unwrap().allowed);
        let full = store.reserve_at("u", october).await.unwrap();
        assert!(!full.allowed);
        assert_eq!((full.current, full.limit), (2, 2));
        assert_eq!(store.check_quota_at("u", october).await.current, 2);

        let november = at(2026, 11, 1);
        assert!(store.check_quota_at("u", november).await.allowed);
        assert_eq!(store.reserve_at("u", november).await.unwrap().current, 0);
        assert_eq!(store.check_quota_at("u", november).await.current, 1);
    }

    #[tokio::test]
    async fn released_reservation_frees_the_slot() {
        let store = store();
        let now = at(2026, 10, 19);
        store.reserve_at("u", now).await.unwrap();
        store.reserve_at("u", now).await.unwrap();
        store.release_at("u", now).await.unwrap();
        assert_eq!(store.check_quota_at("u", now).await.current, 1);
        assert!(store.reserve_at("u", now).await.unwrap().allowed);

        // Nothing to give back in a later month, or for someone who never sent anything.
        store.release_at("u", at(2026, 11, 2)).await.unwrap();
        store.release_at("nobody", now).await.unwrap();
        assert_eq!(store.check_quota_at("u", now).await.current, 2);
    }

    #[tokio::test]
    async fn limits_can_change_at_runtime() {
        let store = store();
        let now = at(2026, 10, 19);
        store.reserve_at("u", now).await.unwrap();
        store.reserve_at("u", now).await.unwrap();
        assert!(!store.check_quota_at("u", now).await.allowed);

        store.set_limits(TierLimits {
            free_monthly_limit: 3,
            pro_monthly_limit: 5,
        });
        assert_eq!(store.limits().free_monthly_limit, 3);
        assert!(store.reserve_at("u", now).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn pro_tier_raises_limit() {
        let store = store();
        store.set_tier("u", Tier::Pro).await.unwrap();
        assert_eq!(store.tier("u").await.unwrap(), Tier::Pro);
        assert_eq!(store.check_quota_at("u", at(2026, 1, 1)).await.limit, 5);

        store.set_tier("u", Tier::Free).await.unwrap();
        assert_eq!(store.tier("u").await.unwrap(), Tier::Free);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reservations_never_overrun_the_limit() {
        let store = Arc::new(StateStore::in_memory(TierLimits {
            free_monthly_limit: 20,
            pro_monthly_limit: 20,
        }));
        let now = at(2026, 10, 19);
        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.reserve_at("u", now).await.unwrap().allowed })
            })
            .collect();
        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap() {
                granted += 1;
            }
        }
        assert_eq!(granted, 20);
        assert_eq!(store.check_quota_at("u", now).await.current, 20);
    }

    #[tokio::test]
    async fn model_calls_roll_over_by_key() {
        let store = store();
        assert_eq!(RateLimitStore::get(&store, "2026-10-19").await.unwrap(), 0);
        assert_eq!(store.try_acquire("2026-10-19", 2).await.unwrap(), Some(1));
        assert_eq!(store.try_acquire("2026-10-19", 2).await.unwrap(), Some(2));
        assert_eq!(store.try_acquire("2026-10-19", 2).await.unwrap(), None);
        assert_eq!(RateLimitStore::get(&store, "2026-10-19").await.unwrap(), 2);

        RateLimitStore::release(&store, "2026-10-19").await.unwrap();
        assert_eq!(RateLimitStore::get(&store, "2026-10-19").await.unwrap(), 1);

        assert_eq!(store.try_acquire("2026-10-20", 2).await.unwrap(), Some(1));
        assert_eq!(RateLimitStore::get(&store, "2026-10-19").await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_model_slots_never_exceed_the_limit() {
        let store = Arc::new(store());
        let tasks: Vec<_> = (0..40)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.try_acquire("2026-10-19", 7).await.unwrap() })
            })
            .collect();
        let mut granted = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                granted += 1;
            }
        }
        assert_eq!(granted, 7);
        assert_eq!(RateLimitStore::get(store.as_ref(), "2026-10-19").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn server_config_defaults_and_updates() {
        let store = store();
        assert_eq!(store.server_config("g").await.unwrap(), ServerConfig::default());

        let updated = store
            .update_server_config(
                "g",
                ServerConfigUpdate {
                    ai_enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.ai_enabled);
        assert_eq!(store.server_config("g").await.unwrap(), updated);
        assert!(store.server_config("other").await.unwrap().ai_enabled);
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let path = std::env::temp_dir()
            .join(format!("supportbot-state-{}", std::process::id()))
            .join("state.toml");
        let limits = TierLimits::default();

        let store = StateStore::load_from(path.clone(), limits).await.unwrap();
        store.set_tier("u", Tier::Pro).await.unwrap();
        store
            .update_server_config(
                "g",
                ServerConfigUpdate {
                    owner_contact: Some(Some("42".to_owned())),
                    add_channel: Some("7".to_owned()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store.try_reserve("u").await.unwrap();
        store.try_acquire("2026-10-19", 10).await.unwrap();
        drop(store);

        let reloaded = StateStore::load_from(path.clone(), limits).await.unwrap();
        assert_eq!(reloaded.tier("u").await.unwrap(), Tier::Pro);
        let cfg = reloaded.server_config("g").await.unwrap();
        assert_eq!(cfg.owner_contact.as_deref(), Some("42"));
        assert_eq!(cfg.allowed_channels, vec!["7".to_owned()]);
        assert_eq!(reloaded.check_quota("u").await.unwrap().current, 1);
        assert_eq!(RateLimitStore::get(&reloaded, "2026-10-19").await.unwrap(), 1);

        if let Some(dir) = path.parent() {
            tokio::fs::remove_dir_all(dir).await.unwrap();
        }
    }
}
