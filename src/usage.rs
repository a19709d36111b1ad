//! Monthly message quotas by subscription tier.

use anyhow::Result;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Pro,
}

impl std::str::FromStr for Tier {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "pro" => Ok(Tier::Pro),
            other => Err(anyhow::anyhow!("Unknown tier `{}`", other)),
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
        })
    }
}

/// Monthly message allowance per tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TierLimits {
    #[serde(default = "default_free_limit")]
    pub free_monthly_limit: u32,
    #[serde(default = "default_pro_limit")]
    pub pro_monthly_limit: u32,
}

fn default_free_limit() -> u32 {
    100
}

fn default_pro_limit() -> u32 {
    1000
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            free_monthly_limit: default_free_limit(),
            pro_monthly_limit: default_pro_limit(),
        }
    }
}

impl TierLimits {
    pub fn monthly_limit(&self, tier: Tier) -> u32 {
        match tier {
            Tier::Free => self.free_monthly_limit,
            Tier::Pro => self.pro_monthly_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub allowed: bool,
    pub current: u32,
    pub limit: u32,
}

impl Quota {
    pub fn new(current: u32, limit: u32) -> Self {
        Self {
            allowed: current < limit,
            current,
            limit,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.current)
    }
}

/// Usage period a timestamp falls in, e.g. `2026-10`.  Counters under an older key are simply no
/// longer read.
pub fn month_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// Per-subject message accounting.  A subject is a user id.
#[serenity::async_trait]
pub trait UsageStore: Send + Sync {
    async fn check_quota(&self, subject_id: &str) -> Result<Quota>;
    /// Check the quota and, when allowed, count one message in the same step, so concurrent
    /// messages from one subject can never overrun the limit.  Returns the quota as it stood
    /// before the reservation.
    async fn try_reserve(&self, subject_id: &str) -> Result<Quota>;
    /// Give back a reservation whose message went unanswered.
    async fn release(&self, subject_id: &str) -> Result<()>;
    async fn tier(&self, subject_id: &str) -> Result<Tier>;
    async fn set_tier(&self, subject_id: &str, tier: Tier) -> Result<()>;
}
