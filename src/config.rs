use crate::usage::TierLimits;
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

const CONFIG_DIR_REL_HOME: &str = ".config/supportbot";
const CONFIG_FILE: &str = "config.toml";

/// Bot configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Config {
    pub general: General,
    #[serde(default)]
    pub search: Search,
    pub llm: Llm,
    #[serde(default)]
    pub misses: Misses,
    #[serde(default)]
    pub usage: TierLimits,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct General {
    pub discord_token: String,
    /// Global user names allowed to run owner-only commands
    #[serde(default)]
    pub bot_owners: Vec<String>,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// User id escalations go to when a server has no contact of its own
    #[serde(default)]
    pub owner_contact: Option<String>,
    /// Messages processed at once; the rest wait their turn
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Search {
    /// Candidates scoring below this are never returned
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,
    /// Directory of `<server-id>.json` knowledge files
    #[serde(default)]
    pub knowledge_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Llm {
    pub chat_url: String,
    pub model_name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_context_size")]
    pub context_size: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Model calls allowed per UTC day
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    /// How long a rate-limited request waits for the queue sweep before falling back
    #[serde(default = "default_queue_wait_ms")]
    pub queue_wait_ms: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Misses {
    /// Consecutive misses before the owner contact is notified
    #[serde(default = "default_miss_threshold")]
    pub threshold: u32,
}

fn default_command_prefix() -> String {
    ";".to_owned()
}

fn default_worker_concurrency() -> usize {
    5
}

fn default_score_threshold() -> f64 {
    0.3
}

fn default_result_limit() -> usize {
    crate::search::DEFAULT_RESULT_LIMIT
}

fn default_temperature() -> f32 {
    0.3
}

fn default_context_size() -> usize {
    4096
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_daily_limit() -> u32 {
    500
}

fn default_queue_wait_ms() -> u64 {
    10_000
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_miss_threshold() -> u32 {
    3
}

impl Default for Search {
    fn default() -> Self {
        Self {
            score_threshold: default_score_threshold(),
            result_limit: default_result_limit(),
            knowledge_dir: None,
        }
    }
}

impl Default for Misses {
    fn default() -> Self {
        Self {
            threshold: default_miss_threshold(),
        }
    }
}

/// `~/.config/supportbot`
pub fn config_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(CONFIG_DIR_REL_HOME))
        .ok_or(anyhow!("Could not find home directory"))
}

impl Config {
    fn config_path() -> Result<PathBuf> {
        config_dir().map(|p| p.join(CONFIG_FILE))
    }

    pub async fn load() -> Result<Self> {
        let path = Self::config_path()?;

        let mut file = tokio::fs::File::open(&path).await.map_err(|e| {
            anyhow!(
                "Could not open configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        let mut contents = String::new();
        file.read_to_string(&mut contents).await.map_err(|e| {
            anyhow!(
                "Could not read configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })?;

        Self::parse(&contents).map_err(|e| {
            anyhow!(
                "Could not parse configuration at `{}`: {}",
                path.to_string_lossy(),
                e
            )
        })
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub async fn reload(&mut self) -> Result<()> {
        let new = Self::load().await?;
        *self = new;
        Ok(())
    }

    pub fn knowledge_dir(&self) -> Result<PathBuf> {
        match &self.search.knowledge_dir {
            Some(dir) => Ok(dir.clone()),
            None => config_dir().map(|p| p.join("knowledge")),
        }
    }
}

/// Per-server settings.  A server that never changed anything gets [`ServerConfig::default`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub ai_enabled: bool,
    /// Empty means every channel
    #[serde(default)]
    pub allowed_channels: Vec<String>,
    /// Best match must score at least this before a generated answer is attempted
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// User id notified about repeated misses
    #[serde(default)]
    pub owner_contact: Option<String>,
    #[serde(default)]
    pub spam_filter: bool,
}

fn default_true() -> bool {
    true
}

fn default_confidence_threshold() -> f64 {
    0.7
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ai_enabled: true,
            allowed_channels: Vec::new(),
            confidence_threshold: default_confidence_threshold(),
            owner_contact: None,
            spam_filter: false,
        }
    }
}

/// Partial change to a [`ServerConfig`].  `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct ServerConfigUpdate {
    pub ai_enabled: Option<bool>,
    pub add_channel: Option<String>,
    pub remove_channel: Option<String>,
    pub confidence_threshold: Option<f64>,
    /// `Some(None)` clears the contact
    pub owner_contact: Option<Option<String>>,
    pub spam_filter: Option<bool>,
}

impl ServerConfig {
    pub fn apply(mut self, update: ServerConfigUpdate) -> Self {
        if let Some(enabled) = update.ai_enabled {
            self.ai_enabled = enabled;
        }
        if let Some(channel) = update.add_channel {
            if !self.allowed_channels.contains(&channel) {
                self.allowed_channels.push(channel);
            }
        }
        if let Some(channel) = update.remove_channel {
            self.allowed_channels.retain(|c| *c != channel);
        }
        if let Some(threshold) = update.confidence_threshold {
            self.confidence_threshold = threshold.clamp(0.0, 1.0);
        }
        if let Some(contact) = update.owner_contact {
            self.owner_contact = contact;
        }
        if let Some(spam_filter) = update.spam_filter {
            self.spam_filter = spam_filter;
        }
        self
    }

    pub fn channel_allowed(&self, channel_id: &str) -> bool {
        self.allowed_channels.is_empty() || self.allowed_channels.iter().any(|c| c == channel_id)
    }
}

#[serenity::async_trait]
pub trait ServerConfigStore: Send + Sync {
    async fn server_config(&self, server_id: &str) -> Result<ServerConfig>;
    async fn update_server_config(
        &self,
        server_id: &str,
        update: ServerConfigUpdate,
    ) -> Result<ServerConfig>;
}
