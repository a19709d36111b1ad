//! `;kb` server administration commands.

use crate::{
    answer::AnswerService,
    config::{ServerConfigStore, ServerConfigUpdate},
    knowledge::MemoryKnowledgeStore,
    misses::MissTracker,
    usage::{Tier, UsageStore},
};
use anyhow::{anyhow, bail, Result};
use std::{path::Path, sync::Arc};

pub const USAGE: &str = "kb status | ai on|off | threshold <0..1> | channel add|remove <channel-id> \
                         | channels | owner <user-id>|none | spam on|off \
                         | tier <user-id> free|pro | usage [user-id] | misses <user-id> \
                         | budget | reload";

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    Status,
    SetAi(bool),
    SetThreshold(f64),
    AddChannel(String),
    RemoveChannel(String),
    Channels,
    /// `None` clears the contact
    SetOwner(Option<String>),
    SetSpamFilter(bool),
    SetTier { user_id: String, tier: Tier },
    /// `None` is the caller
    Usage(Option<String>),
    Misses(String),
    Budget,
    Reload,
}

fn on_off(arg: Option<&str>) -> Result<bool> {
    match arg {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => bail!("Expected `on` or `off`"),
    }
}

fn id(arg: Option<&str>) -> Result<String> {
    match arg {
        Some(id) if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) => Ok(id.to_owned()),
        Some(other) => bail!("`{}` is not an id", other),
        None => bail!("Missing id"),
    }
}

impl AdminCommand {
    /// Tiers and usage counts are global to a user, not to the server, so a guild owner may only
    /// look at their own.
    pub fn bot_owner_only(&self, caller_id: &str) -> bool {
        match self {
            AdminCommand::SetTier { .. } => true,
            AdminCommand::Usage(Some(user_id)) => user_id != caller_id,
            _ => false,
        }
    }

    /// Parse the words following `kb`.
    pub fn parse(args: &str) -> Result<Self> {
        let mut words = args.split_whitespace();
        let Some(sub) = words.next() else {
            return Ok(AdminCommand::Status);
        };

        let cmd = match sub {
            "status" => AdminCommand::Status,
            "ai" => AdminCommand::SetAi(on_off(words.next())?),
            "threshold" => {
                let value: f64 = words
                    .next()
                    .ok_or(anyhow!("Missing threshold"))?
                    .parse()
                    .map_err(|_| anyhow!("Threshold must be a number"))?;
                if !(0.0..=1.0).contains(&value) {
                    bail!("Threshold must be between 0 and 1");
                }
                AdminCommand::SetThreshold(value)
            }
            "channel" => match words.next() {
                Some("add") => AdminCommand::AddChannel(id(words.next())?),
                Some("remove") => AdminCommand::RemoveChannel(id(words.next())?),
                _ => bail!("Expected `channel add <id>` or `channel remove <id>`"),
            },
            "channels" => AdminCommand::Channels,
            "owner" => match words.next() {
                Some("none") => AdminCommand::SetOwner(None),
                other => AdminCommand::SetOwner(Some(id(other)?)),
            },
            "spam" => AdminCommand::SetSpamFilter(on_off(words.next())?),
            "tier" => {
                let user_id = id(words.next())?;
                let tier = words
                    .next()
                    .ok_or(anyhow!("Missing tier"))?
                    .parse()?;
                AdminCommand::SetTier { user_id, tier }
            }
            "usage" => AdminCommand::Usage(words.next().map(|w| id(Some(w))).transpose()?),
            "misses" => AdminCommand::Misses(id(words.next())?),
            "budget" => AdminCommand::Budget,
            "reload" => AdminCommand::Reload,
            other => bail!("Unknown subcommand `{}`", other),
        };

        if let Some(extra) = words.next() {
            bail!("Unexpected `{}`", extra);
        }
        Ok(cmd)
    }
}

/// Who is running an admin command
#[derive(Debug, Clone, Copy)]
pub struct Caller<'a> {
    pub id: &'a str,
    pub bot_owner: bool,
}

/// What admin commands act on.
pub struct Admin {
    pub servers: Arc<dyn ServerConfigStore>,
    pub usage: Arc<dyn UsageStore>,
    pub knowledge: Arc<MemoryKnowledgeStore>,
    pub answers: Arc<AnswerService>,
    pub misses: Arc<MissTracker>,
}

impl Admin {
    /// Run `cmd` for `server_id` on behalf of `caller`.  Returns the text to reply with.
    pub async fn execute(
        &self,
        cmd: AdminCommand,
        server_id: &str,
        caller: Caller<'_>,
        knowledge_dir: &Path,
    ) -> Result<String> {
        if cmd.bot_owner_only(caller.id) && !caller.bot_owner {
            bail!("Only bot owners can change tiers or view another user's usage");
        }

        let update = |u: ServerConfigUpdate| self.servers.update_server_config(server_id, u);

        let reply = match cmd {
            AdminCommand::Status => {
                let cfg = self.servers.server_config(server_id).await?;
                format!(
                    "AI answers: {}\n\
                     Confidence threshold: {:.2}\n\
                     Channels: {}\n\
                     Spam filter: {}\n\
                     Owner contact: {}\n\
                     Knowledge entries: {}\n\
                     Model calls left today: {}\n\
                     Queued requests: {}",
                    on_off_str(cfg.ai_enabled),
                    cfg.confidence_threshold,
                    if cfg.allowed_channels.is_empty() {
                        "all".to_owned()
                    } else {
                        cfg.allowed_channels.len().to_string()
                    },
                    on_off_str(cfg.spam_filter),
                    cfg.owner_contact.as_deref().unwrap_or("none"),
                    self.knowledge.entry_count(server_id).await,
                    self.answers.remaining_requests().await,
                    self.answers.queue_len(),
                )
            }
            AdminCommand::SetAi(enabled) => {
                update(ServerConfigUpdate {
                    ai_enabled: Some(enabled),
                    ..Default::default()
                })
                .await?;
                format!("AI answers are now {}", on_off_str(enabled))
            }
            AdminCommand::SetThreshold(threshold) => {
                let cfg = update(ServerConfigUpdate {
                    confidence_threshold: Some(threshold),
                    ..Default::default()
                })
                .await?;
                format!("Confidence threshold set to {:.2}", cfg.confidence_threshold)
            }
            AdminCommand::AddChannel(channel) => {
                let cfg = update(ServerConfigUpdate {
                    add_channel: Some(channel.clone()),
                    ..Default::default()
                })
                .await?;
                format!(
                    "Answering in <#{}> ({} channels)",
                    channel,
                    cfg.allowed_channels.len()
                )
            }
            AdminCommand::RemoveChannel(channel) => {
                let cfg = update(ServerConfigUpdate {
                    remove_channel: Some(channel.clone()),
                    ..Default::default()
                })
                .await?;
                if cfg.allowed_channels.is_empty() {
                    format!("No longer restricted to <#{}>; answering everywhere", channel)
                } else {
                    format!("No longer answering in <#{}>", channel)
                }
            }
            AdminCommand::Channels => {
                let cfg = self.servers.server_config(server_id).await?;
                if cfg.allowed_channels.is_empty() {
                    "Answering in every channel".to_owned()
                } else {
                    let channels: Vec<String> = cfg
                        .allowed_channels
                        .iter()
                        .map(|c| format!("<#{}>", c))
                        .collect();
                    format!("Answering in {}", channels.join(", "))
                }
            }
            AdminCommand::SetOwner(contact) => {
                let reply = match &contact {
                    Some(user) => format!("Repeated misses will be reported to <@{}>", user),
                    None => "Repeated misses will no longer be reported".to_owned(),
                };
                update(ServerConfigUpdate {
                    owner_contact: Some(contact),
                    ..Default::default()
                })
                .await?;
                reply
            }
            AdminCommand::SetSpamFilter(enabled) => {
                update(ServerConfigUpdate {
                    spam_filter: Some(enabled),
                    ..Default::default()
                })
                .await?;
                format!("Spam filter is now {}", on_off_str(enabled))
            }
            AdminCommand::SetTier { user_id, tier } => {
                self.usage.set_tier(&user_id, tier).await?;
                format!("<@{}> is now on the {} tier", user_id, tier)
            }
            AdminCommand::Usage(user) => {
                let user_id = user.as_deref().unwrap_or(caller.id);
                let tier = self.usage.tier(user_id).await?;
                let quota = self.usage.check_quota(user_id).await?;
                format!(
                    "<@{}> ({} tier) has used {}/{} messages this month, {} left",
                    user_id,
                    tier,
                    quota.current,
                    quota.limit,
                    quota.remaining()
                )
            }
            AdminCommand::Misses(user_id) => {
                let count = self.misses.miss_count(&user_id);
                format!(
                    "<@{}> has {} unanswered question(s) in a row (notify at {})",
                    user_id,
                    count,
                    self.misses.threshold()
                )
            }
            AdminCommand::Budget => format!(
                "{} model calls left today, {} request(s) queued",
                self.answers.remaining_requests().await,
                self.answers.queue_len()
            ),
            AdminCommand::Reload => {
                let count = self.knowledge.reload_server(knowledge_dir, server_id).await?;
                format!("Reloaded {} knowledge entries", count)
            }
        };

        Ok(reply)
    }
}

fn on_off_str(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        answer::{AnswerSettings, RateLimitStore},
        knowledge::KnowledgeRecord,
        model::ModelClient,
        store::StateStore,
        usage::TierLimits,
    };
    use std::time::Duration;

    struct SilentModel;

    #[serenity::async_trait]
    impl ModelClient for SilentModel {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    fn admin() -> (Admin, Arc<StateStore>) {
        let state = Arc::new(StateStore::in_memory(TierLimits::default()));
        let answers = Arc::new(AnswerService::new(
            Arc::new(SilentModel),
            state.clone() as Arc<dyn RateLimitStore>,
            AnswerSettings {
                daily_limit: 500,
                timeout: Duration::from_millis(100),
                queue_wait: Duration::from_millis(100),
            },
        ));
        let admin = Admin {
            servers: state.clone(),
            usage: state.clone(),
            knowledge: Arc::new(MemoryKnowledgeStore::new()),
            answers,
            misses: Arc::new(MissTracker::new(3)),
        };
        (admin, state)
    }

    const BOT_OWNER: Caller<'static> = Caller {
        id: "caller",
        bot_owner: true,
    };

    const GUILD_OWNER: Caller<'static> = Caller {
        id: "caller",
        bot_owner: false,
    };

    async fn run_as(admin: &Admin, caller: Caller<'_>, args: &str) -> Result<String> {
        let cmd = AdminCommand::parse(args).unwrap();
        admin
            .execute(cmd, "guild", caller, Path::new("/nonexistent"))
            .await
    }

    async fn run(admin: &Admin, args: &str) -> String {
        run_as(admin, BOT_OWNER, args).await.unwrap()
    }

    #[test]
    fn parses_subcommands() {
        assert_eq!(AdminCommand::parse("").unwrap(), AdminCommand::Status);
        assert_eq!(AdminCommand::parse("ai off").unwrap(), AdminCommand::SetAi(false));
        assert_eq!(
            AdminCommand::parse("threshold 0.55").unwrap(),
            AdminCommand::SetThreshold(0.55)
        );
        assert_eq!(
            AdminCommand::parse("channel remove 123").unwrap(),
            AdminCommand::RemoveChannel("123".to_owned())
        );
        assert_eq!(AdminCommand::parse("owner none").unwrap(), AdminCommand::SetOwner(None));
        assert_eq!(
            AdminCommand::parse("tier 42 pro").unwrap(),
            AdminCommand::SetTier {
                user_id: "42".to_owned(),
                tier: Tier::Pro
            }
        );
        assert_eq!(AdminCommand::parse("usage").unwrap(), AdminCommand::Usage(None));
        assert_eq!(AdminCommand::parse("budget").unwrap(), AdminCommand::Budget);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(AdminCommand::parse("threshold 1.5").is_err());
        assert!(AdminCommand::parse("threshold high").is_err());
        assert!(AdminCommand::parse("ai maybe").is_err());
        assert!(AdminCommand::parse("channel add general").is_err());
        assert!(AdminCommand::parse("tier 42 gold").is_err());
        assert!(AdminCommand::parse("budget now").is_err());
        assert!(AdminCommand::parse("frobnicate").is_err());
    }

    #[tokio::test]
    async fn settings_reach_the_store() {
        let (admin, state) = admin();
        run(&admin, "ai off").await;
        run(&admin, "threshold 0.5").await;
        run(&admin, "channel add 7").await;
        run(&admin, "spam on").await;
        run(&admin, "owner 99").await;

        let cfg = state.server_config("guild").await.unwrap();
        assert!(!cfg.ai_enabled);
        assert_eq!(cfg.confidence_threshold, 0.5);
        assert_eq!(cfg.allowed_channels, vec!["7".to_owned()]);
        assert!(cfg.spam_filter);
        assert_eq!(cfg.owner_contact.as_deref(), Some("99"));

        assert_eq!(run(&admin, "channels").await, "Answering in <#7>");
        let status = run(&admin, "status").await;
        assert!(status.contains("AI answers: off"));
        assert!(status.contains("Model calls left today: 500"));

        run(&admin, "channel remove 7").await;
        assert_eq!(run(&admin, "channels").await, "Answering in every channel");
    }

    #[tokio::test]
    async fn tier_and_usage() {
        let (admin, state) = admin();
        state.try_reserve("caller").await.unwrap();
        run(&admin, "tier 5 pro").await;

        assert_eq!(state.tier("5").await.unwrap(), Tier::Pro);
        assert!(run(&admin, "usage 5").await.contains("0/1000"));
        assert!(run(&admin, "usage").await.contains("1/100"));
    }

    #[tokio::test]
    async fn guild_owners_cannot_touch_global_tiers() {
        let (admin, state) = admin();

        let refused = run_as(&admin, GUILD_OWNER, "tier 5 pro").await;
        assert!(refused.unwrap_err().to_string().contains("Only bot owners"));
        assert_eq!(state.tier("5").await.unwrap(), Tier::Free);

        assert!(run_as(&admin, GUILD_OWNER, "usage 5").await.is_err());
        assert!(run_as(&admin, GUILD_OWNER, "usage").await.unwrap().contains("0/100"));
        assert!(run_as(&admin, GUILD_OWNER, "ai off").await.is_ok());
    }

    #[tokio::test]
    async fn reports_misses_and_reloads() {
        let (admin, _) = admin();
        admin.misses.track_miss("8");
        assert!(run(&admin, "misses 8").await.contains("1 unanswered"));

        admin
            .knowledge
            .replace_server("guild", vec![KnowledgeRecord::new("q one", "a one", &[])])
            .await;
        assert_eq!(admin.knowledge.entry_count("guild").await, 1);
        assert_eq!(run(&admin, "reload").await, "Reloaded 0 knowledge entries");
        assert_eq!(admin.knowledge.entry_count("guild").await, 0);
    }
}
