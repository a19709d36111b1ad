//! The Serenity crate we're using for the Discord API is designed around callbacks to handle
//! events.  However, this does not mesh well with our plugin framework here.  To resolve this,
//! the handler translates the callbacks into a distinct Event enum.

use crate::{context::Context, log_error};
use serenity::all::{Message, Ready};

/// A Discord event
pub enum Event {
    Ready(Ready),
    Message(Message),
}

impl Event {
    /// Offer the event to each plugin in order until one handles it.
    pub async fn handle(&self, ctx: Context<'_>) {
        for plugin in crate::plugin::plugins() {
            match plugin.handle(&ctx, self).await {
                Ok(EventHandled::Yes) => return,
                Ok(EventHandled::No) => continue,
                Err(err) => log_error!("Error in plugin {}: {}", plugin.name(), err),
            }
        }
    }

    /// Check if a message should be interpreted as a special bot command.
    ///
    /// These are prefixed with the configured command prefix, e. g. `;kb ai off`.  Returns the
    /// message and everything after the command word.
    pub async fn is_bot_cmd<'a>(
        &'a self,
        ctx: &Context<'_>,
        cmd: &str,
    ) -> Option<(&'a Message, &'a str)> {
        let Event::Message(msg) = self else {
            return None;
        };

        let prefix = ctx.cfg.read().await.general.command_prefix.clone();
        let rest = msg.content.trim_start().strip_prefix(prefix.as_str())?;
        let rest = rest.strip_prefix(cmd)?;
        match rest.chars().next() {
            None => Some((msg, "")),
            Some(c) if c.is_whitespace() => Some((msg, rest.trim())),
            Some(_) => None,
        }
    }
}

pub enum EventHandled {
    Yes,
    No,
}
