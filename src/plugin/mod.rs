use crate::event::{Event, EventHandled};
use anyhow::Result;

pub use crate::context::Context;

mod answer;
mod debug;
mod help;
mod ignore_bots;
mod kb;
mod reload;
mod spam_guard;

#[serenity::async_trait]
pub trait Plugin: Sync + Send {
    /// Plugin name.  Used for debug and as the command word
    fn name(&self) -> &'static str;
    /// Help message line.  None if no help message
    async fn usage(&self, ctx: &Context) -> Option<String>;
    /// Potentially handle event.  Returns:
    /// - Ok(EventHandled::Yes) if the event has been handled and no other plugin should attempt to
    ///   handle it
    /// - Ok(EventHandled::No) if another plugin should attempt to handle the event
    /// - Err if an error occurred
    async fn handle(&self, ctx: &Context, event: &Event) -> Result<EventHandled>;
}

/// Ordered list of available plugins
pub fn plugins() -> Vec<Box<dyn Plugin>> {
    vec![
        // Core bot operations
        Box::new(debug::Debug),
        Box::new(ignore_bots::IgnoreBots),
        Box::new(spam_guard::SpamGuard),
        // Commands
        Box::new(help::Help),
        Box::new(reload::Reload),
        Box::new(kb::Kb),
        // Knowledge base answers, used if no other plugin handles the event.
        // Keep last.
        Box::new(answer::Answer),
    ]
}
