//! Logging to the terminal with colors
//!
//! Each line starts with a colored sigil naming where it came from:
//! - `*` Discord event
//! - `+` internal progress
//! - `!` warning (stderr)
//! - `x` error (stderr)

use serenity::all::Http;
use std::borrow::Cow;
use std::io::IsTerminal;
use std::sync::{Arc, LazyLock};

const DEFAULT: &str = "\x1b[0m";
const FG_BLUE: &str = "\x1b[38;5;33m";
const FG_CYAN: &str = "\x1b[36m";
const FG_GRAY: &str = "\x1b[90m";
const FG_GREEN: &str = "\x1b[32m";
const FG_MAGENTA: &str = "\x1b[35m";
const FG_RED: &str = "\x1b[31m";
const FG_YELLOW: &str = "\x1b[33m";
const FG_ORANGE: &str = "\x1b[38;5;208m";

pub enum Color {
    Default,
    Event,
    Internal,
    Warn,
    Error,
    User,
    Channel,
    Guild,
    Glue,
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        // This won't change during the program's execution, so we can cache it.  Warnings and
        // errors go to stderr but are colored by the same rule; bots typically run with both
        // attached to the same journal.
        static STDOUT_IS_TERMINAL: LazyLock<bool> =
            LazyLock::new(|| std::io::stdout().is_terminal());

        if !*STDOUT_IS_TERMINAL {
            return Ok(());
        }

        write!(
            f,
            "{}",
            match self {
                Color::Default => DEFAULT,
                Color::Event => FG_YELLOW,
                Color::Internal => FG_MAGENTA,
                Color::Warn => FG_ORANGE,
                Color::Error => FG_RED,
                Color::User => FG_GREEN,
                Color::Channel => FG_CYAN,
                Color::Guild => FG_BLUE,
                Color::Glue => FG_GRAY,
            }
        )
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_line {
    ($print:ident, $sigil:expr, $color:ident, $fmtstr:expr) => {{
        $print!(
            concat!("{}", $sigil, "{} ", $fmtstr),
            $crate::logging::Color::$color,
            $crate::logging::Color::Default
        )
    }};

    ($print:ident, $sigil:expr, $color:ident, $fmtstr:expr, $($args:expr),* $(,)?) => {{
        $print!(
            concat!("{}", $sigil, "{} ", $fmtstr),
            $crate::logging::Color::$color,
            $crate::logging::Color::Default,
            $($args),*
        )
    }};
}

/// Something Discord told us about
#[macro_export]
macro_rules! log_event {
    ($($args:tt)*) => { $crate::__log_line!(println, "*", Event, $($args)*) };
}

/// Something the bot is doing on its own
#[macro_export]
macro_rules! log_internal {
    ($($args:tt)*) => { $crate::__log_line!(println, "+", Internal, $($args)*) };
}

/// Degraded but handled, e.g. a fallback answer
#[macro_export]
macro_rules! log_warn {
    ($($args:tt)*) => { $crate::__log_line!(eprintln, "!", Warn, $($args)*) };
}

/// Failed and absorbed
#[macro_export]
macro_rules! log_error {
    ($($args:tt)*) => { $crate::__log_line!(eprintln, "x", Error, $($args)*) };
}

pub trait PrintColor {
    fn color(&self) -> String;
}

#[serenity::async_trait]
pub trait AsyncPrintColor {
    async fn color(&self, http: &Arc<Http>) -> String;
}

fn paint(color: Color, text: &str) -> String {
    format!("{}{}{}", color, text, Color::Default)
}

// Field separator
pub struct Glue;
impl PrintColor for Glue {
    fn color(&self) -> String {
        paint(Color::Glue, ":")
    }
}

impl PrintColor for serenity::all::CurrentUser {
    fn color(&self) -> String {
        paint(Color::User, &self.name)
    }
}

impl PrintColor for serenity::all::User {
    fn color(&self) -> String {
        paint(Color::User, &self.name)
    }
}

#[serenity::async_trait]
impl AsyncPrintColor for serenity::all::ChannelId {
    async fn color(&self, http: &Arc<Http>) -> String {
        let name = match self.name(http).await {
            Ok(name) => Cow::Owned(name),
            Err(_) => Cow::Borrowed("<unknown-channel>"),
        };
        paint(Color::Channel, &name)
    }
}

#[serenity::async_trait]
impl AsyncPrintColor for Option<serenity::all::GuildId> {
    async fn color(&self, http: &Arc<Http>) -> String {
        let name = match self {
            Some(guild_id) => match guild_id.to_partial_guild(http).await {
                Ok(guild) => Cow::Owned(guild.name),
                Err(_) => Cow::Borrowed("<unknown-guild>"),
            },
            None => Cow::Borrowed("<direct-message>"),
        };
        paint(Color::Guild, &name)
    }
}
