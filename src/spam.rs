//! Heuristic spam check for servers that opt in.

use anyhow::Result;
use regex::Regex;
use std::collections::HashMap;

/// Longer messages are treated as spam.
const MAX_MESSAGE_LEN: usize = 2000;

const URL_PATTERN: &str = r"(?i)https?://\S+|www\.\S+";

const SUSPICIOUS_PATTERNS: [&str; 5] = [
    r"(?i)discord\.gg/[a-z0-9]+",
    r"(?i)bit\.ly/[a-z0-9]+",
    r"(?i)free\s+(nitro|money|crypto)",
    r"(?i)@everyone|@here",
    r"(?i)\b(click|download|install)\s+(here|now)\b",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpamReason {
    ContainsUrl,
    TooLong,
    Suspicious,
    Repetition,
    ExcessiveCaps,
}

impl std::fmt::Display for SpamReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            SpamReason::ContainsUrl => "Message contains URLs",
            SpamReason::TooLong => "Message exceeds maximum length",
            SpamReason::Suspicious => "Message contains suspicious content",
            SpamReason::Repetition => "Message contains excessive repetition",
            SpamReason::ExcessiveCaps => "Message contains excessive capital letters",
        })
    }
}

pub struct SpamDetector {
    url: Regex,
    suspicious: Vec<Regex>,
}

impl SpamDetector {
    pub fn new() -> Result<Self> {
        Ok(Self {
            url: Regex::new(URL_PATTERN)?,
            suspicious: SUSPICIOUS_PATTERNS
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<_, _>>()?,
        })
    }

    /// Why `message` looks like spam, if it does.
    pub fn check(&self, message: &str) -> Option<SpamReason> {
        if self.url.is_match(message) {
            return Some(SpamReason::ContainsUrl);
        }
        if message.chars().count() > MAX_MESSAGE_LEN {
            return Some(SpamReason::TooLong);
        }
        if self.suspicious.iter().any(|re| re.is_match(message)) {
            return Some(SpamReason::Suspicious);
        }
        if has_excessive_repetition(message) {
            return Some(SpamReason::Repetition);
        }
        if has_excessive_caps(message) {
            return Some(SpamReason::ExcessiveCaps);
        }
        None
    }
}

/// Some word of 3+ characters makes up more than half of a 5+ word message.
fn has_excessive_repetition(message: &str) -> bool {
    let lower = message.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    if words.len() < 5 {
        return false;
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for word in words.iter().copied().filter(|w| w.chars().count() >= 3) {
        *counts.entry(word).or_default() += 1;
    }
    counts.values().any(|&count| count * 2 > words.len())
}

/// More than 70% of at least 10 ASCII letters are capitals.
fn has_excessive_caps(message: &str) -> bool {
    let letters = message.chars().filter(char::is_ascii_alphabetic).count();
    if letters < 10 {
        return false;
    }
    let caps = message.chars().filter(char::is_ascii_uppercase).count();
    caps * 10 > letters * 7
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(message: &str) -> Option<SpamReason> {
        SpamDetector::new().unwrap().check(message)
    }

    #[test]
    fn ordinary_questions_pass() {
        assert_eq!(check("How do I reset my password?"), None);
        assert_eq!(check("Is the API down right now? I get error 503"), None);
        assert_eq!(check("OK"), None);
    }

    #[test]
    fn urls() {
        assert_eq!(check("see https://example.com/x"), Some(SpamReason::ContainsUrl));
        assert_eq!(check("go to www.example.com"), Some(SpamReason::ContainsUrl));
    }

    #[test]
    fn length() {
        assert_eq!(check(&"ab ".repeat(700)), Some(SpamReason::TooLong));
    }

    #[test]
    fn suspicious_phrases() {
        assert_eq!(check("join discord.gg/abc123"), Some(SpamReason::Suspicious));
        assert_eq!(check("FREE   Nitro for all"), Some(SpamReason::Suspicious));
        assert_eq!(check("hey @everyone"), Some(SpamReason::Suspicious));
        assert_eq!(check("click here to win"), Some(SpamReason::Suspicious));
    }

    #[test]
    fn repetition() {
        assert_eq!(check("buy buy buy buy now"), Some(SpamReason::Repetition));
        assert_eq!(check("buy buy now"), None);
    }

    #[test]
    fn caps() {
        assert_eq!(check("WHY IS NOTHING WORKING today"), Some(SpamReason::ExcessiveCaps));
        assert_eq!(check("NASA and ESA"), None);
    }
}
