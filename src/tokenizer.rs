//! Normalizes free text into significant search terms.
//!
//! The same tokenizer is used when indexing knowledge entries and when reading user queries, so a
//! term that survives one side always survives the other.

use std::collections::BTreeSet;

/// Tokens of this many characters or fewer carry too little meaning to match on.
pub const MIN_TOKEN_LEN: usize = 3;

/// Deduplicated set of lowercase terms.  Ordered so iteration (and thus logging and keyword
/// batching) is deterministic.
pub type Tokens = BTreeSet<String>;

const STOPWORDS: &[&str] = &[
    // articles, conjunctions
    "a", "an", "the", "and", "or", "but", "nor", "so", "than", "then",
    // prepositions
    "in", "on", "at", "to", "for", "of", "with", "by", "from", "as", "into", "about",
    // auxiliary verbs
    "is", "am", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "should", "could", "may", "might", "can", "shall",
    // wh-words
    "what", "when", "where", "who", "whom", "why", "how", "which",
    // pronouns and determiners
    "this", "that", "these", "those", "it", "its", "my", "your", "his", "her", "their",
    "our", "you", "i", "we", "they", "he", "she", "me", "him", "us", "them",
];

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Significant lowercase terms of `text`, in order of appearance, repeats kept.
///
/// Anything outside `[a-z0-9]` after lowercasing separates tokens.  Short tokens and stopwords
/// are dropped.
pub fn token_sequence(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
        .filter(|word| word.len() >= MIN_TOKEN_LEN && !is_stopword(word))
        .map(str::to_owned)
        .collect()
}

/// Split `text` into its set of significant lowercase terms.
pub fn tokenize(text: &str) -> Tokens {
    token_sequence(text).into_iter().collect()
}

/// Keywords for a knowledge entry that was ingested without any.
pub fn extract_keywords(question: &str, answer: &str) -> Vec<String> {
    tokenize(&format!("{} {}", question, answer))
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(words: &[&str]) -> Tokens {
        words.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn drops_stopwords_short_tokens_and_punctuation() {
        assert_eq!(
            tokenize("What is Discord?  It's a CHAT platform, v2!"),
            set(&["discord", "chat", "platform"])
        );
    }

    #[test]
    fn sequence_keeps_order_and_repeats() {
        assert_eq!(
            token_sequence("Password reset? RESET the password"),
            vec!["password", "reset", "reset", "password"]
        );
    }

    #[test]
    fn deduplicates() {
        assert_eq!(tokenize("reset reset RESET password"), set(&["reset", "password"]));
    }

    #[test]
    fn keeps_digits() {
        assert_eq!(tokenize("error 404 on page"), set(&["error", "404", "page"]));
    }

    #[test]
    fn empty_and_all_stopwords() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("what is it?").is_empty());
        assert!(tokenize("!!! ... ???").is_empty());
    }

    #[test]
    fn non_ascii_letters_split_tokens() {
        assert_eq!(tokenize("café résumé"), set(&["caf", "sum"]));
    }

    #[test]
    fn reapplying_is_stable() {
        let inputs = [
            "How do I reset my password?",
            "Billing: refunds, chargebacks & DISPUTES (2024)",
            "the an a of",
            "x y zz www 12 123",
        ];
        for input in inputs {
            let once = tokenize(input);
            let joined = once.iter().cloned().collect::<Vec<_>>().join(" ");
            assert_eq!(tokenize(&joined), once, "input: {input}");
        }
    }

    #[test]
    fn keywords_come_from_question_and_answer() {
        let keywords = extract_keywords("How do refunds work?", "Refunds take 5 days.");
        assert_eq!(keywords, vec!["days", "refunds", "take", "work"]);
    }
}
