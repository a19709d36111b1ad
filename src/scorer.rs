//! Relevance of a knowledge entry to a tokenized query, in `[0, 1]`.

use crate::{
    knowledge::KnowledgeEntry,
    tokenizer::{token_sequence, tokenize, Tokens},
};

/// Added per entry keyword related to a query token.
const KEYWORD_BONUS: f64 = 0.1;
/// Weight of the share of query tokens found in the entry's question.
const QUESTION_WEIGHT: f64 = 0.2;

/// Score `entry` against the query's token sequence.
///
/// The sum of three terms, capped at 1.0:
/// - Jaccard similarity of the query with the entry's question, answer and keywords
/// - a fixed bonus per keyword that contains, or is contained in, some query token
/// - the share of query tokens appearing in the question, weighted
///
/// A query whose token sequence is exactly the question's always scores 1.0.
pub fn score(query: &[String], entry: &KnowledgeEntry) -> f64 {
    if !query.is_empty() && query == token_sequence(&entry.question).as_slice() {
        return 1.0;
    }

    let query: Tokens = query.iter().cloned().collect();
    let question = tokenize(&entry.question);

    let mut entry_terms = tokenize(&format!("{} {}", entry.question, entry.answer));
    entry_terms.extend(entry.keywords.iter().map(|k| k.to_lowercase()));

    let intersection = query.intersection(&entry_terms).count();
    let union = query.union(&entry_terms).count();
    let jaccard = if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    };

    let related_keywords = entry
        .keywords
        .iter()
        .map(|k| k.to_lowercase())
        .filter(|k| query.iter().any(|q| k.contains(q.as_str()) || q.contains(k.as_str())))
        .count();
    let keyword_bonus = related_keywords as f64 * KEYWORD_BONUS;

    let in_question = query.intersection(&question).count();
    let question_bonus = in_question as f64 / query.len().max(1) as f64 * QUESTION_WEIGHT;

    (jaccard + keyword_bonus + question_bonus).min(1.0)
}
