//! Ranked knowledge lookup for a free-text query.

use crate::{
    knowledge::{KnowledgeEntry, KnowledgeStore, MAX_KEYWORDS_PER_QUERY},
    scorer::score,
    tokenizer::{token_sequence, Tokens},
};
use anyhow::Result;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

/// Number of matches callers usually want.
pub const DEFAULT_RESULT_LIMIT: usize = 3;
/// Cap on candidates fetched per keyword batch.
const CANDIDATES_PER_BATCH: usize = 30;

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub entry: Arc<KnowledgeEntry>,
    /// In `[0, 1]`
    pub score: f64,
}

pub struct KnowledgeSearch {
    store: Arc<dyn KnowledgeStore>,
    /// f64 bits
    threshold: AtomicU64,
}

impl KnowledgeSearch {
    pub fn new(store: Arc<dyn KnowledgeStore>, threshold: f64) -> Self {
        Self {
            store,
            threshold: AtomicU64::new(threshold.to_bits()),
        }
    }

    pub fn threshold(&self) -> f64 {
        f64::from_bits(self.threshold.load(Ordering::Relaxed))
    }

    pub fn set_threshold(&self, threshold: f64) {
        self.threshold.store(threshold.to_bits(), Ordering::Relaxed);
    }

    /// Up to `limit` entries of `server_id` scoring at least the threshold, best first.  Equal
    /// scores keep ingestion order.
    pub async fn search(
        &self,
        query: &str,
        server_id: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let sequence = token_sequence(query);
        let tokens: Tokens = sequence.iter().cloned().collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        // The store caps how many keywords one "any of" query may carry.
        let tokens_vec: Vec<String> = tokens.iter().cloned().collect();
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for batch in tokens_vec.chunks(MAX_KEYWORDS_PER_QUERY) {
            let found = self
                .store
                .query_by_keywords(server_id, batch, CANDIDATES_PER_BATCH)
                .await?;
            for entry in found {
                if seen.insert(entry.id) {
                    candidates.push(entry);
                }
            }
        }

        let threshold = self.threshold();
        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .map(|entry| SearchResult {
                score: score(&sequence, &entry),
                entry,
            })
            .filter(|result| result.score >= threshold)
            .collect();

        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.entry.id.cmp(&b.entry.id))
        });
        results.truncate(limit);

        Ok(results)
    }

    pub async fn best_match(&self, query: &str, server_id: &str) -> Result<Option<SearchResult>> {
        Ok(self.search(query, server_id, 1).await?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{KnowledgeRecord, MemoryKnowledgeStore};
    use std::sync::Mutex;

    async fn knowledge_base() -> Arc<MemoryKnowledgeStore> {
        let store = Arc::new(MemoryKnowledgeStore::new());
        store
            .replace_server(
                "guild",
                vec![
                    KnowledgeRecord::new("What is Discord?", "A chat platform.", &["discord"]),
                    KnowledgeRecord::new(
                        "How do I reset my password?",
                        "Use the reset link on the login page.",
                        &["password", "reset", "login"],
                    ),
                    KnowledgeRecord::new(
                        "How do refunds work?",
                        "Refunds reach your card within five days.",
                        &["refund", "billing"],
                    ),
                    KnowledgeRecord::new(
                        "Can I change my login email?",
                        "Yes, from account settings.",
                        &["login", "email", "account"],
                    ),
                ],
            )
            .await;
        store
    }

    #[tokio::test]
    async fn exact_question_is_best_match() {
        let search = KnowledgeSearch::new(knowledge_base().await, 0.3);
        let best = search
            .best_match("What is Discord?", "guild")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(best.score, 1.0);
        assert_eq!(best.entry.answer, "A chat platform.");
    }

    #[tokio::test]
    async fn unrelated_query_finds_nothing() {
        let search = KnowledgeSearch::new(knowledge_base().await, 0.3);
        let results = search
            .search("xyz totally unrelated 123", "guild", 3)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn results_are_sorted_and_limited() {
        let search = KnowledgeSearch::new(knowledge_base().await, 0.0);
        let results = search
            .search("reset login password email account", "guild", 3)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert_eq!(results[0].entry.question, "How do I reset my password?");

        let one = search
            .search("reset login password email account", "guild", 1)
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
    }

    #[tokio::test]
    async fn raising_threshold_never_adds_results() {
        let search = KnowledgeSearch::new(knowledge_base().await, 0.0);
        let queries = ["login problems", "refund billing", "discord", "password reset link"];
        for query in queries {
            let mut previous = usize::MAX;
            for threshold in [0.0, 0.1, 0.3, 0.5, 0.7, 0.9, 1.0] {
                search.set_threshold(threshold);
                assert_eq!(search.threshold(), threshold);
                let count = search.search(query, "guild", 10).await.unwrap().len();
                assert!(count <= previous, "{query} at {threshold}");
                previous = count;
            }
        }
    }

    #[tokio::test]
    async fn equal_scores_keep_ingestion_order() {
        let store = Arc::new(MemoryKnowledgeStore::new());
        store
            .replace_server(
                "guild",
                vec![
                    KnowledgeRecord::new("Alpha topic", "Same text.", &["shared"]),
                    KnowledgeRecord::new("Alpha topic", "Same text.", &["shared"]),
                    KnowledgeRecord::new("Alpha topic", "Same text.", &["shared"]),
                ],
            )
            .await;
        let search = KnowledgeSearch::new(store, 0.0);
        let results = search.search("shared", "guild", 3).await.unwrap();
        let ids: Vec<u64> = results.iter().map(|r| r.entry.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    /// Records every keyword batch it is asked for.
    struct BatchRecorder {
        inner: Arc<MemoryKnowledgeStore>,
        batches: Mutex<Vec<usize>>,
    }

    #[serenity::async_trait]
    impl KnowledgeStore for BatchRecorder {
        async fn query_by_keywords(
            &self,
            server_id: &str,
            keywords: &[String],
            limit: usize,
        ) -> Result<Vec<Arc<KnowledgeEntry>>> {
            self.batches.lock().unwrap().push(keywords.len());
            self.inner.query_by_keywords(server_id, keywords, limit).await
        }
    }

    #[tokio::test]
    async fn long_queries_are_batched_and_deduplicated() {
        let recorder = Arc::new(BatchRecorder {
            inner: knowledge_base().await,
            batches: Mutex::new(Vec::new()),
        });
        let search = KnowledgeSearch::new(recorder.clone(), 0.0);
        // 12 distinct tokens; "login" matches two entries, "reset" one of them again
        let query = "login reset alpha bravo charlie delta echo foxtrot golf hotel india juliet";
        let results = search.search(query, "guild", 10).await.unwrap();

        assert_eq!(*recorder.batches.lock().unwrap(), vec![10, 2]);
        let mut ids: Vec<u64> = results.iter().map(|r| r.entry.id).collect();
        let before = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), before);
        assert_eq!(before, 2);
    }

    #[tokio::test]
    async fn stopword_query_skips_store() {
        let recorder = Arc::new(BatchRecorder {
            inner: knowledge_base().await,
            batches: Mutex::new(Vec::new()),
        });
        let search = KnowledgeSearch::new(recorder.clone(), 0.0);
        assert!(search.search("what is it?", "guild", 3).await.unwrap().is_empty());
        assert!(recorder.batches.lock().unwrap().is_empty());
    }
}
