//! Per-server knowledge entries and the store they are retrieved from.

use crate::{log_internal, log_warn, tokenizer::extract_keywords};
use anyhow::{anyhow, bail, Result};
use std::{
    collections::{BTreeSet, HashMap},
    io::ErrorKind,
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::RwLock;

/// Most keywords a single "any of" store query may carry.
pub const MAX_KEYWORDS_PER_QUERY: usize = 10;

/// One question/answer pair in a server's knowledge base.
///
/// Entries are never edited in place; re-ingesting a server replaces all of its entries.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeEntry {
    /// Assigned by the store in ingestion order.  Used to dedupe and to break score ties.
    pub id: u64,
    pub server_id: String,
    pub question: String,
    pub answer: String,
    /// Lowercase
    pub keywords: BTreeSet<String>,
    pub category: Option<String>,
}

/// Knowledge entry as written in a knowledge file, before the store assigns it an identity.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KnowledgeRecord {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl KnowledgeRecord {
    pub fn new(question: &str, answer: &str, keywords: &[&str]) -> Self {
        Self {
            question: question.to_owned(),
            answer: answer.to_owned(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            category: None,
        }
    }
}

#[serenity::async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Entries of `server_id` carrying at least one of `keywords`.
    ///
    /// Callers must not pass more than [`MAX_KEYWORDS_PER_QUERY`] keywords at a time.
    async fn query_by_keywords(
        &self,
        server_id: &str,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<Arc<KnowledgeEntry>>>;
}

/// Knowledge store held in memory, optionally filled from JSON knowledge files.
pub struct MemoryKnowledgeStore {
    servers: RwLock<HashMap<String, Vec<Arc<KnowledgeEntry>>>>,
    next_id: AtomicU64,
}

impl MemoryKnowledgeStore {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Replace every entry of `server_id`.  Records missing a question or answer are skipped.
    /// Returns the number of entries stored.
    pub async fn replace_server(&self, server_id: &str, records: Vec<KnowledgeRecord>) -> usize {
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let question = record.question.trim();
            let answer = record.answer.trim();
            if question.is_empty() || answer.is_empty() {
                log_warn!("Skipping knowledge entry without question or answer in {}", server_id);
                continue;
            }

            let mut keywords: BTreeSet<String> = record
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
            if keywords.is_empty() {
                keywords.extend(extract_keywords(question, answer));
            }

            entries.push(Arc::new(KnowledgeEntry {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                server_id: server_id.to_owned(),
                question: question.to_owned(),
                answer: answer.to_owned(),
                keywords,
                category: record.category.filter(|c| !c.trim().is_empty()),
            }));
        }

        let count = entries.len();
        self.servers
            .write()
            .await
            .insert(server_id.to_owned(), entries);
        count
    }

    pub async fn entry_count(&self, server_id: &str) -> usize {
        self.servers
            .read()
            .await
            .get(server_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Load `<server_id>.json` knowledge files from `dir`.  A missing directory is an empty
    /// knowledge base, not an error.  Returns the number of servers loaded.
    pub async fn load_dir(&self, dir: &Path) -> Result<usize> {
        let mut read_dir = match tokio::fs::read_dir(dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log_internal!("No knowledge directory at `{}`", dir.to_string_lossy());
                return Ok(0);
            }
            Err(e) => {
                return Err(anyhow!(
                    "Could not read knowledge directory `{}`: {}",
                    dir.to_string_lossy(),
                    e
                ))
            }
        };

        let mut servers = 0;
        while let Some(dir_entry) = read_dir.next_entry().await? {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(server_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let records = read_knowledge_file(&path).await?;
            let count = self.replace_server(server_id, records).await;
            log_internal!("Loaded {} knowledge entries for server {}", count, server_id);
            servers += 1;
        }

        Ok(servers)
    }

    /// Reload a single server's knowledge file from `dir`.  Returns the number of entries.
    pub async fn reload_server(&self, dir: &Path, server_id: &str) -> Result<usize> {
        let path = dir.join(format!("{}.json", server_id));
        let records = match tokio::fs::metadata(&path).await {
            Ok(_) => read_knowledge_file(&path).await?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(self.replace_server(server_id, records).await)
    }
}

async fn read_knowledge_file(path: &Path) -> Result<Vec<KnowledgeRecord>> {
    let data = tokio::fs::read(path).await.map_err(|e| {
        anyhow!(
            "Could not read knowledge file `{}`: {}",
            path.to_string_lossy(),
            e
        )
    })?;
    serde_json::from_slice(&data).map_err(|e| {
        anyhow!(
            "Could not parse knowledge file `{}`: {}",
            path.to_string_lossy(),
            e
        )
    })
}

#[serenity::async_trait]
impl KnowledgeStore for MemoryKnowledgeStore {
    async fn query_by_keywords(
        &self,
        server_id: &str,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<Arc<KnowledgeEntry>>> {
        if keywords.len() > MAX_KEYWORDS_PER_QUERY {
            bail!(
                "At most {} keywords per query, got {}",
                MAX_KEYWORDS_PER_QUERY,
                keywords.len()
            );
        }

        let servers = self.servers.read().await;
        let Some(entries) = servers.get(server_id) else {
            return Ok(Vec::new());
        };

        Ok(entries
            .iter()
            .filter(|entry| keywords.iter().any(|k| entry.keywords.contains(k)))
            .take(limit)
            .cloned()
            .collect())
    }
}
