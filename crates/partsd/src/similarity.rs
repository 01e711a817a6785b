//! Similarity search boundary.
//!
//! The engine owns no embedding logic. `HttpSimilarityIndex` forwards to a
//! vector-search sidecar; `LexicalIndex` is an in-process token-overlap
//! index over the catalog for development and degraded operation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::truth_store::TruthStore;

/// Words ignored by token matching
pub const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "at", "be", "but", "by", "for", "from", "has", "have", "i", "in",
    "is", "it", "its", "it's", "my", "of", "on", "or", "the", "this", "that", "to", "was",
    "with", "not", "isn't", "won't", "doesn't", "does", "do", "me", "when", "what", "how",
];

/// Lowercased alphanumeric tokens without stopwords
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .map(|t| t.trim_matches('\''))
        .filter(|t| t.len() > 1 && !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityHit {
    pub part_id: String,
    /// In [0, 1], higher is closer
    pub similarity: f64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IndexError {
    #[error("index unavailable: {0}")]
    Unavailable(String),

    #[error("invalid index response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SimilarityHit>, IndexError>;

    fn name(&self) -> &str;
}

// ============================================================================
// HTTP sidecar
// ============================================================================

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    k: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: Vec<SimilarityHit>,
}

pub struct HttpSimilarityIndex {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSimilarityIndex {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl SimilarityIndex for HttpSimilarityIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SimilarityHit>, IndexError> {
        let url = format!("{}/search", self.endpoint);
        let response = self
            .client
            .post(&url)
            .json(&SearchRequest { query, k })
            .send()
            .await
            .map_err(|e| IndexError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(IndexError::Unavailable(format!(
                "HTTP {} from index",
                response.status()
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| IndexError::InvalidResponse(e.to_string()))?;

        Ok(body
            .hits
            .into_iter()
            .filter(|h| h.similarity.is_finite())
            .map(|mut h| {
                h.part_id = h.part_id.to_uppercase();
                h.similarity = h.similarity.clamp(0.0, 1.0);
                h
            })
            .take(k)
            .collect())
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ============================================================================
// Lexical index
// ============================================================================

struct IndexedPart {
    part_id: String,
    title_tokens: HashSet<String>,
    tokens: HashSet<String>,
    appliance: Option<String>,
    title: String,
}

/// Token-overlap index. Similarity is the share of query tokens found in the
/// part's text, with title hits weighted up, capped at 1.
pub struct LexicalIndex {
    parts: Vec<IndexedPart>,
}

impl LexicalIndex {
    pub fn from_store(store: &TruthStore) -> Self {
        let parts = store
            .records()
            .map(|r| IndexedPart {
                part_id: r.part_id.clone(),
                title_tokens: tokenize(&r.title).into_iter().collect(),
                tokens: tokenize(&r.search_text()).into_iter().collect(),
                appliance: r.appliance.clone(),
                title: r.title.clone(),
            })
            .collect();
        Self { parts }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn score(&self, query: &HashSet<String>, part: &IndexedPart) -> f64 {
        if query.is_empty() {
            return 0.0;
        }
        let body = query.iter().filter(|t| part.tokens.contains(*t)).count() as f64;
        let title = query.iter().filter(|t| part.title_tokens.contains(*t)).count() as f64;
        let n = query.len() as f64;
        (0.7 * body / n + 0.3 * title / n).min(1.0)
    }
}

#[async_trait]
impl SimilarityIndex for LexicalIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SimilarityHit>, IndexError> {
        let query: HashSet<String> = tokenize(query).into_iter().collect();
        let mut scored: Vec<(&IndexedPart, f64)> = self
            .parts
            .iter()
            .map(|p| (p, self.score(&query, p)))
            .filter(|(_, s)| *s > 0.0)
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.part_id.cmp(&b.0.part_id)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(p, s)| {
                let mut meta = HashMap::new();
                meta.insert("title", serde_json::Value::from(p.title.clone()));
                if let Some(a) = &p.appliance {
                    meta.insert("appliance", serde_json::Value::from(a.clone()));
                }
                SimilarityHit {
                    part_id: p.part_id.clone(),
                    similarity: s,
                    metadata: serde_json::json!(meta),
                }
            })
            .collect())
    }

    fn name(&self) -> &str {
        "lexical"
    }
}

/// Index that always fails, for exercising fallbacks
pub struct UnavailableIndex;

#[async_trait]
impl SimilarityIndex for UnavailableIndex {
    async fn search(&self, _query: &str, _k: usize) -> Result<Vec<SimilarityHit>, IndexError> {
        Err(IndexError::Unavailable("index offline".to_string()))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}
