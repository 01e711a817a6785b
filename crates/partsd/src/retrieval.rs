//! Retrieval and reranking for symptom-driven answers.
//!
//! Query building, index search under a deadline, the compatibility hard
//! filter, reranking and the broadened/popular fallbacks.
//!
//! Score components and their ranges:
//!
//! | component       | range            |
//! |-----------------|------------------|
//! | similarity      | [0, 1]           |
//! | symptom_boost   | [0, 0.15]        |
//! | rating_boost    | [-0.075, 0.05]   |
//! | price_penalty   | {-0.05, 0}       |
//!
//! Similarity stays the primary ordering signal; compatibility is never a
//! score component, it removes candidates before ranking.

use parts_common::records::RankingFactors;
use parts_common::{Fit, PartRecord, PartView};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::RetrievalConfig;
use crate::metrics::EngineMetrics;
use crate::similarity::{tokenize, SimilarityHit, SimilarityIndex};
use crate::truth_store::TruthStore;

/// Longest query sent to the index
pub const MAX_QUERY_CHARS: usize = 180;

const SYMPTOM_BOOST_PER_MATCH: f64 = 0.05;
const SYMPTOM_BOOST_CAP: f64 = 0.15;
const RATING_BOOST_PER_STAR: f64 = 0.025;
const PRICE_PENALTY: f64 = -0.05;
const PRICE_PENALTY_ABOVE: f64 = 100.0;

/// Similarity assigned to popular-fallback parts
const POPULAR_SIMILARITY: f64 = 0.5;
const POPULAR_OTHER_APPLIANCE_SIMILARITY: f64 = 0.4;

/// A catalog record with its ranking breakdown
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub record: Arc<PartRecord>,
    pub similarity: f64,
    pub symptom_boost: f64,
    pub rating_boost: f64,
    pub price_penalty: f64,
    pub final_score: f64,
}

impl RankedCandidate {
    pub fn new(record: Arc<PartRecord>, similarity: f64, symptom: &str) -> Self {
        let similarity = if similarity.is_finite() {
            similarity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let symptom_boost = symptom_boost(symptom, &record);
        let rating_boost = rating_boost(record.rating);
        let price_penalty = price_penalty(record.price);
        Self {
            final_score: similarity + symptom_boost + rating_boost + price_penalty,
            record,
            similarity,
            symptom_boost,
            rating_boost,
            price_penalty,
        }
    }

    pub fn view(&self) -> PartView {
        PartView::from(self.record.as_ref()).with_ranking(
            self.final_score,
            RankingFactors {
                similarity: self.similarity,
                symptom_boost: self.symptom_boost,
                rating_boost: self.rating_boost,
                price_penalty: self.price_penalty,
            },
        )
    }
}

/// Symptom keywords found in the part's symptom tags, 0.05 each, capped
pub fn symptom_boost(symptom: &str, record: &PartRecord) -> f64 {
    let tags: HashSet<String> = tokenize(&record.symptoms.join(" ")).into_iter().collect();
    let keywords: HashSet<String> = tokenize(symptom).into_iter().collect();
    let matches = keywords.iter().filter(|k| tags.contains(*k)).count() as f64;
    (matches * SYMPTOM_BOOST_PER_MATCH).min(SYMPTOM_BOOST_CAP)
}

/// (rating - 3) * 0.025, so a 5-star part gains 0.05 and a 0-star loses 0.075
pub fn rating_boost(rating: Option<f32>) -> f64 {
    match rating {
        Some(r) if r.is_finite() => (f64::from(r.clamp(0.0, 5.0)) - 3.0) * RATING_BOOST_PER_STAR,
        _ => 0.0,
    }
}

pub fn price_penalty(price: Option<f64>) -> f64 {
    match price {
        Some(p) if p > PRICE_PENALTY_ABOVE => PRICE_PENALTY,
        _ => 0.0,
    }
}

/// Descending final score; ties by rating, then id
pub fn sort_ranked(ranked: &mut [RankedCandidate]) {
    ranked.sort_by(|a, b| {
        b.final_score
            .total_cmp(&a.final_score)
            .then_with(|| {
                b.record
                    .rating
                    .unwrap_or(0.0)
                    .total_cmp(&a.record.rating.unwrap_or(0.0))
            })
            .then_with(|| a.record.part_id.cmp(&b.record.part_id))
    });
}

/// Symptom + appliance + brand with repeated words removed, capped in length
pub fn build_query(symptom: &str, appliance: Option<&str>, brand: Option<&str>) -> String {
    let mut seen = HashSet::new();
    let mut words = Vec::new();
    let raw = [Some(symptom), appliance, brand];
    for word in raw.iter().flatten().flat_map(|s| s.split_whitespace()) {
        if seen.insert(word.to_lowercase()) {
            words.push(word);
        }
    }

    let mut query = String::new();
    for word in words {
        let extra = if query.is_empty() { word.len() } else { word.len() + 1 };
        if query.len() + extra > MAX_QUERY_CHARS {
            break;
        }
        if !query.is_empty() {
            query.push(' ');
        }
        query.push_str(word);
    }
    query
}

/// Which stage produced the result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalPath {
    Primary,
    Broadened,
    Popular,
    Empty,
}

impl fmt::Display for RetrievalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetrievalPath::Primary => "primary",
            RetrievalPath::Broadened => "broadened",
            RetrievalPath::Popular => "popular",
            RetrievalPath::Empty => "empty",
        })
    }
}

#[derive(Debug, Clone)]
pub struct Retrieval {
    pub parts: Vec<RankedCandidate>,
    pub path: RetrievalPath,
    pub fit: Fit,
    pub query: String,
}

impl Retrieval {
    pub fn views(&self) -> Vec<PartView> {
        self.parts.iter().map(RankedCandidate::view).collect()
    }
}

/// Inputs for one symptom retrieval
#[derive(Debug, Clone, Copy)]
pub struct RetrievalRequest<'a> {
    pub symptom: &'a str,
    pub appliance: Option<&'a str>,
    pub brand: Option<&'a str>,
    /// Compatibility set of a validated model. Hard filter when present.
    pub allowed: Option<&'a HashSet<String>>,
}

pub struct Retriever {
    index: Arc<dyn SimilarityIndex>,
    store: Arc<TruthStore>,
    top_k: usize,
    top_n: usize,
    timeout: Duration,
    metrics: Option<EngineMetrics>,
}

impl Retriever {
    pub fn new(
        index: Arc<dyn SimilarityIndex>,
        store: Arc<TruthStore>,
        config: &RetrievalConfig,
    ) -> Self {
        Self {
            index,
            store,
            top_k: config.top_k.max(1),
            top_n: config.top_n.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Index search under the deadline. Failures and timeouts yield nothing.
    pub async fn search(&self, query: &str, k: usize) -> Vec<SimilarityHit> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        match tokio::time::timeout(self.timeout, self.index.search(query, k)).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                warn!("Similarity search failed ({}): {}", self.index.name(), e);
                Vec::new()
            }
            Err(_) => {
                warn!(
                    "Similarity search timed out after {}s ({})",
                    self.timeout.as_secs(),
                    self.index.name()
                );
                Vec::new()
            }
        }
    }

    /// Join hits to catalog records, apply the hard filter, rerank
    fn rank_hits(
        &self,
        hits: Vec<SimilarityHit>,
        symptom: &str,
        allowed: Option<&HashSet<String>>,
        exclude: Option<&str>,
    ) -> Vec<RankedCandidate> {
        let mut seen = HashSet::new();
        let mut ranked: Vec<RankedCandidate> = hits
            .into_iter()
            .filter(|h| allowed.map_or(true, |set| set.contains(&h.part_id)))
            .filter(|h| exclude.map_or(true, |x| !h.part_id.eq_ignore_ascii_case(x)))
            .filter(|h| seen.insert(h.part_id.clone()))
            .filter_map(|h| {
                self.store
                    .part(&h.part_id)
                    .map(|record| RankedCandidate::new(record, h.similarity, symptom))
            })
            .collect();
        sort_ranked(&mut ranked);
        ranked
    }

    fn popular(&self, request: &RetrievalRequest<'_>) -> Vec<RankedCandidate> {
        let mut ranked: Vec<RankedCandidate> = self
            .store
            .popular(request.allowed, request.appliance, self.top_n)
            .into_iter()
            .map(|record| {
                let same_appliance = request.appliance.is_some()
                    && record.appliance.as_deref() == request.appliance;
                let similarity = if same_appliance || request.appliance.is_none() {
                    POPULAR_SIMILARITY
                } else {
                    POPULAR_OTHER_APPLIANCE_SIMILARITY
                };
                RankedCandidate::new(record, similarity, request.symptom)
            })
            .collect();
        sort_ranked(&mut ranked);
        ranked
    }

    /// Primary search, then a broadened query, then popular parts
    pub async fn retrieve(&self, request: &RetrievalRequest<'_>) -> Retrieval {
        let fit = if request.allowed.is_some() {
            Fit::Verified
        } else {
            Fit::Unverified
        };
        let query = build_query(request.symptom, request.appliance, request.brand);

        let hits = self.search(&query, self.top_k).await;
        let mut ranked = self.rank_hits(hits, request.symptom, request.allowed, None);
        let mut path = RetrievalPath::Primary;

        if ranked.is_empty() {
            let broad = format!("{} common parts", request.appliance.unwrap_or("appliance"));
            warn!("No results for '{}', trying '{}'", query, broad);
            let hits = self.search(&broad, self.top_k).await;
            ranked = self.rank_hits(hits, request.symptom, request.allowed, None);
            path = RetrievalPath::Broadened;
        }

        if ranked.is_empty() {
            warn!("Broadened search empty, using popular parts");
            ranked = self.popular(request);
            path = RetrievalPath::Popular;
        }

        if ranked.is_empty() {
            path = RetrievalPath::Empty;
        }

        ranked.truncate(self.top_n);
        if let Some(metrics) = &self.metrics {
            metrics.record_retrieval(&path.to_string());
        }
        info!(
            "Retrieval: path={}, fit={:?}, parts={}, query='{}'",
            path,
            fit,
            ranked.len(),
            query
        );
        Retrieval {
            parts: ranked,
            path,
            fit,
            query,
        }
    }

    /// Parts similar to `record`, excluding it
    pub async fn similar_to(&self, record: &PartRecord, limit: usize) -> Vec<RankedCandidate> {
        let text = format!(
            "{} {} {}",
            record.title,
            record.description,
            record.symptoms.join(" ")
        );
        let query: String = text.chars().take(MAX_QUERY_CHARS * 2).collect();
        let hits = self.search(&query, 8).await;
        let symptom = record.symptoms.join(" ");
        let mut ranked = self.rank_hits(hits, &symptom, None, Some(&record.part_id));
        ranked.truncate(limit);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::similarity::{LexicalIndex, UnavailableIndex};
    use std::collections::HashMap;

    fn store() -> Arc<TruthStore> {
        let records = vec![
            PartRecord::new("PS100001", "Ice Maker Assembly")
                .with_symptoms(&["Ice maker not making ice"])
                .with_appliance("refrigerator")
                .with_rating(4.5)
                .with_price(120.0),
            PartRecord::new("PS100002", "Ice Maker Water Valve")
                .with_symptoms(&["Ice maker not making ice", "Leaking"])
                .with_appliance("refrigerator")
                .with_rating(4.8)
                .with_price(40.0),
            PartRecord::new("PS100003", "Door Gasket")
                .with_symptoms(&["Leaking"])
                .with_appliance("refrigerator")
                .with_rating(4.9),
            PartRecord::new("PS200001", "Dishwasher Drain Pump")
                .with_symptoms(&["Not draining"])
                .with_appliance("dishwasher")
                .with_rating(4.2),
        ];
        let mut models = HashMap::new();
        models.insert(
            "WRS325FDAM04".to_string(),
            vec!["PS100001".to_string(), "PS100003".to_string()],
        );
        Arc::new(TruthStore::from_records(records, models))
    }

    fn retriever(store: Arc<TruthStore>) -> Retriever {
        let index = Arc::new(LexicalIndex::from_store(&store));
        Retriever::new(index, store, &RetrievalConfig::default())
    }

    #[test]
    fn test_build_query_dedups_and_caps() {
        assert_eq!(
            build_query("Ice maker not making ice", Some("refrigerator"), Some("Whirlpool")),
            "Ice maker not making refrigerator Whirlpool"
        );
        let long = "word ".repeat(100);
        assert!(build_query(&long, None, None).len() <= MAX_QUERY_CHARS);
        let varied: String = (0..100).map(|i| format!("w{} ", i)).collect();
        assert!(build_query(&varied, None, None).len() <= MAX_QUERY_CHARS);
    }

    #[test]
    fn test_component_bounds() {
        assert_eq!(rating_boost(Some(5.0)), 0.05);
        assert_eq!(rating_boost(Some(0.0)), -0.075);
        assert_eq!(rating_boost(None), 0.0);
        assert_eq!(price_penalty(Some(100.01)), -0.05);
        assert_eq!(price_penalty(Some(100.0)), 0.0);
        let record = PartRecord::new("PS1", "x").with_symptoms(&["a b c d e f"]);
        assert_eq!(symptom_boost("a b c d e f", &record), SYMPTOM_BOOST_CAP);
    }

    #[test]
    fn test_sort_ties_broken_by_rating_then_id() {
        let a = Arc::new(PartRecord::new("PS2", "x").with_rating(4.0));
        let b = Arc::new(PartRecord::new("PS1", "x").with_rating(4.0));
        let c = Arc::new(PartRecord::new("PS3", "x").with_rating(4.5));
        let mut ranked = vec![
            RankedCandidate::new(a, 0.5, ""),
            RankedCandidate::new(b, 0.5, ""),
            RankedCandidate::new(c, 0.4875, ""),
        ];
        sort_ranked(&mut ranked);
        // c: 0.4875 + 0.0375 = 0.525 beats 0.5 + 0.025
        let ids: Vec<&str> = ranked.iter().map(|r| r.record.part_id.as_str()).collect();
        assert_eq!(ids, vec!["PS3", "PS1", "PS2"]);
    }

    #[tokio::test]
    async fn test_validated_model_filters_hard() {
        let store = store();
        let allowed = store.compatible_parts("WRS325FDAM04").cloned().unwrap();
        let r = retriever(store.clone());
        let result = r
            .retrieve(&RetrievalRequest {
                symptom: "ice maker not making ice",
                appliance: Some("refrigerator"),
                brand: None,
                allowed: Some(&allowed),
            })
            .await;
        assert_eq!(result.fit, Fit::Verified);
        assert!(!result.parts.is_empty());
        for part in &result.parts {
            assert!(allowed.contains(&part.record.part_id));
        }
        // PS100002 has the better text match but is not compatible
        assert!(result.parts.iter().all(|p| p.record.part_id != "PS100002"));
    }

    #[tokio::test]
    async fn test_unfiltered_retrieval_is_unverified() {
        let r = retriever(store());
        let result = r
            .retrieve(&RetrievalRequest {
                symptom: "ice maker not making ice",
                appliance: Some("refrigerator"),
                brand: None,
                allowed: None,
            })
            .await;
        assert_eq!(result.fit, Fit::Unverified);
        assert_eq!(result.path, RetrievalPath::Primary);
        assert_eq!(result.parts[0].record.part_id, "PS100002");
        assert!(result.parts.len() <= 3);
    }

    #[tokio::test]
    async fn test_index_outage_falls_back_to_popular() {
        let store = store();
        let r = Retriever::new(Arc::new(UnavailableIndex), store, &RetrievalConfig::default());
        let result = r
            .retrieve(&RetrievalRequest {
                symptom: "weird smell",
                appliance: Some("dishwasher"),
                brand: None,
                allowed: None,
            })
            .await;
        assert_eq!(result.path, RetrievalPath::Popular);
        assert_eq!(result.parts[0].record.part_id, "PS200001");
    }

    #[tokio::test]
    async fn test_similar_to_excludes_self() {
        let store = store();
        let record = store.part("PS100002").unwrap();
        let r = retriever(store);
        let similar = r.similar_to(&record, 3).await;
        assert!(!similar.is_empty());
        assert!(similar.iter().all(|c| c.record.part_id != "PS100002"));
    }
}
