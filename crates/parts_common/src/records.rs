//! Catalog records.
//!
//! `RawPartRecord` mirrors the data-preparation output (every field a
//! string, lists pipe-separated). `PartRecord` is the typed form held by the
//! daemon; `PartView` is what goes over the wire.

use serde::{Deserialize, Serialize};

/// Part record exactly as written by the data-preparation step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPartRecord {
    #[serde(default)]
    pub part_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub symptoms: Option<String>,
    #[serde(default)]
    pub product_types: Option<String>,
    #[serde(default)]
    pub installation_difficulty: Option<String>,
    #[serde(default)]
    pub installation_time: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default)]
    pub related_parts: Option<String>,
}

/// Installation metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
}

impl InstallInfo {
    pub fn is_empty(&self) -> bool {
        self.difficulty.is_none() && self.time.is_none() && self.video_url.is_none()
    }
}

/// Typed, immutable catalog entry
#[derive(Debug, Clone, PartialEq)]
pub struct PartRecord {
    pub part_id: String,
    pub title: String,
    pub brand: Option<String>,
    pub price: Option<f64>,
    /// Price as the catalog displays it ("$49.99", "N/A")
    pub price_display: Option<String>,
    pub description: String,
    pub symptoms: Vec<String>,
    /// Lowercase appliance category ("refrigerator", "dishwasher")
    pub appliance: Option<String>,
    pub installation: InstallInfo,
    pub rating: Option<f32>,
    pub related: Vec<String>,
    pub url: Option<String>,
}

impl PartRecord {
    /// Minimal record, used by fixtures and the lexical index tests
    pub fn new(part_id: &str, title: &str) -> Self {
        Self {
            part_id: part_id.to_uppercase(),
            title: title.to_string(),
            brand: None,
            price: None,
            price_display: None,
            description: String::new(),
            symptoms: Vec::new(),
            appliance: None,
            installation: InstallInfo::default(),
            rating: None,
            related: Vec::new(),
            url: None,
        }
    }

    pub fn with_symptoms(mut self, symptoms: &[&str]) -> Self {
        self.symptoms = symptoms.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_appliance(mut self, appliance: &str) -> Self {
        self.appliance = normalize_appliance(appliance);
        self
    }

    pub fn with_rating(mut self, rating: f32) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self.price_display = Some(format!("${:.2}", price));
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_brand(mut self, brand: &str) -> Self {
        self.brand = Some(brand.to_string());
        self
    }

    pub fn with_related(mut self, related: &[&str]) -> Self {
        self.related = related.iter().map(|s| s.to_uppercase()).collect();
        self
    }

    /// Text the lexical index and query builders search over
    pub fn search_text(&self) -> String {
        format!(
            "{} {} {} {}",
            self.title,
            self.description,
            self.symptoms.join(" "),
            self.appliance.as_deref().unwrap_or("")
        )
    }
}

impl From<RawPartRecord> for PartRecord {
    fn from(raw: RawPartRecord) -> Self {
        let price_display = raw
            .price
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        Self {
            part_id: raw.part_id.trim().to_uppercase(),
            title: non_empty(raw.title).unwrap_or_default(),
            brand: non_empty(raw.brand),
            price: price_display.as_deref().and_then(parse_price),
            price_display,
            description: non_empty(raw.description).unwrap_or_default(),
            symptoms: split_pipe(raw.symptoms.as_deref()),
            appliance: raw.product_types.as_deref().and_then(normalize_appliance),
            installation: InstallInfo {
                difficulty: non_empty(raw.installation_difficulty),
                time: non_empty(raw.installation_time),
                video_url: non_empty(raw.video_url),
            },
            rating: raw.rating.as_deref().and_then(parse_rating),
            related: split_pipe(raw.related_parts.as_deref())
                .into_iter()
                .map(|s| s.to_uppercase())
                .collect(),
            url: non_empty(raw.url),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("n/a"))
}

/// Parse "$1,049.99" style prices. "N/A" and garbage yield None.
pub fn parse_price(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|p| p.is_finite() && *p >= 0.0)
}

/// Parse a 0-5 star rating; out-of-range values are dropped
pub fn parse_rating(raw: &str) -> Option<f32> {
    raw.trim()
        .parse::<f32>()
        .ok()
        .filter(|r| r.is_finite() && (0.0..=5.0).contains(r))
}

/// Split a pipe-separated field, trimming and dropping empties
pub fn split_pipe(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split('|')
            .map(str::trim)
            .filter(|t| !t.is_empty() && *t != "N/A")
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Map free-form product types to an appliance category
pub fn normalize_appliance(raw: &str) -> Option<String> {
    let lower = raw.trim().to_lowercase();
    if lower.is_empty() || lower == "n/a" {
        return None;
    }
    if lower.contains("dishwasher") {
        Some("dishwasher".to_string())
    } else if lower.contains("refrigerator") || lower.contains("fridge") || lower.contains("freezer")
    {
        Some("refrigerator".to_string())
    } else {
        lower
            .split(|c: char| c == ',' || c == '|')
            .next()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// Score components recorded during reranking
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingFactors {
    pub similarity: f64,
    pub symptom_boost: f64,
    pub rating_boost: f64,
    pub price_penalty: f64,
}

/// Part as presented to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartView {
    pub part_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    /// Display price; null when the catalog has none, may be "N/A"
    pub price: Option<String>,
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installation: Option<InstallInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ranking_factors: Option<RankingFactors>,
}

impl From<&PartRecord> for PartView {
    fn from(record: &PartRecord) -> Self {
        Self {
            part_id: record.part_id.clone(),
            title: record.title.clone(),
            brand: record.brand.clone(),
            price: record.price_display.clone(),
            url: record.url.clone(),
            rating: record.rating,
            installation: if record.installation.is_empty() {
                None
            } else {
                Some(record.installation.clone())
            },
            relevance_score: None,
            ranking_factors: None,
        }
    }
}

impl PartView {
    pub fn with_ranking(mut self, final_score: f64, factors: RankingFactors) -> Self {
        self.relevance_score = Some((final_score * 1000.0).round() / 1000.0);
        self.ranking_factors = Some(factors);
        self
    }
}
