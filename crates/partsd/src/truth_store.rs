//! Read-only catalog: part records and model compatibility sets.
//!
//! Loaded once at startup from the data-preparation output. A load failure
//! is fatal; after that the store is shared behind an `Arc` and never
//! mutated.

use parts_common::{PartRecord, PartsError, RawPartRecord};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::sync::Arc;
use tracing::info;

use crate::extractor::Extraction;

/// By-id lookups done for extracted identifiers while the planner runs
#[derive(Debug, Clone, Default)]
pub struct Prefetch {
    pub part: Option<Arc<PartRecord>>,
    pub part_id: Option<String>,
    pub model_id: Option<String>,
    pub model_known: bool,
}

pub struct TruthStore {
    parts: HashMap<String, Arc<PartRecord>>,
    models: HashMap<String, HashSet<String>>,
    /// All parts, best rated first
    by_rating: Vec<Arc<PartRecord>>,
}

impl TruthStore {
    /// Load both tables from disk
    pub fn load(parts_path: &str, models_path: &str) -> Result<Self, PartsError> {
        let raw_parts = fs::read_to_string(parts_path)
            .map_err(|e| PartsError::data_load(parts_path, e))?;
        let part_map: HashMap<String, RawPartRecord> = serde_json::from_str(&raw_parts)
            .map_err(|e| PartsError::data_load(parts_path, e))?;

        let raw_models = fs::read_to_string(models_path)
            .map_err(|e| PartsError::data_load(models_path, e))?;
        let model_map: HashMap<String, Vec<String>> = serde_json::from_str(&raw_models)
            .map_err(|e| PartsError::data_load(models_path, e))?;

        if part_map.is_empty() {
            return Err(PartsError::data_load(parts_path, "catalog contains no parts"));
        }

        let records = part_map
            .into_iter()
            .map(|(key, mut raw)| {
                if raw.part_id.trim().is_empty() {
                    raw.part_id = key;
                }
                PartRecord::from(raw)
            })
            .collect();

        let store = Self::from_records(records, model_map);
        info!(
            "Loaded {} parts from {}, {} models from {}",
            store.part_count(),
            parts_path,
            store.model_count(),
            models_path
        );
        Ok(store)
    }

    /// Build from in-memory tables
    pub fn from_records(records: Vec<PartRecord>, models: HashMap<String, Vec<String>>) -> Self {
        let parts: HashMap<String, Arc<PartRecord>> = records
            .into_iter()
            .map(|r| (r.part_id.clone(), Arc::new(r)))
            .collect();

        let models = models
            .into_iter()
            .map(|(model, ids)| {
                let set = ids.into_iter().map(|id| id.trim().to_uppercase()).collect();
                (model.trim().to_uppercase(), set)
            })
            .collect();

        let mut by_rating: Vec<Arc<PartRecord>> = parts.values().cloned().collect();
        by_rating.sort_by(|a, b| {
            b.rating
                .unwrap_or(0.0)
                .total_cmp(&a.rating.unwrap_or(0.0))
                .then_with(|| a.part_id.cmp(&b.part_id))
        });

        Self {
            parts,
            models,
            by_rating,
        }
    }

    pub fn part(&self, part_id: &str) -> Option<Arc<PartRecord>> {
        self.parts.get(&part_id.to_uppercase()).cloned()
    }

    pub fn has_part(&self, part_id: &str) -> bool {
        self.parts.contains_key(&part_id.to_uppercase())
    }

    pub fn has_model(&self, model_id: &str) -> bool {
        self.models.contains_key(&model_id.to_uppercase())
    }

    pub fn compatible_parts(&self, model_id: &str) -> Option<&HashSet<String>> {
        self.models.get(&model_id.to_uppercase())
    }

    /// Store-derived compatibility fact. Unknown model means false.
    pub fn is_compatible(&self, model_id: &str, part_id: &str) -> bool {
        self.compatible_parts(model_id)
            .map(|set| set.contains(&part_id.to_uppercase()))
            .unwrap_or(false)
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Iterate every record (index construction)
    pub fn records(&self) -> impl Iterator<Item = &Arc<PartRecord>> {
        self.by_rating.iter()
    }

    /// Best-rated parts, optionally restricted to a compatibility set or an
    /// appliance. An appliance filter that matches nothing is dropped.
    pub fn popular(
        &self,
        allowed: Option<&HashSet<String>>,
        appliance: Option<&str>,
        limit: usize,
    ) -> Vec<Arc<PartRecord>> {
        let in_set = |r: &&Arc<PartRecord>| allowed.map_or(true, |set| set.contains(&r.part_id));

        if let Some(appliance) = appliance {
            let matching: Vec<Arc<PartRecord>> = self
                .by_rating
                .iter()
                .filter(in_set)
                .filter(|r| r.appliance.as_deref() == Some(appliance))
                .take(limit)
                .cloned()
                .collect();
            if !matching.is_empty() {
                return matching;
            }
        }

        self.by_rating
            .iter()
            .filter(in_set)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Look up the extracted identifiers
    pub async fn prefetch(&self, extraction: &Extraction) -> Prefetch {
        let part_id = extraction.part_ids.first().cloned();
        let model_id = extraction.model_ids.first().cloned();
        Prefetch {
            part: part_id.as_deref().and_then(|id| self.part(id)),
            model_known: model_id.as_deref().map_or(false, |id| self.has_model(id)),
            part_id,
            model_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::extract;
    use std::io::Write;

    fn store() -> TruthStore {
        let records = vec![
            PartRecord::new("PS100001", "Ice Maker Assembly")
                .with_appliance("refrigerator")
                .with_rating(4.8),
            PartRecord::new("PS100002", "Door Shelf Bin")
                .with_appliance("refrigerator")
                .with_rating(4.9),
            PartRecord::new("PS200001", "Dishwasher Pump")
                .with_appliance("dishwasher")
                .with_rating(4.5),
        ];
        let mut models = HashMap::new();
        models.insert(
            "wrs325fdam04".to_string(),
            vec!["PS100001".to_string(), "ps100002".to_string()],
        );
        TruthStore::from_records(records, models)
    }

    #[test]
    fn test_lookups_are_case_insensitive() {
        let store = store();
        assert!(store.has_part("ps100001"));
        assert!(store.has_model("WRS325FDAM04"));
        assert!(store.is_compatible("wrs325fdam04", "PS100002"));
        assert!(!store.is_compatible("WRS325FDAM04", "PS200001"));
        assert!(!store.is_compatible("UNKNOWN123", "PS100001"));
    }

    #[test]
    fn test_popular_ordering_and_filters() {
        let store = store();
        let all = store.popular(None, None, 10);
        assert_eq!(all[0].part_id, "PS100002");

        let dish = store.popular(None, Some("dishwasher"), 10);
        assert_eq!(dish.len(), 1);
        assert_eq!(dish[0].part_id, "PS200001");

        let set = store.compatible_parts("WRS325FDAM04").cloned();
        let compat = store.popular(set.as_ref(), Some("dishwasher"), 10);
        // appliance filter matched nothing inside the set, so it is dropped
        assert_eq!(compat.len(), 2);
        assert!(compat.iter().all(|r| r.part_id.starts_with("PS1")));
    }

    #[tokio::test]
    async fn test_prefetch() {
        let store = store();
        let pf = store.prefetch(&extract("PS100001 for WRS325FDAM04")).await;
        assert_eq!(pf.part.map(|p| p.part_id.clone()), Some("PS100001".to_string()));
        assert!(pf.model_known);

        let pf = store.prefetch(&extract("PS999999")).await;
        assert!(pf.part.is_none());
        assert_eq!(pf.part_id.as_deref(), Some("PS999999"));
    }

    #[test]
    fn test_load_from_disk() {
        let mut parts = tempfile::NamedTempFile::new().unwrap();
        write!(
            parts,
            r#"{{"PS11752778": {{"title": "Door Shelf Bin", "price": "$44.95", "product_types": "Refrigerator", "rating": "4.9"}}}}"#
        )
        .unwrap();
        let mut models = tempfile::NamedTempFile::new().unwrap();
        write!(models, r#"{{"WDT780SAEM1": ["PS11752778"]}}"#).unwrap();

        let store = TruthStore::load(
            parts.path().to_str().unwrap(),
            models.path().to_str().unwrap(),
        )
        .unwrap();
        assert_eq!(store.part_count(), 1);
        let part = store.part("PS11752778").unwrap();
        assert_eq!(part.title, "Door Shelf Bin");
        assert!(store.is_compatible("WDT780SAEM1", "PS11752778"));
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let err = TruthStore::load("/nonexistent/parts.json", "/nonexistent/models.json")
            .err()
            .unwrap();
        assert_eq!(err.code(), "data_load");
    }
}
