//! Entity resolution.
//!
//! Merges extracted, planned and carried entities, then checks the result
//! against the catalog. Planner-supplied ids count for nothing until the
//! store confirms them.

use once_cell::sync::Lazy;
use parts_common::PartRecord;
use regex::Regex;
use std::sync::Arc;
use tracing::debug;

use crate::extractor::Candidate;
use crate::planner::{Intent, Plan};
use crate::session::Carryover;
use crate::truth_store::{Prefetch, TruthStore};

/// Phrases that point back at the part discussed earlier
static PART_REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b((this|that|the|same) (part|one|piece)|it)\b")
        .expect("part reference pattern is valid")
});

#[derive(Debug, Clone, Default)]
pub struct ResolvedEntities {
    pub intent: Option<Intent>,
    pub part_id: Option<String>,
    pub model_id: Option<String>,
    pub symptom: Option<String>,
    pub appliance: Option<String>,
    pub brand: Option<String>,
    pub part_id_valid: bool,
    pub model_id_valid: bool,
    pub model_present_but_unvalidated: bool,
    /// Kept part id was matched by the extractor on this turn
    pub part_from_turn: bool,
    /// Kept model id was matched by the extractor on this turn
    pub model_from_turn: bool,
    pub model_from_session: bool,
    pub symptom_from_session: bool,
    /// Catalog record for a valid part
    pub part: Option<Arc<PartRecord>>,
}

impl ResolvedEntities {
    pub fn intent(&self) -> Intent {
        self.intent.unwrap_or(Intent::ClarificationNeeded)
    }

    pub fn has_any_entity(&self) -> bool {
        self.part_id.is_some() || self.model_id.is_some() || self.symptom.is_some()
    }
}

pub fn refers_to_previous_part(text: &str) -> bool {
    PART_REFERENCE_RE.is_match(text)
}

/// Resolve entities for one turn. `carry` is the session state after any
/// topic-drift reset.
pub fn resolve(
    text: &str,
    candidate: &Candidate,
    prefetch: &Prefetch,
    plan: &Plan,
    carry: &Carryover,
    store: &TruthStore,
) -> ResolvedEntities {
    let intent = plan.intent;

    let part_id = candidate
        .part_id
        .clone()
        .or_else(|| plan.part_id.clone())
        .or_else(|| {
            carry
                .part
                .clone()
                .filter(|_| refers_to_previous_part(text))
        });

    let (model_id, model_from_session) = match candidate.model_id.clone().or_else(|| plan.model_id.clone()) {
        Some(model) => (Some(model), false),
        None => (carry.model.clone(), carry.model.is_some()),
    };

    // A fresh model reply with no symptom of its own continues the open one
    let turn_supplies_model = candidate.model_id.is_some() || plan.model_id.is_some();
    let (symptom, symptom_from_session) = match plan.symptom.clone() {
        Some(s) => (Some(s), false),
        None => {
            let continues = turn_supplies_model
                && part_id.is_none()
                && !intent.is_lookup()
                && intent != Intent::CompatibilityCheck;
            match carry.symptom.clone().filter(|_| continues) {
                Some(s) => (Some(s), true),
                None => (None, false),
            }
        }
    };

    let part = match (&part_id, &prefetch.part_id) {
        (Some(id), Some(pre)) if id == pre => prefetch.part.clone(),
        (Some(id), _) => store.part(id),
        (None, _) => None,
    };
    let part_id_valid = part.is_some();

    let model_id_valid = match (&model_id, &prefetch.model_id) {
        (Some(id), Some(pre)) if id == pre => prefetch.model_known,
        (Some(id), _) => store.has_model(id),
        (None, _) => false,
    };
    let model_present_but_unvalidated = model_id.is_some() && !model_id_valid;

    let appliance = plan
        .appliance
        .clone()
        .or_else(|| part.as_ref().and_then(|p| p.appliance.clone()))
        .or_else(|| carry.appliance.clone());

    let resolved = ResolvedEntities {
        intent: Some(intent),
        part_from_turn: candidate.part_matched && part_id.is_some() && candidate.part_id == part_id,
        model_from_turn: candidate.model_matched
            && model_id.is_some()
            && candidate.model_id == model_id,
        part_id,
        model_id,
        symptom,
        appliance,
        brand: plan.brand.clone().or_else(|| carry.brand.clone()),
        part_id_valid,
        model_id_valid,
        model_present_but_unvalidated,
        model_from_session,
        symptom_from_session,
        part,
    };

    debug!(
        "Resolved: part={:?} (valid={}), model={:?} (valid={}), symptom={:?}",
        resolved.part_id,
        resolved.part_id_valid,
        resolved.model_id,
        resolved.model_id_valid,
        resolved.symptom
    );
    resolved
}
