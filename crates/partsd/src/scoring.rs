//! Confidence scoring.
//!
//! One deterministic weighted sum over extraction, validation, planner and
//! session signals. It is the only signal the router gates on.

use crate::planner::Plan;
use crate::resolver::ResolvedEntities;
use crate::session::Carryover;

pub const W_PART_REGEX: f64 = 0.10;
pub const W_MODEL_REGEX: f64 = 0.10;
pub const W_PART_VALID: f64 = 0.15;
pub const W_MODEL_VALID: f64 = 0.15;
pub const W_MODEL_UNVALIDATED: f64 = 0.08;
pub const W_PLANNER: f64 = 0.40;
pub const W_SESSION_MODEL_WITH_SYMPTOM: f64 = 0.05;
pub const W_SESSION_SYMPTOM: f64 = 0.05;

/// Every input the score depends on
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConfidenceSignals {
    pub part_regex_hit: bool,
    pub model_regex_hit: bool,
    pub part_id_valid: bool,
    pub model_id_valid: bool,
    pub model_present_but_unvalidated: bool,
    pub planner_confidence: f64,
    pub session_has_model: bool,
    pub current_turn_has_symptom: bool,
    pub session_has_last_symptom: bool,
}

impl ConfidenceSignals {
    pub fn gather(resolved: &ResolvedEntities, plan: &Plan, carry: &Carryover) -> Self {
        Self {
            part_regex_hit: resolved.part_from_turn,
            model_regex_hit: resolved.model_from_turn,
            part_id_valid: resolved.part_id_valid,
            model_id_valid: resolved.model_id_valid,
            model_present_but_unvalidated: resolved.model_present_but_unvalidated,
            planner_confidence: plan.planner_confidence,
            session_has_model: carry.model.is_some(),
            current_turn_has_symptom: plan.symptom.is_some(),
            session_has_last_symptom: carry.symptom.is_some(),
        }
    }
}

fn term(hit: bool, weight: f64) -> f64 {
    if hit {
        weight
    } else {
        0.0
    }
}

/// Score in [0, 1]. A non-finite planner confidence counts as zero.
pub fn score(s: &ConfidenceSignals) -> f64 {
    let planner = if s.planner_confidence.is_finite() {
        s.planner_confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let total = term(s.part_regex_hit, W_PART_REGEX)
        + term(s.model_regex_hit, W_MODEL_REGEX)
        + term(s.part_id_valid, W_PART_VALID)
        + term(s.model_id_valid, W_MODEL_VALID)
        + term(s.model_present_but_unvalidated, W_MODEL_UNVALIDATED)
        + W_PLANNER * planner
        + term(
            s.session_has_model && s.current_turn_has_symptom,
            W_SESSION_MODEL_WITH_SYMPTOM,
        )
        + term(s.session_has_last_symptom, W_SESSION_SYMPTOM);

    // Round away float noise so thresholds compare on the intended value
    ((total * 1e9).round() / 1e9).clamp(0.0, 1.0)
}
