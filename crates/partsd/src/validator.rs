//! Post-generation checks.
//!
//! A response is rejected when its prose names part numbers the catalog does
//! not have, when an explanation-bearing answer has no real explanation, or
//! when it claims parts the catalog does not have. Rejected responses keep
//! their valid structured records and get template prose.

use once_cell::sync::Lazy;
use parts_common::{AssistantResponse, ResponseType};
use regex::Regex;
use std::fmt;
use tracing::{info, warn};

use crate::handlers::apply_template;
use crate::truth_store::TruthStore;

/// Shortest acceptable explanation
pub const MIN_EXPLANATION_CHARS: usize = 20;

/// Shown in place of an unknown part number
const SCRUBBED: &str = "[unknown part]";

static PART_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bPS\d{5,}\b").expect("part token pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// Prose names a part id that is not in the catalog
    UnknownPartInText(String),
    ExplanationTooShort(usize),
    /// A structured part field carries an id that is not in the catalog
    UnknownClaimedPart(String),
}

impl Rejection {
    /// Metric label
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::UnknownPartInText(_) => "unknown_part_in_text",
            Rejection::ExplanationTooShort(_) => "explanation_too_short",
            Rejection::UnknownClaimedPart(_) => "unknown_claimed_part",
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::UnknownPartInText(id) => write!(f, "unknown part {} in text", id),
            Rejection::ExplanationTooShort(n) => write!(f, "explanation too short ({} chars)", n),
            Rejection::UnknownClaimedPart(id) => write!(f, "claimed part {} not in catalog", id),
        }
    }
}

fn bears_explanation(kind: ResponseType) -> bool {
    matches!(
        kind,
        ResponseType::PartLookup
            | ResponseType::Compatibility
            | ResponseType::CompatibilityUnvalidated
            | ResponseType::SymptomTroubleshoot
            | ResponseType::SymptomTroubleshootUnvalidated
    )
}

/// Part-id shaped tokens in `text` that the catalog does not know
pub fn unknown_part_tokens(text: &str, store: &TruthStore) -> Vec<String> {
    PART_TOKEN_RE
        .find_iter(text)
        .map(|m| m.as_str().to_uppercase())
        .filter(|id| !store.has_part(id))
        .collect()
}

/// Every reason to reject `response`
pub fn check(response: &AssistantResponse, store: &TruthStore) -> Vec<Rejection> {
    let mut rejections = Vec::new();

    for text in response.prose() {
        for id in unknown_part_tokens(text, store) {
            let rejection = Rejection::UnknownPartInText(id);
            if !rejections.contains(&rejection) {
                rejections.push(rejection);
            }
        }
    }

    if bears_explanation(response.kind) {
        let len = response
            .explanation
            .as_deref()
            .map_or(0, |e| e.trim().chars().count());
        if len < MIN_EXPLANATION_CHARS {
            rejections.push(Rejection::ExplanationTooShort(len));
        }
    }

    for id in response.claimed_part_ids() {
        if !store.has_part(id) {
            rejections.push(Rejection::UnknownClaimedPart(id.to_string()));
        }
    }

    rejections
}

fn scrub(text: &str, store: &TruthStore) -> String {
    PART_TOKEN_RE
        .replace_all(text, |caps: &regex::Captures| {
            let id = caps[0].to_uppercase();
            if store.has_part(&id) {
                caps[0].to_string()
            } else {
                SCRUBBED.to_string()
            }
        })
        .into_owned()
}

fn scrub_all(response: &mut AssistantResponse, store: &TruthStore) {
    let scrub_opt = |v: &mut Option<String>| {
        if let Some(text) = v.as_mut() {
            *text = scrub(text, store);
        }
    };
    scrub_opt(&mut response.message);
    scrub_opt(&mut response.explanation);
    for list in [
        &mut response.diagnostic_steps,
        &mut response.helpful_tips,
        &mut response.clarification_questions,
    ] {
        for text in list.iter_mut() {
            *text = scrub(text, store);
        }
    }
}

/// Validate and, if needed, repair a response. Returns the response to send
/// and the reasons it was rejected (empty when it passed).
pub fn enforce(
    mut response: AssistantResponse,
    store: &TruthStore,
) -> (AssistantResponse, Vec<Rejection>) {
    let rejections = check(&response, store);
    if rejections.is_empty() {
        info!("Validator: {} passed", response.kind);
        return (response, rejections);
    }

    for rejection in &rejections {
        warn!("Validator: {} rejected: {}", response.kind, rejection);
    }

    if response.part.as_ref().map_or(false, |p| !store.has_part(&p.part_id)) {
        response.part = None;
    }
    response.recommended_parts.retain(|p| store.has_part(&p.part_id));
    response.alternative_parts.retain(|p| store.has_part(&p.part_id));
    response.related_parts.retain(|p| store.has_part(&p.part_id));

    apply_template(&mut response);
    scrub_all(&mut response, store);
    (response, rejections)
}
