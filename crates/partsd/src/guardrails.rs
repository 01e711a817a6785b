//! Scope and topic-drift guardrails.
//!
//! Pure functions over their inputs. They read session state but never
//! mutate it.

use once_cell::sync::Lazy;
use parts_common::records::normalize_appliance;
use parts_common::PendingSlot;
use regex::Regex;
use std::fmt;
use tracing::{info, warn};

use crate::extractor::Extraction;
use crate::planner::{Intent, Plan};
use crate::session::Session;

/// Appliance names accepted as in scope (before normalization)
pub const IN_SCOPE_APPLIANCES: &[&str] = &["refrigerator", "fridge", "freezer", "dishwasher"];

/// Human description of the supported scope
pub const SUPPORTED_SCOPE: &str = "refrigerator and dishwasher";

static OUT_OF_SCOPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(oven|stove|(?:gas|electric|induction|kitchen) range|microwave|dryer|washing machine|clothes washer|washer|furnace|hvac|water heater|garbage disposal|air conditioner|cooktop)s?\b",
    )
    .expect("out-of-scope pattern is valid")
});

static IN_SCOPE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(refrigerators?|fridges?|freezers?|dishwashers?)\b")
        .expect("in-scope pattern is valid")
});

/// Words that make a turn plausibly about appliance parts
static DOMAIN_VOCAB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(parts?|models?|install\w*|replac\w*|repair\w*|fix\w*|compatib\w*|fits?|broken|leak\w*|noise|noisy|loud|ice|maker|water|filter|door|shelf|bin|drawer|gasket|seal|compressor|thermostat|fan|motor|drain\w*|pump|spray|arm|rack|dispens\w*|cool\w*|cold|warm|frost\w*|temperature|light|latch|hinge|valve|heater|element|working|stopped|won'?t|doesn'?t|isn'?t|clean\w*|dry|dirty|dishes|appliance|whirlpool|kenmore|maytag|frigidaire|bosch|samsung|lg|kitchenaid|ge)\b",
    )
    .expect("domain vocabulary pattern is valid")
});

/// Result of a scope check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeCheck {
    Allowed,
    Blocked { appliance: String },
}

impl ScopeCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ScopeCheck::Allowed)
    }
}

/// Allowed only for the supported appliance categories
pub fn check_scope(appliance: &str) -> ScopeCheck {
    let lower = appliance.trim().to_lowercase();
    if IN_SCOPE_APPLIANCES.contains(&lower.as_str()) {
        return ScopeCheck::Allowed;
    }
    match normalize_appliance(&lower) {
        Some(norm) if IN_SCOPE_APPLIANCES.contains(&norm.as_str()) => ScopeCheck::Allowed,
        _ => ScopeCheck::Blocked { appliance: lower },
    }
}

/// First out-of-scope appliance named in the text
pub fn out_of_scope_mention(text: &str) -> Option<String> {
    OUT_OF_SCOPE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
}

/// Tiered scope decision for a planned turn: the planner's appliance wins,
/// then any identifier means in scope, then keywords, then allowed.
pub fn screen_turn(text: &str, plan_appliance: Option<&str>, has_ids: bool) -> ScopeCheck {
    if let Some(appliance) = plan_appliance {
        let check = check_scope(appliance);
        match &check {
            ScopeCheck::Allowed => info!("Scope: in scope via planner appliance {}", appliance),
            ScopeCheck::Blocked { .. } => {
                warn!("Scope: out of scope via planner appliance {}", appliance)
            }
        }
        return check;
    }
    if has_ids {
        return ScopeCheck::Allowed;
    }
    if let Some(keyword) = out_of_scope_mention(text) {
        if !IN_SCOPE_RE.is_match(text) {
            warn!("Scope: out of scope keyword {}", keyword);
            return ScopeCheck::Blocked { appliance: keyword };
        }
    }
    ScopeCheck::Allowed
}

/// Decision taken before the planner is consulted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precheck {
    Proceed,
    /// Names only unsupported appliances
    Blocked { appliance: String },
    /// Nothing to work with: no ids, no domain words, no carried state
    OffDomain,
}

pub fn precheck(text: &str, extraction: &Extraction, has_carryover: bool) -> Precheck {
    if !extraction.is_empty() {
        return Precheck::Proceed;
    }
    if let Some(appliance) = out_of_scope_mention(text) {
        if !IN_SCOPE_RE.is_match(text) {
            return Precheck::Blocked { appliance };
        }
    }
    if has_carryover || IN_SCOPE_RE.is_match(text) || DOMAIN_VOCAB_RE.is_match(text) {
        Precheck::Proceed
    } else {
        Precheck::OffDomain
    }
}

/// Why carried entities were dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftReason {
    ApplianceChanged { from: String, to: String },
    /// Session was waiting on a model for a symptom; the user moved to a
    /// specific part instead
    IntentChanged,
}

impl fmt::Display for DriftReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriftReason::ApplianceChanged { from, to } => {
                write!(f, "appliance changed {} -> {}", from, to)
            }
            DriftReason::IntentChanged => f.write_str("intent changed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    Continue,
    Reset(DriftReason),
}

impl Drift {
    pub fn is_reset(&self) -> bool {
        matches!(self, Drift::Reset(_))
    }
}

/// Compare the new turn against carried session state
pub fn check_topic_drift(session: &Session, plan: &Plan, turn: &Extraction) -> Drift {
    if let (Some(from), Some(to)) = (session.appliance.as_deref(), plan.appliance.as_deref()) {
        let to_norm = normalize_appliance(to).unwrap_or_else(|| to.to_string());
        if from != to_norm {
            warn!("Topic drift: {} -> {}", from, to_norm);
            return Drift::Reset(DriftReason::ApplianceChanged {
                from: from.to_string(),
                to: to_norm,
            });
        }
    }

    let names_part = !turn.part_ids.is_empty() || plan.part_id.is_some();
    let moves_to_part = plan.intent.is_lookup() || plan.intent == Intent::CompatibilityCheck;
    if session.pending == PendingSlot::AwaitingModel && names_part && moves_to_part {
        warn!("Topic drift: open symptom abandoned for a part question");
        return Drift::Reset(DriftReason::IntentChanged);
    }

    Drift::Continue
}
