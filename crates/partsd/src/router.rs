//! Route selection.
//!
//! An ordered rule list over resolved entities, scope and confidence. The
//! first rule that matches picks the route. Selection is synchronous and has
//! no side effects beyond a log line.

use parts_common::{DetectedInfo, PartRecord, ResponseType};
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::guardrails::ScopeCheck;
use crate::planner::Intent;
use crate::resolver::ResolvedEntities;

/// Minimum confidence for answering a troubleshooting turn
pub const CONFIDENCE_THRESHOLD: f64 = 0.55;

/// Why a turn ends in a clarification
#[derive(Debug, Clone, PartialEq)]
pub enum ClarifyReason {
    OutOfScope { appliance: String },
    LowSignal,
    /// A part number was given but is not in the catalog
    UnknownPart,
    Ambiguous,
    /// The turn ran past its deadline
    TimedOut,
}

/// One variant per handler, carrying what that handler needs
#[derive(Debug, Clone)]
pub enum RouteDecision {
    PartLookup {
        part: Arc<PartRecord>,
        model_id: Option<String>,
    },
    Compatibility {
        model_id: String,
        part_id: Option<String>,
        part: Option<Arc<PartRecord>>,
    },
    CompatibilityUnvalidated {
        model_id: Option<String>,
        part_id: Option<String>,
        part: Option<Arc<PartRecord>>,
    },
    SymptomTroubleshoot {
        symptom: String,
        model_id: String,
        appliance: Option<String>,
        brand: Option<String>,
    },
    SymptomTroubleshootUnvalidated {
        symptom: String,
        model_id: Option<String>,
        appliance: Option<String>,
        brand: Option<String>,
    },
    ModelRequired {
        symptom: String,
        appliance: Option<String>,
    },
    IssueRequired {
        model_id: String,
        model_valid: bool,
        appliance: Option<String>,
    },
    Clarify {
        reason: ClarifyReason,
        detected: DetectedInfo,
    },
}

impl RouteDecision {
    pub fn response_type(&self) -> ResponseType {
        match self {
            RouteDecision::PartLookup { .. } => ResponseType::PartLookup,
            RouteDecision::Compatibility { .. } => ResponseType::Compatibility,
            RouteDecision::CompatibilityUnvalidated { .. } => ResponseType::CompatibilityUnvalidated,
            RouteDecision::SymptomTroubleshoot { .. } => ResponseType::SymptomTroubleshoot,
            RouteDecision::SymptomTroubleshootUnvalidated { .. } => {
                ResponseType::SymptomTroubleshootUnvalidated
            }
            RouteDecision::ModelRequired { .. } => ResponseType::ModelRequired,
            RouteDecision::IssueRequired { .. } => ResponseType::IssueRequired,
            RouteDecision::Clarify { .. } => ResponseType::ClarificationNeeded,
        }
    }
}

/// Which rule picked the route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleFired {
    ScopeGuard,
    LowSignal,
    ValidPartLookup,
    CompatibilityValidModel,
    CompatibilityUnvalidatedModel,
    TroubleshootValidModel,
    TroubleshootUnvalidatedModel,
    SymptomWithoutModel,
    ModelWithoutSymptom,
    Default,
    /// Not a policy rule: the engine's turn deadline expired
    Deadline,
}

impl RuleFired {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleFired::ScopeGuard => "scope_guard",
            RuleFired::LowSignal => "low_signal",
            RuleFired::ValidPartLookup => "valid_part_lookup",
            RuleFired::CompatibilityValidModel => "compatibility_valid_model",
            RuleFired::CompatibilityUnvalidatedModel => "compatibility_unvalidated_model",
            RuleFired::TroubleshootValidModel => "troubleshoot_valid_model",
            RuleFired::TroubleshootUnvalidatedModel => "troubleshoot_unvalidated_model",
            RuleFired::SymptomWithoutModel => "symptom_without_model",
            RuleFired::ModelWithoutSymptom => "model_without_symptom",
            RuleFired::Default => "default",
            RuleFired::Deadline => "deadline",
        }
    }
}

impl fmt::Display for RuleFired {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the policy reads
#[derive(Debug, Clone, Copy)]
pub struct RouteInputs<'a> {
    /// Raw turn text, used as the symptom when the planner named none
    pub text: &'a str,
    pub resolved: &'a ResolvedEntities,
    pub confidence: f64,
    pub scope: &'a ScopeCheck,
    /// Session still carried entities after any drift reset
    pub has_carryover: bool,
}

fn detected(resolved: &ResolvedEntities) -> DetectedInfo {
    DetectedInfo {
        intent: resolved.intent.map(|i| i.as_str().to_string()),
        symptom: resolved.symptom.clone(),
        appliance: resolved.appliance.clone(),
        model_id: resolved.model_id.clone(),
        part_id: resolved.part_id.clone(),
    }
}

/// Symptom intent, or a symptom found under a general question
fn is_troubleshoot(resolved: &ResolvedEntities) -> bool {
    match resolved.intent() {
        Intent::SymptomTroubleshoot => true,
        Intent::GeneralQuestion => resolved.symptom.is_some(),
        _ => false,
    }
}

/// Apply the rules in order. Returns the route and the rule that chose it.
pub fn select_route(inputs: &RouteInputs<'_>) -> (RouteDecision, RuleFired) {
    let (decision, rule) = evaluate(inputs);
    info!(
        "Route: {} (rule={}, confidence={:.3})",
        decision.response_type(),
        rule,
        inputs.confidence
    );
    (decision, rule)
}

fn evaluate(inputs: &RouteInputs<'_>) -> (RouteDecision, RuleFired) {
    let r = inputs.resolved;
    let intent = r.intent();
    let confident = inputs.confidence >= CONFIDENCE_THRESHOLD;

    if let ScopeCheck::Blocked { appliance } = inputs.scope {
        return (
            RouteDecision::Clarify {
                reason: ClarifyReason::OutOfScope {
                    appliance: appliance.clone(),
                },
                detected: detected(r),
            },
            RuleFired::ScopeGuard,
        );
    }

    if !r.has_any_entity() && !inputs.has_carryover {
        return (
            RouteDecision::Clarify {
                reason: ClarifyReason::LowSignal,
                detected: detected(r),
            },
            RuleFired::LowSignal,
        );
    }

    if let (true, Some(part)) = (r.part_id_valid && intent.is_lookup(), &r.part) {
        return (
            RouteDecision::PartLookup {
                part: part.clone(),
                model_id: r.model_id.clone(),
            },
            RuleFired::ValidPartLookup,
        );
    }

    if intent == Intent::CompatibilityCheck {
        return match (&r.model_id, r.model_id_valid) {
            (Some(model_id), true) => (
                RouteDecision::Compatibility {
                    model_id: model_id.clone(),
                    part_id: r.part_id.clone(),
                    part: r.part.clone(),
                },
                RuleFired::CompatibilityValidModel,
            ),
            _ => (
                RouteDecision::CompatibilityUnvalidated {
                    model_id: r.model_id.clone(),
                    part_id: r.part_id.clone(),
                    part: r.part.clone(),
                },
                RuleFired::CompatibilityUnvalidatedModel,
            ),
        };
    }

    if is_troubleshoot(r) && confident {
        let symptom = r
            .symptom
            .clone()
            .unwrap_or_else(|| inputs.text.trim().to_string());
        return match (&r.model_id, r.model_id_valid) {
            (Some(model_id), true) => (
                RouteDecision::SymptomTroubleshoot {
                    symptom,
                    model_id: model_id.clone(),
                    appliance: r.appliance.clone(),
                    brand: r.brand.clone(),
                },
                RuleFired::TroubleshootValidModel,
            ),
            _ => (
                RouteDecision::SymptomTroubleshootUnvalidated {
                    symptom,
                    model_id: r.model_id.clone(),
                    appliance: r.appliance.clone(),
                    brand: r.brand.clone(),
                },
                RuleFired::TroubleshootUnvalidatedModel,
            ),
        };
    }

    if let (Some(symptom), None, false) = (&r.symptom, &r.model_id, confident) {
        return (
            RouteDecision::ModelRequired {
                symptom: symptom.clone(),
                appliance: r.appliance.clone(),
            },
            RuleFired::SymptomWithoutModel,
        );
    }

    let resolved_elsewhere = intent.is_lookup()
        || intent == Intent::CompatibilityCheck
        || intent == Intent::SymptomTroubleshoot;
    if let (Some(model_id), None, false) = (&r.model_id, &r.symptom, resolved_elsewhere) {
        return (
            RouteDecision::IssueRequired {
                model_id: model_id.clone(),
                model_valid: r.model_id_valid,
                appliance: r.appliance.clone(),
            },
            RuleFired::ModelWithoutSymptom,
        );
    }

    let reason = if r.part_id.is_some() && !r.part_id_valid {
        ClarifyReason::UnknownPart
    } else {
        ClarifyReason::Ambiguous
    };
    (
        RouteDecision::Clarify {
            reason,
            detected: detected(r),
        },
        RuleFired::Default,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(intent: Intent) -> ResolvedEntities {
        ResolvedEntities {
            intent: Some(intent),
            ..Default::default()
        }
    }

    fn route(r: &ResolvedEntities, confidence: f64) -> (RouteDecision, RuleFired) {
        select_route(&RouteInputs {
            text: "text",
            resolved: r,
            confidence,
            scope: &ScopeCheck::Allowed,
            has_carryover: false,
        })
    }

    #[test]
    fn test_scope_guard_fires_first() {
        let mut r = resolved(Intent::SymptomTroubleshoot);
        r.symptom = Some("not heating".into());
        let (decision, rule) = select_route(&RouteInputs {
            text: "my oven is not heating",
            resolved: &r,
            confidence: 0.9,
            scope: &ScopeCheck::Blocked {
                appliance: "oven".into(),
            },
            has_carryover: false,
        });
        assert_eq!(rule, RuleFired::ScopeGuard);
        assert!(matches!(
            decision,
            RouteDecision::Clarify {
                reason: ClarifyReason::OutOfScope { .. },
                ..
            }
        ));
    }

    #[test]
    fn test_low_signal() {
        let (_, rule) = route(&resolved(Intent::GeneralQuestion), 0.9);
        assert_eq!(rule, RuleFired::LowSignal);
    }

    #[test]
    fn test_invalid_part_lookup_falls_through() {
        let mut r = resolved(Intent::PartLookup);
        r.part_id = Some("PS99999999".into());
        let (decision, rule) = route(&r, 0.5);
        assert_eq!(rule, RuleFired::Default);
        assert_eq!(decision.response_type(), ResponseType::ClarificationNeeded);
        assert!(matches!(
            decision,
            RouteDecision::Clarify {
                reason: ClarifyReason::UnknownPart,
                ..
            }
        ));
    }

    #[test]
    fn test_compatibility_split_on_model_validity() {
        let mut r = resolved(Intent::CompatibilityCheck);
        r.model_id = Some("WDT780SAEM1".into());
        r.model_id_valid = true;
        assert_eq!(route(&r, 0.1).1, RuleFired::CompatibilityValidModel);
        r.model_id_valid = false;
        assert_eq!(route(&r, 0.9).1, RuleFired::CompatibilityUnvalidatedModel);
    }

    #[test]
    fn test_symptom_under_general_question_counts_as_troubleshoot() {
        let mut r = resolved(Intent::GeneralQuestion);
        r.symptom = Some("leaking".into());
        let (decision, _) = route(&r, 0.6);
        assert_eq!(
            decision.response_type(),
            ResponseType::SymptomTroubleshootUnvalidated
        );
    }

    #[test]
    fn test_model_without_symptom_asks_for_issue() {
        let mut r = resolved(Intent::GeneralQuestion);
        r.model_id = Some("WDT780SAEM1".into());
        let (decision, rule) = route(&r, 0.3);
        assert_eq!(rule, RuleFired::ModelWithoutSymptom);
        assert!(matches!(decision, RouteDecision::IssueRequired { model_valid: false, .. }));

        // Not when the intent is already resolved elsewhere
        let mut r = resolved(Intent::SymptomTroubleshoot);
        r.model_id = Some("WDT780SAEM1".into());
        assert_eq!(route(&r, 0.3).1, RuleFired::Default);
    }
}
