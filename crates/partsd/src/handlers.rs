//! Response handlers, one per route.
//!
//! Structured content (parts, compatibility, fit) always comes from the
//! catalog. Prose comes from the generator when it answers with something
//! usable and from the templates below otherwise.

use parts_common::{
    AssistantResponse, ClarificationKind, DetectedInfo, Fit, PartRecord, PartView, ResponseType,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::generator::{Generator, Prose};
use crate::guardrails::SUPPORTED_SCOPE;
use crate::retrieval::{RankedCandidate, RetrievalRequest, Retriever};
use crate::router::{ClarifyReason, RouteDecision};
use crate::truth_store::TruthStore;

/// Related or alternative parts shown per answer
const MAX_RELATED: usize = 3;

/// Install steps a generated answer must have to be used
const MIN_STEPS: usize = 3;
const MAX_STEPS: usize = 8;

/// Title overlap needed for a compatible alternative to count as similar
const TITLE_SIMILARITY_MIN: f64 = 0.3;

/// Relevance shown on rating-ordered alternatives
const RATING_FALLBACK_RELEVANCE: f64 = 0.2;

/// Below this a troubleshooting answer still asks for confirmation
const CLARIFY_BELOW: f64 = 0.70;

const TITLE_STOPWORDS: &[&str] = &["and", "or", "the", "a", "an", "for", "with", "of"];

// ============================================================================
// Templates
// ============================================================================

fn install_steps_template() -> Vec<String> {
    [
        "Disconnect power to the appliance",
        "Remove the old part",
        "Install the new part according to the included instructions",
        "Reconnect power and test",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn diagnostic_steps_template() -> Vec<String> {
    [
        "Verify the issue is occurring consistently",
        "Check for obvious signs of damage",
        "Test the affected component",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn part_lookup_template(part: &PartView) -> Prose {
    let mut tips = vec!["Refer to the product page for full details".to_string()];
    if let Some(video) = part.installation.as_ref().and_then(|i| i.video_url.as_deref()) {
        tips.push(format!("An installation video is available: {}", video));
    }
    Prose {
        explanation: format!(
            "Part {} is the {}. Details and installation guidance are below.",
            part.part_id, part.title
        ),
        steps: install_steps_template(),
        tips,
    }
}

fn compatibility_template(part_id: &str, model_id: &str, compatible: bool) -> Prose {
    let verdict = if compatible {
        "is compatible"
    } else {
        "is not compatible"
    };
    Prose {
        explanation: format!("Part {} {} with model {}.", part_id, verdict, model_id),
        steps: Vec::new(),
        tips: Vec::new(),
    }
}

fn diagnostic_template(symptom: &str) -> Prose {
    Prose {
        explanation: format!("Based on '{}', here are the most likely parts:", symptom),
        steps: diagnostic_steps_template(),
        tips: Vec::new(),
    }
}

fn unverified_note(model_id: Option<&str>) -> String {
    match model_id {
        Some(m) => format!(
            "Note: Model {} is not in our database, so I cannot verify part compatibility.",
            m
        ),
        None => "Note: Without a model number I cannot verify part compatibility.".to_string(),
    }
}

fn unverified_tips(model_id: Option<&str>) -> Vec<String> {
    vec![
        match model_id {
            Some(m) => format!("Verify part compatibility with model {} before purchasing", m),
            None => "Verify part compatibility with your model before purchasing".to_string(),
        },
        "Check the product page for complete compatibility information".to_string(),
        "Contact the manufacturer if unsure about compatibility".to_string(),
    ]
}

fn unvalidated_compatibility_explanation(model_id: Option<&str>, part_id: Option<&str>) -> String {
    let part = part_id.unwrap_or("that part");
    match model_id {
        Some(m) => format!(
            "I couldn't verify model {} in our compatibility database, so I can't confirm whether \
             {} is compatible yet. I shared likely alternatives to help you continue while you verify the model.",
            m, part
        ),
        None => format!(
            "I need your model number to confirm whether {} is compatible. \
             I shared likely alternatives to help you continue in the meantime.",
            part
        ),
    }
}

/// Replace the prose of `response` with the deterministic template for its
/// type, keeping every structured field.
pub fn apply_template(response: &mut AssistantResponse) {
    let model = response.model_id.clone();
    let symptom = response
        .symptom
        .clone()
        .unwrap_or_else(|| "your issue".to_string());

    match response.kind {
        ResponseType::PartLookup => {
            if let Some(part) = &response.part {
                let prose = part_lookup_template(part);
                response.explanation = Some(prose.explanation);
                response.diagnostic_steps = prose.steps;
                response.helpful_tips = prose.tips;
            }
        }
        ResponseType::Compatibility => {
            match (&response.part, response.compatible, model.as_deref()) {
                (Some(part), Some(compatible), Some(m)) => {
                    let prose = compatibility_template(&part.part_id, m, compatible);
                    response.explanation = Some(prose.explanation);
                    response.helpful_tips.clear();
                }
                _ => {
                    response.explanation = Some(
                        "I couldn't find that part number in our catalog. Here are top-rated parts for your model."
                            .to_string(),
                    );
                }
            }
        }
        ResponseType::CompatibilityUnvalidated => {
            let part_id = response.part.as_ref().map(|p| p.part_id.clone());
            response.explanation = Some(unvalidated_compatibility_explanation(
                model.as_deref(),
                part_id.as_deref(),
            ));
        }
        ResponseType::SymptomTroubleshoot => {
            let prose = diagnostic_template(&symptom);
            response.explanation = Some(prose.explanation);
            response.diagnostic_steps = prose.steps;
            response.helpful_tips.clear();
        }
        ResponseType::SymptomTroubleshootUnvalidated => {
            let prose = diagnostic_template(&symptom);
            response.explanation = Some(format!(
                "{}\n\n{}",
                unverified_note(model.as_deref()),
                prose.explanation
            ));
            response.diagnostic_steps = prose.steps;
            response.helpful_tips = unverified_tips(model.as_deref());
        }
        ResponseType::ModelRequired
        | ResponseType::IssueRequired
        | ResponseType::ClarificationNeeded => {
            response.explanation = None;
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn title_words(title: &str) -> HashSet<String> {
    title
        .to_lowercase()
        .split_whitespace()
        .filter(|w| !TITLE_STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Jaccard overlap of title words
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let wa = title_words(a);
    let wb = title_words(b);
    if wa.is_empty() || wb.is_empty() {
        return 0.0;
    }
    let inter = wa.intersection(&wb).count() as f64;
    let union = wa.union(&wb).count() as f64;
    inter / union
}

/// Confidence from ranking strength: a strong top hit and a clear gap
/// over the runner-up both raise it
pub fn symptom_confidence(ranked: &[RankedCandidate], base: f64) -> f64 {
    let Some(top) = ranked.first() else {
        return 0.3;
    };
    let gap = match ranked.get(1) {
        Some(second) => top.final_score - second.final_score,
        None => 0.2,
    };

    let mut boost = 0.0;
    if top.final_score > 0.8 {
        boost += 0.15;
    } else if top.final_score > 0.6 {
        boost += 0.05;
    }
    if gap > 0.2 {
        boost += 0.1;
    }
    (base + boost).min(0.95)
}

/// Generated install answer, if it has a usable explanation and 3 to 8 steps
fn usable_install_prose(prose: Option<Prose>) -> Option<Prose> {
    let prose = prose?;
    let steps_ok = (MIN_STEPS..=MAX_STEPS).contains(&prose.steps.len());
    if !steps_ok {
        warn!(
            "Generated install answer has {} steps, using template",
            prose.steps.len()
        );
        return None;
    }
    Some(prose).filter(|p| !p.explanation.is_empty())
}

fn usable_prose(prose: Option<Prose>) -> Option<Prose> {
    prose.filter(|p| !p.explanation.is_empty())
}

fn clarification(
    confidence: f64,
    kind: ClarificationKind,
    message: String,
    questions: &[&str],
) -> AssistantResponse {
    AssistantResponse {
        requires_clarification: true,
        clarification_type: Some(kind),
        message: Some(message),
        clarification_questions: questions.iter().map(|q| q.to_string()).collect(),
        ..AssistantResponse::new(ResponseType::ClarificationNeeded, confidence)
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub struct Handlers {
    store: Arc<TruthStore>,
    retriever: Arc<Retriever>,
    generator: Arc<Generator>,
}

impl Handlers {
    pub fn new(store: Arc<TruthStore>, retriever: Arc<Retriever>, generator: Arc<Generator>) -> Self {
        Self {
            store,
            retriever,
            generator,
        }
    }

    /// Run the handler for `decision`
    pub async fn dispatch(
        &self,
        decision: &RouteDecision,
        confidence: f64,
        text: &str,
    ) -> AssistantResponse {
        match decision {
            RouteDecision::PartLookup { part, model_id } => {
                self.part_lookup(part, model_id.as_deref(), confidence, text)
                    .await
            }
            RouteDecision::Compatibility {
                model_id,
                part_id,
                part,
            } => {
                self.compatibility(model_id, part_id.as_deref(), part.as_ref(), confidence, text)
                    .await
            }
            RouteDecision::CompatibilityUnvalidated {
                model_id,
                part_id,
                part,
            } => {
                self.compatibility_unvalidated(
                    model_id.as_deref(),
                    part_id.as_deref(),
                    part.as_ref(),
                    confidence,
                    text,
                )
                .await
            }
            RouteDecision::SymptomTroubleshoot {
                symptom,
                model_id,
                appliance,
                brand,
            } => {
                self.symptom_troubleshoot(
                    symptom,
                    model_id,
                    appliance.as_deref(),
                    brand.as_deref(),
                    confidence,
                    text,
                )
                .await
            }
            RouteDecision::SymptomTroubleshootUnvalidated {
                symptom,
                model_id,
                appliance,
                brand,
            } => {
                self.symptom_troubleshoot_unvalidated(
                    symptom,
                    model_id.as_deref(),
                    appliance.as_deref(),
                    brand.as_deref(),
                    confidence,
                    text,
                )
                .await
            }
            RouteDecision::ModelRequired { symptom, appliance } => {
                model_required(symptom, appliance.as_deref(), confidence)
            }
            RouteDecision::IssueRequired {
                model_id,
                model_valid,
                ..
            } => issue_required(model_id, *model_valid, confidence),
            RouteDecision::Clarify { reason, detected } => {
                clarification_needed(reason, detected, confidence)
            }
        }
    }

    fn related_parts(&self, part: &PartRecord) -> Vec<PartView> {
        part.related
            .iter()
            .filter(|id| **id != part.part_id)
            .filter_map(|id| self.store.part(id))
            .take(MAX_RELATED)
            .map(|r| PartView::from(r.as_ref()))
            .collect()
    }

    async fn part_lookup(
        &self,
        part: &Arc<PartRecord>,
        model_id: Option<&str>,
        confidence: f64,
        text: &str,
    ) -> AssistantResponse {
        info!("Handler: part_lookup {}", part.part_id);
        let view = PartView::from(part.as_ref());
        let prose = usable_install_prose(self.generator.part_lookup(part, text).await)
            .unwrap_or_else(|| part_lookup_template(&view));

        AssistantResponse {
            explanation: Some(prose.explanation),
            diagnostic_steps: prose.steps,
            helpful_tips: prose.tips,
            related_parts: self.related_parts(part),
            part: Some(view),
            model_id: model_id.map(str::to_string),
            ..AssistantResponse::new(ResponseType::PartLookup, (confidence + 0.05).min(0.99))
        }
    }

    /// Compatible parts of `model_id` resembling `original`, by title
    /// overlap, else by rating
    fn compatible_alternatives(&self, model_id: &str, original: &PartRecord) -> Vec<PartView> {
        let Some(allowed) = self.store.compatible_parts(model_id) else {
            return Vec::new();
        };
        let mut candidates: Vec<Arc<PartRecord>> = allowed
            .iter()
            .filter(|id| **id != original.part_id)
            .filter_map(|id| self.store.part(id))
            .collect();
        candidates.sort_by(|a, b| a.part_id.cmp(&b.part_id));

        let mut similar: Vec<(f64, Arc<PartRecord>)> = candidates
            .iter()
            .map(|c| (title_similarity(&original.title, &c.title), c.clone()))
            .filter(|(s, _)| *s > TITLE_SIMILARITY_MIN)
            .collect();
        similar.sort_by(|a, b| b.0.total_cmp(&a.0));

        if !similar.is_empty() {
            return similar
                .into_iter()
                .take(MAX_RELATED)
                .map(|(s, r)| PartView {
                    relevance_score: Some((s * 1000.0).round() / 1000.0),
                    ..PartView::from(r.as_ref())
                })
                .collect();
        }

        candidates.sort_by(|a, b| {
            b.rating
                .unwrap_or(0.0)
                .total_cmp(&a.rating.unwrap_or(0.0))
                .then_with(|| a.part_id.cmp(&b.part_id))
        });
        candidates
            .into_iter()
            .take(MAX_RELATED)
            .map(|r| PartView {
                relevance_score: Some(RATING_FALLBACK_RELEVANCE),
                ..PartView::from(r.as_ref())
            })
            .collect()
    }

    async fn compatibility(
        &self,
        model_id: &str,
        part_id: Option<&str>,
        part: Option<&Arc<PartRecord>>,
        confidence: f64,
        text: &str,
    ) -> AssistantResponse {
        info!("Handler: compatibility {:?} + {}", part_id, model_id);

        let Some(part) = part else {
            // Part missing or not in the catalog: ask for it
            let allowed = self.store.compatible_parts(model_id);
            let top_rated: Vec<PartView> = self
                .store
                .popular(allowed, None, MAX_RELATED)
                .iter()
                .map(|r| PartView::from(r.as_ref()))
                .collect();
            let message = match part_id {
                Some(_) => format!(
                    "I couldn't find that part number in our catalog. Which part do you want to check against model {}?",
                    model_id
                ),
                None => format!("Which part do you want to check against model {}?", model_id),
            };
            return AssistantResponse {
                requires_clarification: true,
                clarification_type: Some(ClarificationKind::PartNumber),
                message: Some(message),
                explanation: Some(format!(
                    "Model {} is in our catalog. Here are its top-rated compatible parts.",
                    model_id
                )),
                alternative_parts: top_rated,
                clarification_questions: vec![
                    "What is the part number (it starts with PS)?".to_string(),
                ],
                model_id: Some(model_id.to_string()),
                fit: Some(Fit::Verified),
                ..AssistantResponse::new(ResponseType::Compatibility, confidence)
            };
        };

        let compatible = self.store.is_compatible(model_id, &part.part_id);
        let prose = usable_prose(
            self.generator
                .compatibility(part, model_id, compatible, text)
                .await,
        )
        .unwrap_or_else(|| compatibility_template(&part.part_id, model_id, compatible));

        let (confidence, alternatives) = if compatible {
            ((confidence + 0.15).min(0.99), Vec::new())
        } else {
            (confidence, self.compatible_alternatives(model_id, part))
        };

        AssistantResponse {
            explanation: Some(prose.explanation),
            helpful_tips: prose.tips,
            part: Some(PartView::from(part.as_ref())),
            model_id: Some(model_id.to_string()),
            compatible: Some(compatible),
            alternative_parts: alternatives,
            fit: Some(Fit::Verified),
            ..AssistantResponse::new(ResponseType::Compatibility, confidence)
        }
    }

    async fn compatibility_unvalidated(
        &self,
        model_id: Option<&str>,
        part_id: Option<&str>,
        part: Option<&Arc<PartRecord>>,
        confidence: f64,
        text: &str,
    ) -> AssistantResponse {
        info!(
            "Handler: compatibility_unvalidated {:?} + {:?}",
            part_id, model_id
        );

        let alternatives: Vec<PartView> = match part {
            Some(part) => self
                .retriever
                .similar_to(part, MAX_RELATED)
                .await
                .iter()
                .map(RankedCandidate::view)
                .collect(),
            None => {
                let request = RetrievalRequest {
                    symptom: text,
                    appliance: None,
                    brand: None,
                    allowed: None,
                };
                self.retriever
                    .retrieve(&request)
                    .await
                    .parts
                    .iter()
                    .filter(|c| part_id.map_or(true, |p| !c.record.part_id.eq_ignore_ascii_case(p)))
                    .map(RankedCandidate::view)
                    .collect()
            }
        };

        let mut questions = vec![
            "Could you double-check the model number (letters and numbers)?".to_string(),
            "If you share a corrected model number, I can confirm exact compatibility."
                .to_string(),
        ];
        if alternatives.is_empty() {
            questions.push("I can also help you find the model tag location if needed.".to_string());
        }

        let known_part = part.map(|p| p.part_id.as_str());
        AssistantResponse {
            requires_clarification: true,
            clarification_type: Some(ClarificationKind::ModelNumber),
            explanation: Some(unvalidated_compatibility_explanation(model_id, known_part)),
            part: part.map(|p| PartView::from(p.as_ref())),
            model_id: model_id.map(str::to_string),
            alternative_parts: alternatives,
            clarification_questions: questions,
            helpful_tips: vec![
                "Model numbers are usually inside the door frame or on a side or back sticker."
                    .to_string(),
                "Use the exact model number to avoid ordering incompatible parts.".to_string(),
            ],
            fit: Some(Fit::Unverified),
            ..AssistantResponse::new(ResponseType::CompatibilityUnvalidated, confidence.min(0.7))
        }
    }

    async fn symptom_troubleshoot(
        &self,
        symptom: &str,
        model_id: &str,
        appliance: Option<&str>,
        brand: Option<&str>,
        confidence: f64,
        text: &str,
    ) -> AssistantResponse {
        info!("Handler: symptom_troubleshoot '{}' + {}", symptom, model_id);
        let allowed = self.store.compatible_parts(model_id);
        let retrieval = self
            .retriever
            .retrieve(&RetrievalRequest {
                symptom,
                appliance,
                brand,
                allowed,
            })
            .await;

        let confidence = symptom_confidence(&retrieval.parts, confidence);

        if retrieval.parts.is_empty() {
            return AssistantResponse {
                requires_clarification: true,
                explanation: Some(format!(
                    "I couldn't find parts compatible with model {} for '{}'.",
                    model_id, symptom
                )),
                clarification_questions: vec![
                    "Could you describe the problem in more detail?".to_string(),
                ],
                symptom: Some(symptom.to_string()),
                model_id: Some(model_id.to_string()),
                fit: Some(Fit::Verified),
                ..AssistantResponse::new(ResponseType::SymptomTroubleshoot, confidence)
            };
        }

        let prose = usable_prose(
            self.generator
                .diagnostic(symptom, Some(model_id), &retrieval.parts, text)
                .await,
        )
        .unwrap_or_else(|| diagnostic_template(symptom));

        AssistantResponse {
            requires_clarification: confidence < CLARIFY_BELOW,
            explanation: Some(prose.explanation),
            diagnostic_steps: prose.steps,
            helpful_tips: prose.tips,
            recommended_parts: retrieval.views(),
            symptom: Some(symptom.to_string()),
            model_id: Some(model_id.to_string()),
            fit: Some(retrieval.fit),
            ..AssistantResponse::new(ResponseType::SymptomTroubleshoot, confidence)
        }
    }

    async fn symptom_troubleshoot_unvalidated(
        &self,
        symptom: &str,
        model_id: Option<&str>,
        appliance: Option<&str>,
        brand: Option<&str>,
        confidence: f64,
        text: &str,
    ) -> AssistantResponse {
        info!(
            "Handler: symptom_troubleshoot_unvalidated '{}' + {:?}",
            symptom, model_id
        );
        let retrieval = self
            .retriever
            .retrieve(&RetrievalRequest {
                symptom,
                appliance,
                brand,
                allowed: None,
            })
            .await;

        if retrieval.parts.is_empty() {
            return clarification(
                confidence,
                ClarificationKind::IssueDescription,
                format!("I couldn't find parts for '{}' in our catalog.", symptom),
                &[
                    "Could you describe the problem in more detail?",
                    "What specific behavior are you seeing?",
                ],
            );
        }

        let prose = usable_prose(
            self.generator
                .diagnostic(symptom, model_id, &retrieval.parts, text)
                .await,
        )
        .unwrap_or_else(|| diagnostic_template(symptom));

        let mut tips = unverified_tips(model_id);
        tips.extend(prose.tips);

        AssistantResponse {
            explanation: Some(format!(
                "{}\n\nHere are parts that typically fix '{}':\n\n{}",
                unverified_note(model_id),
                symptom,
                prose.explanation
            )),
            diagnostic_steps: prose.steps,
            helpful_tips: tips,
            recommended_parts: retrieval.views(),
            symptom: Some(symptom.to_string()),
            model_id: model_id.map(str::to_string),
            fit: Some(Fit::Unverified),
            ..AssistantResponse::new(ResponseType::SymptomTroubleshootUnvalidated, confidence)
        }
    }
}

pub fn model_required(symptom: &str, appliance: Option<&str>, confidence: f64) -> AssistantResponse {
    let appliance_name = appliance.unwrap_or("appliance");
    let message = format!(
        "I can help with {}! To recommend the right parts, I need your {} model number.\n\n\
         Where to find it:\n\
         - Inside the appliance door\n\
         - On the back or side panel\n\
         - Near the serial number plate",
        symptom, appliance_name
    );
    AssistantResponse {
        requires_clarification: true,
        clarification_type: Some(ClarificationKind::ModelNumber),
        message: Some(message),
        symptom: Some(symptom.to_string()),
        detected_info: Some(DetectedInfo {
            intent: Some("symptom_troubleshoot".to_string()),
            symptom: Some(symptom.to_string()),
            appliance: appliance.map(str::to_string),
            ..Default::default()
        }),
        helpful_tips: vec![
            "Model numbers are usually 10-15 characters".to_string(),
            "It may include both letters and numbers".to_string(),
        ],
        ..AssistantResponse::new(ResponseType::ModelRequired, confidence)
    }
}

pub fn issue_required(model_id: &str, model_valid: bool, confidence: f64) -> AssistantResponse {
    let mut message = format!(
        "Thanks! I've noted your model {}. What issue are you experiencing?",
        model_id
    );
    if !model_valid {
        message.push_str(" (I couldn't find this model in our catalog, so part fit will be unverified.)");
    }
    AssistantResponse {
        requires_clarification: true,
        clarification_type: Some(ClarificationKind::IssueDescription),
        message: Some(message),
        model_id: Some(model_id.to_string()),
        clarification_questions: vec![
            "What's not working properly?".to_string(),
            "What symptoms are you seeing?".to_string(),
        ],
        ..AssistantResponse::new(ResponseType::IssueRequired, confidence)
    }
}

pub fn clarification_needed(
    reason: &ClarifyReason,
    detected: &DetectedInfo,
    confidence: f64,
) -> AssistantResponse {
    let mut response = match reason {
        ClarifyReason::OutOfScope { appliance } => clarification(
            confidence,
            ClarificationKind::OutOfScope,
            format!(
                "I specialize in {} parts only, so I can't help with your {}.",
                SUPPORTED_SCOPE, appliance
            ),
            &["Do you have a refrigerator or dishwasher question I can help with?"],
        ),
        ClarifyReason::LowSignal => clarification(
            confidence,
            ClarificationKind::General,
            "I want to help, but I need a bit more information:".to_string(),
            &[
                "Do you have a specific part number (starts with PS)?",
                "Or would you like help diagnosing an issue?",
                "What appliance are you working on?",
            ],
        ),
        ClarifyReason::UnknownPart => clarification(
            confidence,
            ClarificationKind::PartNumber,
            "I couldn't find that part number in our catalog.".to_string(),
            &[
                "Could you double-check the part number (it starts with PS)?",
                "Or describe the problem and I can suggest parts",
            ],
        ),
        ClarifyReason::TimedOut => clarification(
            confidence,
            ClarificationKind::General,
            "Sorry, that took longer than expected on my end.".to_string(),
            &["Could you send your question again?"],
        ),
        ClarifyReason::Ambiguous => {
            if detected.symptom.is_some() && detected.model_id.is_none() {
                clarification(
                    confidence,
                    ClarificationKind::ModelNumber,
                    "To recommend the right parts, I need your appliance model number:".to_string(),
                    &[
                        "What is your model number?",
                        "It's usually on a sticker inside the appliance",
                    ],
                )
            } else {
                clarification(
                    confidence,
                    ClarificationKind::General,
                    "I want to help, but I need a bit more information:".to_string(),
                    &[
                        "Could you rephrase your question?",
                        "Are you looking for a specific part or troubleshooting help?",
                    ],
                )
            }
        }
    };
    if *detected != DetectedInfo::default() {
        response.detected_info = Some(detected.clone());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::llm::FakeLlmBackend;
    use crate::similarity::LexicalIndex;
    use std::collections::HashMap;
    use std::time::Duration;

    fn store() -> Arc<TruthStore> {
        let records = vec![
            PartRecord::new("PS100001", "Refrigerator Ice Maker Assembly")
                .with_symptoms(&["Ice maker not making ice"])
                .with_appliance("refrigerator")
                .with_rating(4.5)
                .with_related(&["PS100002", "PS999999"]),
            PartRecord::new("PS100002", "Refrigerator Water Inlet Valve")
                .with_symptoms(&["Ice maker not making ice", "Leaking"])
                .with_appliance("refrigerator")
                .with_rating(4.8),
            PartRecord::new("PS100003", "Refrigerator Ice Maker Module")
                .with_symptoms(&["Ice maker not making ice"])
                .with_appliance("refrigerator")
                .with_rating(4.1),
            PartRecord::new("PS100004", "Door Gasket")
                .with_symptoms(&["Leaking"])
                .with_appliance("refrigerator")
                .with_rating(4.9),
        ];
        let mut models = HashMap::new();
        models.insert(
            "WRS325FDAM04".to_string(),
            vec![
                "PS100002".to_string(),
                "PS100003".to_string(),
                "PS100004".to_string(),
            ],
        );
        Arc::new(TruthStore::from_records(records, models))
    }

    fn handlers(fake: FakeLlmBackend) -> Handlers {
        let store = store();
        let index = Arc::new(LexicalIndex::from_store(&store));
        let retriever = Arc::new(Retriever::new(
            index,
            store.clone(),
            &RetrievalConfig::default(),
        ));
        let generator = Arc::new(Generator::new(Arc::new(fake), Duration::from_secs(1), 700));
        Handlers::new(store, retriever, generator)
    }

    #[test]
    fn test_title_similarity() {
        let s = title_similarity(
            "Refrigerator Ice Maker Assembly",
            "Refrigerator Ice Maker Module",
        );
        assert!((s - 0.6).abs() < 1e-9);
        assert_eq!(title_similarity("", "Door Gasket"), 0.0);
    }

    #[test]
    fn test_symptom_confidence() {
        assert_eq!(symptom_confidence(&[], 0.8), 0.3);
        let strong = RankedCandidate::new(Arc::new(PartRecord::new("PS1", "a")), 0.9, "");
        let weak = RankedCandidate::new(Arc::new(PartRecord::new("PS2", "b")), 0.5, "");
        let c = symptom_confidence(&[strong.clone(), weak], 0.6);
        assert!((c - 0.85).abs() < 1e-9);
        assert_eq!(symptom_confidence(&[strong], 0.9), 0.95);
    }

    #[tokio::test]
    async fn test_part_lookup_uses_template_on_bad_step_count() {
        let h = handlers(
            FakeLlmBackend::new()
                .otherwise(r#"{"explanation": "This is the ice maker.", "installation_steps": ["one"]}"#),
        );
        let part = h.store.part("PS100001").unwrap();
        let response = h.part_lookup(&part, None, 0.97, "install PS100001").await;
        assert_eq!(response.kind, ResponseType::PartLookup);
        assert_eq!(response.confidence, 0.99);
        assert_eq!(response.diagnostic_steps, install_steps_template());
        // Unknown related ids are dropped
        let related: Vec<&str> = response.related_parts.iter().map(|p| p.part_id.as_str()).collect();
        assert_eq!(related, vec!["PS100002"]);
    }

    #[tokio::test]
    async fn test_incompatible_part_gets_similar_alternatives() {
        let h = handlers(FakeLlmBackend::new().otherwise_fail(crate::llm::LlmError::Disabled));
        let part = h.store.part("PS100001").unwrap();
        let response = h
            .compatibility("WRS325FDAM04", Some("PS100001"), Some(&part), 0.6, "fits?")
            .await;
        assert_eq!(response.compatible, Some(false));
        assert_eq!(response.confidence, 0.6);
        assert_eq!(response.alternative_parts[0].part_id, "PS100003");
        assert_eq!(response.alternative_parts.len(), 1);
        assert!(response.explanation.unwrap().contains("is not compatible"));
    }

    #[tokio::test]
    async fn test_compatible_part_raises_confidence() {
        let h = handlers(FakeLlmBackend::new());
        let part = h.store.part("PS100003").unwrap();
        let response = h
            .compatibility("WRS325FDAM04", Some("PS100003"), Some(&part), 0.9, "fits?")
            .await;
        assert_eq!(response.compatible, Some(true));
        assert_eq!(response.confidence, 0.99);
        assert!(response.alternative_parts.is_empty());
    }

    #[tokio::test]
    async fn test_missing_part_lists_top_rated_compatible() {
        let h = handlers(FakeLlmBackend::new());
        let response = h
            .compatibility("WRS325FDAM04", Some("PS55555555"), None, 0.6, "fits?")
            .await;
        assert!(response.requires_clarification);
        assert_eq!(response.alternative_parts[0].part_id, "PS100004");
        assert!(!response.message.unwrap().contains("PS55555555"));
    }

    #[tokio::test]
    async fn test_unvalidated_compatibility_caps_confidence() {
        let h = handlers(FakeLlmBackend::new());
        let part = h.store.part("PS100001").unwrap();
        let response = h
            .compatibility_unvalidated(Some("ABC12345"), Some("PS100001"), Some(&part), 0.9, "fits?")
            .await;
        assert_eq!(response.confidence, 0.7);
        assert_eq!(response.fit, Some(Fit::Unverified));
        assert!(response
            .alternative_parts
            .iter()
            .all(|p| p.part_id != "PS100001"));
    }

    #[test]
    fn test_model_required_message() {
        let r = model_required("ice maker not working", Some("refrigerator"), 0.4);
        let message = r.message.unwrap();
        assert!(message.starts_with("I can help with ice maker not working!"));
        assert!(message.contains("refrigerator model number"));
        assert!(r.requires_clarification);
    }

    #[test]
    fn test_out_of_scope_names_supported_scope() {
        let r = clarification_needed(
            &ClarifyReason::OutOfScope {
                appliance: "oven".into(),
            },
            &DetectedInfo::default(),
            0.2,
        );
        let message = r.message.unwrap();
        assert!(message.contains("refrigerator and dishwasher"));
        assert!(message.contains("oven"));
        assert_eq!(r.clarification_type, Some(ClarificationKind::OutOfScope));
        assert!(r.detected_info.is_none());
    }

    #[test]
    fn test_apply_template_keeps_structure() {
        let mut r = AssistantResponse {
            explanation: Some("PS000 is great".into()),
            symptom: Some("leaking".into()),
            recommended_parts: vec![PartView::from(&PartRecord::new("PS100004", "Door Gasket"))],
            ..AssistantResponse::new(ResponseType::SymptomTroubleshoot, 0.8)
        };
        apply_template(&mut r);
        assert_eq!(
            r.explanation.as_deref(),
            Some("Based on 'leaking', here are the most likely parts:")
        );
        assert_eq!(r.recommended_parts.len(), 1);
        assert_eq!(r.diagnostic_steps.len(), 3);
    }
}
