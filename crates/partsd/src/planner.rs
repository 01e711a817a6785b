//! Intent planner.
//!
//! Wraps the semantic classification call: prompt building, tolerant JSON
//! parsing, a bounded LRU response cache, a deterministic fallback plan and
//! the continuation shortcut for bare model-number replies.

use lru::LruCache;
use parts_common::records::normalize_appliance;
use parts_common::{CacheStats, PendingSlot};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::extractor::{self, Extraction};
use crate::llm::{extract_json, CompletionRequest, LlmBackend, LlmError};

/// Confidence assigned to continuation-shortcut plans
pub const CONTINUATION_CONFIDENCE: f64 = 0.9;

/// Confidence assumed when the model omits one
const DEFAULT_MODEL_CONFIDENCE: f64 = 0.5;

/// What the user wants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    PartLookup,
    InstallHelp,
    CompatibilityCheck,
    SymptomTroubleshoot,
    GeneralQuestion,
    ClarificationNeeded,
}

impl Intent {
    /// Parse a model-reported intent. Unknown labels become GeneralQuestion.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().replace(|c: char| c == ' ' || c == '-', "_").as_str() {
            "part_lookup" => Intent::PartLookup,
            "install_help" | "installation_help" => Intent::InstallHelp,
            "compatibility_check" | "compatibility" => Intent::CompatibilityCheck,
            "symptom_troubleshoot" | "troubleshoot" | "troubleshooting" => {
                Intent::SymptomTroubleshoot
            }
            "clarification_needed" => Intent::ClarificationNeeded,
            _ => Intent::GeneralQuestion,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::PartLookup => "part_lookup",
            Intent::InstallHelp => "install_help",
            Intent::CompatibilityCheck => "compatibility_check",
            Intent::SymptomTroubleshoot => "symptom_troubleshoot",
            Intent::GeneralQuestion => "general_question",
            Intent::ClarificationNeeded => "clarification_needed",
        }
    }

    /// Lookup or installation of a specific part
    pub fn is_lookup(&self) -> bool {
        matches!(self, Intent::PartLookup | Intent::InstallHelp)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Planner output. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub intent: Intent,
    pub symptom: Option<String>,
    pub appliance: Option<String>,
    pub brand: Option<String>,
    pub part_id: Option<String>,
    pub model_id: Option<String>,
    pub planner_confidence: f64,
}

impl Plan {
    /// Plan used whenever classification fails
    pub fn fallback() -> Self {
        Self {
            intent: Intent::ClarificationNeeded,
            symptom: None,
            appliance: None,
            brand: None,
            part_id: None,
            model_id: None,
            planner_confidence: 0.0,
        }
    }
}

/// Where a plan came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOrigin {
    Model,
    Cache,
    Continuation,
    Fallback,
    /// Planner not consulted (turn screened out beforehand)
    Skipped,
}

impl PlanOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanOrigin::Model => "model",
            PlanOrigin::Cache => "cache",
            PlanOrigin::Continuation => "continuation",
            PlanOrigin::Fallback => "fallback",
            PlanOrigin::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub plan: Plan,
    pub origin: PlanOrigin,
}

/// Session fields the planner sees. The prompt is built from these and the
/// turn text only, so they fully determine the cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanContext {
    pub last_model: Option<String>,
    pub last_symptom: Option<String>,
    pub last_part: Option<String>,
    pub appliance: Option<String>,
    pub pending: PendingSlot,
}

impl PlanContext {
    fn pending_label(&self) -> &'static str {
        match self.pending {
            PendingSlot::None => "none",
            PendingSlot::AwaitingModel => "awaiting_model",
            PendingSlot::AwaitingIssue => "awaiting_issue",
        }
    }
}

/// Raw JSON the model is asked to produce
#[derive(Debug, Deserialize)]
struct PlannerOutput {
    intent: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    part_id: Option<String>,
    #[serde(default)]
    model_id: Option<String>,
    #[serde(default)]
    symptom: Option<String>,
    #[serde(default)]
    appliance: Option<String>,
    #[serde(default)]
    brand: Option<String>,
}

const SYSTEM_PROMPT: &str = r#"You classify messages sent to a refrigerator and dishwasher parts assistant.
Output JSON only:
{"intent":"<part_lookup|install_help|compatibility_check|symptom_troubleshoot|general_question>","confidence":0.0,"part_id":null,"model_id":null,"symptom":null,"appliance":null,"brand":null,"query":""}

Intents:
- part_lookup: info about a specific part
- install_help: installation instructions for a part
- compatibility_check: whether a part fits a model
- symptom_troubleshoot: the user describes a problem
- general_question: anything else
Entities: part_id is PS followed by digits. model_id is 6-15 letters/digits. symptom is a short problem phrase. appliance is the appliance type (refrigerator, dishwasher, oven, ...).
Use session context to fill entities the user refers back to. Use null for unknown fields.
JSON ONLY."#;

/// Build the user prompt from the turn and its session context
pub fn build_planner_prompt(text: &str, ctx: &PlanContext) -> String {
    let mut prompt = String::new();
    let mut context = Vec::new();
    if let Some(m) = &ctx.last_model {
        context.push(format!("model={}", m));
    }
    if let Some(s) = &ctx.last_symptom {
        context.push(format!("symptom={}", s));
    }
    if let Some(p) = &ctx.last_part {
        context.push(format!("part={}", p));
    }
    if let Some(a) = &ctx.appliance {
        context.push(format!("appliance={}", a));
    }
    if ctx.pending != PendingSlot::None {
        context.push(format!("waiting_for={}", ctx.pending_label()));
    }
    if !context.is_empty() {
        prompt.push_str(&format!("Session: {}\n", context.join(", ")));
    }
    prompt.push_str(&format!("User: {}", text.trim()));
    prompt
}

/// Lowercase, trim and collapse whitespace
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Cache key over normalized text plus the planner-visible session fields
pub fn cache_key(text: &str, ctx: &PlanContext) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(text).as_bytes());
    for field in [&ctx.last_model, &ctx.last_symptom, &ctx.last_part, &ctx.appliance] {
        hasher.update([0x1f]);
        if let Some(v) = field {
            hasher.update(v.to_lowercase().as_bytes());
        }
    }
    hasher.update([0x1f]);
    hasher.update(ctx.pending_label().as_bytes());
    hex::encode(hasher.finalize())
}

fn clean_field(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .filter(|v| !matches!(v.to_lowercase().as_str(), "null" | "none" | "n/a" | "unknown"))
}

/// Parse model output into a plan
pub fn parse_planner_response(response: &str) -> Result<Plan, LlmError> {
    let json = extract_json(response)
        .ok_or_else(|| LlmError::InvalidJson("No valid JSON found".to_string()))?;

    let output: PlannerOutput = serde_json::from_str(json)
        .map_err(|e| LlmError::InvalidJson(format!("Planner schema violation: {}", e)))?;

    let confidence = output.confidence.unwrap_or(DEFAULT_MODEL_CONFIDENCE);
    let planner_confidence = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    Ok(Plan {
        intent: Intent::parse(&output.intent),
        symptom: clean_field(output.symptom),
        appliance: clean_field(output.appliance).and_then(|a| normalize_appliance(&a)),
        brand: clean_field(output.brand),
        part_id: clean_field(output.part_id).map(|p| p.to_uppercase()),
        model_id: clean_field(output.model_id).map(|m| m.to_uppercase()),
        planner_confidence,
    })
}

/// Deterministic plan for a bare model-number reply to an open symptom turn.
/// Fires only while the session is waiting for a model.
pub fn continuation_plan(text: &str, extraction: &Extraction, ctx: &PlanContext) -> Option<Plan> {
    if ctx.pending != PendingSlot::AwaitingModel {
        return None;
    }
    let symptom = ctx.last_symptom.clone()?;
    if !extractor::is_bare_model_reply(text, extraction) {
        return None;
    }
    Some(Plan {
        intent: Intent::SymptomTroubleshoot,
        symptom: Some(symptom),
        appliance: ctx.appliance.clone(),
        brand: None,
        part_id: None,
        model_id: extraction.model_ids.first().cloned(),
        planner_confidence: CONTINUATION_CONFIDENCE,
    })
}

pub struct Planner {
    backend: Arc<dyn LlmBackend>,
    cache: Arc<Mutex<LruCache<String, Plan>>>,
    capacity: usize,
    timeout: Duration,
    max_tokens: u32,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Planner {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        capacity: usize,
        timeout: Duration,
        max_tokens: u32,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
            capacity: capacity.get(),
            timeout,
            max_tokens,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn from_config(backend: Arc<dyn LlmBackend>, config: &Config) -> Self {
        Self::new(
            backend,
            config.planner.cache_capacity,
            Duration::from_secs(config.llm.planner_timeout_secs),
            config.llm.planner_max_tokens,
        )
    }

    /// Classify a turn. Never fails: errors become the fallback plan.
    pub async fn plan(&self, text: &str, ctx: &PlanContext) -> PlanOutcome {
        let extraction = extractor::extract(text);
        if let Some(plan) = continuation_plan(text, &extraction, ctx) {
            info!(
                "Planner: continuation shortcut, model={:?}, symptom={:?}",
                plan.model_id, plan.symptom
            );
            return PlanOutcome {
                plan,
                origin: PlanOrigin::Continuation,
            };
        }

        let key = cache_key(text, ctx);
        if let Some(plan) = self.cache.lock().await.get(&key).cloned() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Planner: cache hit {}", &key[..12]);
            return PlanOutcome {
                plan,
                origin: PlanOrigin::Cache,
            };
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        // Lock is not held across the call: a racing miss costs one extra call
        match self.classify(text, ctx).await {
            Ok(plan) => {
                info!(
                    "Planner: intent={}, confidence={:.2}, symptom={:?}, appliance={:?}",
                    plan.intent, plan.planner_confidence, plan.symptom, plan.appliance
                );
                self.cache.lock().await.put(key, plan.clone());
                PlanOutcome {
                    plan,
                    origin: PlanOrigin::Model,
                }
            }
            Err(e) => {
                warn!("Planner failed ({}), using fallback plan", e);
                PlanOutcome {
                    plan: Plan::fallback(),
                    origin: PlanOrigin::Fallback,
                }
            }
        }
    }

    async fn classify(&self, text: &str, ctx: &PlanContext) -> Result<Plan, LlmError> {
        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt: build_planner_prompt(text, ctx),
            max_tokens: self.max_tokens,
            temperature: 0.0,
        };

        let response = tokio::time::timeout(self.timeout, self.backend.complete(&request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))??;

        parse_planner_response(&response)
    }

    pub async fn cache_stats(&self) -> CacheStats {
        let size = self.cache.lock().await.len();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            size,
            capacity: self.capacity,
            hits,
            misses,
            hit_rate_pct: if total == 0 {
                0.0
            } else {
                (hits as f64 / total as f64 * 1000.0).round() / 10.0
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FakeLlmBackend;

    const TROUBLESHOOT: &str = r#"{"intent":"symptom_troubleshoot","confidence":0.85,"symptom":"ice maker not working","appliance":"fridge","part_id":null,"model_id":"null"}"#;

    fn planner(fake: Arc<FakeLlmBackend>) -> Planner {
        Planner::new(fake, 1000, Duration::from_secs(2), 220)
    }

    #[test]
    fn test_parse_response_normalizes_fields() {
        let plan = parse_planner_response(TROUBLESHOOT).unwrap();
        assert_eq!(plan.intent, Intent::SymptomTroubleshoot);
        assert_eq!(plan.appliance.as_deref(), Some("refrigerator"));
        assert_eq!(plan.model_id, None);
        assert!((plan.planner_confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_parse_response_clamps_and_defaults() {
        let plan = parse_planner_response(r#"{"intent":"install_help","confidence":3.5}"#).unwrap();
        assert_eq!(plan.planner_confidence, 1.0);
        let plan = parse_planner_response(r#"{"intent":"weird_label"}"#).unwrap();
        assert_eq!(plan.intent, Intent::GeneralQuestion);
        assert_eq!(plan.planner_confidence, DEFAULT_MODEL_CONFIDENCE);
    }

    #[test]
    fn test_parse_response_rejects_schema_violation() {
        assert!(parse_planner_response(r#"{"confidence":0.9}"#).is_err());
        assert!(parse_planner_response("I think it's a lookup").is_err());
    }

    #[test]
    fn test_cache_key_depends_on_context() {
        let a = cache_key("My ice maker  is broken", &PlanContext::default());
        let b = cache_key("my ice maker is broken ", &PlanContext::default());
        assert_eq!(a, b);

        let ctx = PlanContext {
            last_model: Some("WDT780SAEM1".into()),
            ..Default::default()
        };
        assert_ne!(a, cache_key("my ice maker is broken", &ctx));
    }

    #[tokio::test]
    async fn test_cache_idempotence() {
        let fake = Arc::new(FakeLlmBackend::new().otherwise(TROUBLESHOOT));
        let planner = planner(fake.clone());
        let ctx = PlanContext::default();

        let first = planner.plan("My ice maker isn't working", &ctx).await;
        let second = planner.plan("my ice maker isn't   working", &ctx).await;

        assert_eq!(fake.call_count(), 1);
        assert_eq!(first.plan, second.plan);
        assert_eq!(first.origin, PlanOrigin::Model);
        assert_eq!(second.origin, PlanOrigin::Cache);

        let stats = planner.cache_stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn test_failure_returns_fallback_and_is_not_cached() {
        let fake = Arc::new(FakeLlmBackend::new().otherwise("not json at all"));
        let planner = planner(fake.clone());
        let ctx = PlanContext::default();

        let outcome = planner.plan("hello there", &ctx).await;
        assert_eq!(outcome.origin, PlanOrigin::Fallback);
        assert_eq!(outcome.plan, Plan::fallback());

        planner.plan("hello there", &ctx).await;
        assert_eq!(fake.call_count(), 2);
        assert_eq!(planner.cache_stats().await.size, 0);
    }

    #[tokio::test]
    async fn test_timeout_returns_fallback() {
        let fake = Arc::new(
            FakeLlmBackend::new()
                .otherwise(TROUBLESHOOT)
                .with_delay(Duration::from_millis(200)),
        );
        let planner = Planner::new(fake, 10, Duration::from_millis(20), 220);
        let outcome = planner.plan("my dishwasher leaks", &PlanContext::default()).await;
        assert_eq!(outcome.origin, PlanOrigin::Fallback);
        assert_eq!(outcome.plan.intent, Intent::ClarificationNeeded);
        assert_eq!(outcome.plan.planner_confidence, 0.0);
    }

    #[tokio::test]
    async fn test_continuation_requires_open_model_request() {
        let fake = Arc::new(FakeLlmBackend::new().otherwise(r#"{"intent":"general_question","confidence":0.4}"#));
        let planner = planner(fake.clone());

        let waiting = PlanContext {
            last_symptom: Some("ice maker not working".into()),
            appliance: Some("refrigerator".into()),
            pending: PendingSlot::AwaitingModel,
            ..Default::default()
        };
        let outcome = planner.plan("106.50522500", &waiting).await;
        assert_eq!(outcome.origin, PlanOrigin::Continuation);
        assert_eq!(outcome.plan.intent, Intent::SymptomTroubleshoot);
        assert_eq!(outcome.plan.symptom.as_deref(), Some("ice maker not working"));
        assert_eq!(outcome.plan.model_id.as_deref(), Some("106.50522500"));
        assert_eq!(fake.call_count(), 0);

        // Same reply without the open request goes to the model
        let idle = PlanContext {
            last_symptom: Some("ice maker not working".into()),
            ..Default::default()
        };
        let outcome = planner.plan("106.50522500", &idle).await;
        assert_eq!(outcome.origin, PlanOrigin::Model);
        assert_eq!(fake.call_count(), 1);
    }

    #[test]
    fn test_prompt_contains_context_only_when_present() {
        let prompt = build_planner_prompt("hi", &PlanContext::default());
        assert_eq!(prompt, "User: hi");
        let ctx = PlanContext {
            last_model: Some("WDT780SAEM1".into()),
            pending: PendingSlot::AwaitingIssue,
            ..Default::default()
        };
        let prompt = build_planner_prompt("hi", &ctx);
        assert!(prompt.contains("model=WDT780SAEM1"));
        assert!(prompt.contains("waiting_for=awaiting_issue"));
    }
}
