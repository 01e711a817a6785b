//! Turn orchestration.
//!
//! One `handle_turn` call runs the whole pipeline for a chat message:
//! extraction, pre-check, planner and catalog prefetch (joined), topic
//! drift, resolution, scope, confidence, routing, the handler, validation
//! and the session merge. Engine-level problems never surface as errors;
//! they degrade to clarification responses.

use anyhow::{Context, Result};
use chrono::Utc;
use parts_common::{
    AssistantResponse, CacheStats, ChatRequest, ChatResponse, DetectedInfo, HealthResponse,
    PendingSlot, SessionSnapshot,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::extractor::{self, Extraction};
use crate::generator::Generator;
use crate::guardrails::{self, check_scope, Drift, Precheck, ScopeCheck};
use crate::handlers::{self, Handlers};
use crate::llm::LlmBackend;
use crate::metrics::EngineMetrics;
use crate::planner::{Plan, PlanOrigin, PlanOutcome, Planner};
use crate::resolver::{self, ResolvedEntities};
use crate::retrieval::Retriever;
use crate::router::{self, ClarifyReason, RouteDecision, RouteInputs, RuleFired};
use crate::scoring::{self, ConfidenceSignals};
use crate::session::{Carryover, Session, SessionStore, SessionUpdate};
use crate::similarity::SimilarityIndex;
use crate::truth_store::{Prefetch, TruthStore};
use crate::validator;

/// Everything one turn decided, for the session merge and metrics
struct TurnOutcome {
    response: AssistantResponse,
    update: SessionUpdate,
    rule: RuleFired,
    origin: PlanOrigin,
    confidence: f64,
}

pub struct Engine {
    config: Config,
    store: Arc<TruthStore>,
    planner: Planner,
    sessions: Arc<SessionStore>,
    handlers: Handlers,
    metrics: EngineMetrics,
    started: Instant,
}

impl Engine {
    pub fn new(
        config: Config,
        store: Arc<TruthStore>,
        llm: Arc<dyn LlmBackend>,
        index: Arc<dyn SimilarityIndex>,
    ) -> Result<Self> {
        let metrics = EngineMetrics::new().context("Failed to register metrics")?;
        let planner = Planner::from_config(llm.clone(), &config);
        let generator = Arc::new(Generator::from_config(llm, &config));
        let retriever = Arc::new(
            Retriever::new(index, store.clone(), &config.retrieval).with_metrics(metrics.clone()),
        );
        let handlers = Handlers::new(store.clone(), retriever, generator);
        let sessions = Arc::new(SessionStore::new(config.session.max_turns));

        info!(
            "Engine ready: {} parts, {} models",
            store.part_count(),
            store.model_count()
        );

        Ok(Self {
            config,
            store,
            planner,
            sessions,
            handlers,
            metrics,
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<TruthStore> {
        &self.store
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Answer one chat message
    pub async fn handle_turn(&self, request: ChatRequest) -> ChatResponse {
        let started = Instant::now();
        let conversation_id = request
            .conversation_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let text = request.message.trim().to_string();

        // One deadline covers waiting for the conversation and the turn itself
        let deadline = tokio::time::Instant::now() + self.config.turn_deadline();

        // Held until the merge: turns on one conversation run one at a time
        let checkout = tokio::time::timeout_at(deadline, self.sessions.checkout(&conversation_id));
        let outcome = match checkout.await {
            Ok(mut session) => {
                let turn = tokio::time::timeout_at(deadline, self.run_turn(&text, &session));
                let mut outcome = turn.await.unwrap_or_else(|_| {
                    warn!("Turn {} ran past its deadline", conversation_id);
                    deadline_outcome()
                });
                let reply = outcome
                    .response
                    .message
                    .clone()
                    .or_else(|| outcome.response.explanation.clone())
                    .unwrap_or_else(|| outcome.response.kind.to_string());
                let update = std::mem::take(&mut outcome.update);
                session.record_turn(&text, &reply, outcome.response.kind, update);
                outcome
            }
            Err(_) => {
                warn!("Turn {} timed out waiting for its conversation", conversation_id);
                deadline_outcome()
            }
        };

        let elapsed = started.elapsed().as_secs_f64();
        self.metrics.record_turn(
            outcome.response.kind.as_str(),
            outcome.rule.as_str(),
            outcome.origin.as_str(),
            outcome.confidence,
            elapsed,
        );
        info!(
            "Turn {}: {} (confidence={:.2}, {:.0}ms)",
            conversation_id,
            outcome.response.kind,
            outcome.response.confidence,
            elapsed * 1000.0
        );

        ChatResponse {
            conversation_id,
            response: outcome.response,
            timestamp: Utc::now(),
        }
    }

    /// Planner and catalog prefetch run together; screened turns skip the
    /// planner
    async fn plan_turn(
        &self,
        text: &str,
        extraction: &Extraction,
        pre: &Precheck,
        session: &Session,
    ) -> (PlanOutcome, Prefetch) {
        match pre {
            Precheck::Proceed => {
                let ctx = session.plan_context();
                tokio::join!(
                    self.planner.plan(text, &ctx),
                    self.store.prefetch(extraction)
                )
            }
            Precheck::Blocked { .. } | Precheck::OffDomain => {
                debug!("Planner skipped: {:?}", pre);
                let skipped = PlanOutcome {
                    plan: Plan::fallback(),
                    origin: PlanOrigin::Skipped,
                };
                (skipped, self.store.prefetch(extraction).await)
            }
        }
    }

    async fn run_turn(&self, text: &str, session: &Session) -> TurnOutcome {
        let extraction = extractor::extract(text);
        let mut carry = session.carryover();

        let pre = if text.is_empty() {
            Precheck::OffDomain
        } else {
            guardrails::precheck(text, &extraction, !carry.is_empty())
        };

        let (outcome, prefetch) = self.plan_turn(text, &extraction, &pre, session).await;
        let plan = outcome.plan;

        let drift = guardrails::check_topic_drift(session, &plan, &extraction);
        if let Drift::Reset(reason) = &drift {
            info!("Session {} reset: {}", session.id, reason);
            self.metrics.record_drift_reset();
            carry = Carryover::default();
        }

        let resolved = resolver::resolve(
            text,
            &extraction.candidate(),
            &prefetch,
            &plan,
            &carry,
            &self.store,
        );

        let scope = match &pre {
            Precheck::Blocked { appliance } => ScopeCheck::Blocked {
                appliance: appliance.clone(),
            },
            _ => guardrails::screen_turn(text, plan.appliance.as_deref(), !extraction.is_empty()),
        };

        let signals = ConfidenceSignals::gather(&resolved, &plan, &carry);
        let confidence = scoring::score(&signals);
        debug!("Confidence {:.3} from {:?}", confidence, signals);

        let (decision, rule) = router::select_route(&RouteInputs {
            text,
            resolved: &resolved,
            confidence,
            scope: &scope,
            has_carryover: !carry.is_empty(),
        });

        let response = self.handlers.dispatch(&decision, confidence, text).await;
        let (response, rejections) = validator::enforce(response, &self.store);
        for rejection in &rejections {
            self.metrics.record_rejection(rejection.kind());
        }

        TurnOutcome {
            response,
            update: session_update(&decision, &resolved, &scope, drift.is_reset()),
            rule,
            origin: outcome.origin,
            confidence,
        }
    }

    pub async fn session_snapshot(&self, conversation_id: &str) -> Option<SessionSnapshot> {
        self.sessions.snapshot(conversation_id).await
    }

    pub async fn clear_session(&self, conversation_id: &str) -> bool {
        let removed = self.sessions.clear(conversation_id).await;
        self.metrics.set_active_sessions(self.sessions.len().await);
        removed
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.planner.cache_stats().await
    }

    pub async fn health(&self) -> HealthResponse {
        let active = self.sessions.len().await;
        self.metrics.set_active_sessions(active);
        HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            parts_loaded: self.store.part_count(),
            models_loaded: self.store.model_count(),
            active_sessions: active,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    /// Drop idle sessions now
    pub async fn prune_sessions(&self) -> usize {
        let ttl = Duration::from_secs(self.config.session.idle_ttl_secs);
        let pruned = self.sessions.prune_idle(ttl).await;
        self.metrics.set_active_sessions(self.sessions.len().await);
        pruned
    }

    /// Prune idle sessions on the configured interval until the runtime stops
    pub fn spawn_session_pruner(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        let every = Duration::from_secs(engine.config.session.prune_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let pruned = engine.prune_sessions().await;
                if pruned > 0 {
                    debug!("Session pruner removed {}", pruned);
                }
            }
        })
    }
}

/// What a finished turn writes back into its session
/// Retry prompt for a turn that ran past its deadline. Carried entities and
/// the pending slot are left as they were.
fn deadline_outcome() -> TurnOutcome {
    TurnOutcome {
        response: handlers::clarification_needed(
            &ClarifyReason::TimedOut,
            &DetectedInfo::default(),
            0.0,
        ),
        update: SessionUpdate::default(),
        rule: RuleFired::Deadline,
        origin: PlanOrigin::Fallback,
        confidence: 0.0,
    }
}

fn session_update(
    decision: &RouteDecision,
    resolved: &ResolvedEntities,
    scope: &ScopeCheck,
    reset: bool,
) -> SessionUpdate {
    if !scope.is_allowed() {
        warn!("Out-of-scope turn: session entities left unchanged");
        return SessionUpdate {
            reset,
            ..Default::default()
        };
    }

    let pending = match decision {
        RouteDecision::ModelRequired { .. } => Some(PendingSlot::AwaitingModel),
        RouteDecision::IssueRequired { .. } => Some(PendingSlot::AwaitingIssue),
        RouteDecision::Clarify { .. } => None,
        _ => Some(PendingSlot::None),
    };

    let model = resolved
        .model_id
        .clone()
        .filter(|_| !resolved.model_from_session)
        .map(|m| (m, resolved.model_id_valid));

    let appliance = resolved
        .appliance
        .clone()
        .filter(|a| check_scope(a).is_allowed());

    SessionUpdate {
        reset,
        model,
        symptom: resolved.symptom.clone().filter(|_| !resolved.symptom_from_session),
        part: resolved.part_id.clone().filter(|_| resolved.part_id_valid),
        appliance,
        brand: resolved.brand.clone(),
        pending,
    }
}
