//! Per-conversation state.
//!
//! `SessionStore` maps conversation ids to sessions. Each session sits
//! behind its own mutex; a turn checks it out for its whole duration so two
//! turns on the same conversation serialize while different conversations
//! run in parallel.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parts_common::{PendingSlot, ResponseType, SessionSnapshot, TurnView};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};

use crate::planner::PlanContext;

/// Turns shown by session introspection
const SNAPSHOT_TURNS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub response_type: Option<ResponseType>,
    pub at: DateTime<Utc>,
}

/// Entities carried into a turn from earlier ones
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Carryover {
    pub model: Option<String>,
    pub model_valid: bool,
    pub symptom: Option<String>,
    pub part: Option<String>,
    pub appliance: Option<String>,
    pub brand: Option<String>,
    pub pending: PendingSlot,
}

impl Carryover {
    pub fn is_empty(&self) -> bool {
        self.model.is_none() && self.symptom.is_none() && self.part.is_none()
    }
}

/// What a finished turn writes back
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    /// Drop carried entities before applying the rest
    pub reset: bool,
    pub model: Option<(String, bool)>,
    pub symptom: Option<String>,
    pub part: Option<String>,
    pub appliance: Option<String>,
    pub brand: Option<String>,
    /// None leaves the pending slot unchanged
    pub pending: Option<PendingSlot>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub last_model: Option<String>,
    pub last_model_valid: bool,
    pub last_symptom: Option<String>,
    pub last_part: Option<String>,
    pub appliance: Option<String>,
    pub brand: Option<String>,
    pub pending: PendingSlot,
    turns: VecDeque<Turn>,
    max_turns: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: &str, max_turns: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            last_model: None,
            last_model_valid: false,
            last_symptom: None,
            last_part: None,
            appliance: None,
            brand: None,
            pending: PendingSlot::None,
            turns: VecDeque::new(),
            max_turns: max_turns.max(2),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn carryover(&self) -> Carryover {
        Carryover {
            model: self.last_model.clone(),
            model_valid: self.last_model_valid,
            symptom: self.last_symptom.clone(),
            part: self.last_part.clone(),
            appliance: self.appliance.clone(),
            brand: self.brand.clone(),
            pending: self.pending,
        }
    }

    pub fn plan_context(&self) -> PlanContext {
        PlanContext {
            last_model: self.last_model.clone(),
            last_symptom: self.last_symptom.clone(),
            last_part: self.last_part.clone(),
            appliance: self.appliance.clone(),
            pending: self.pending,
        }
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    fn push_turn(&mut self, role: Role, content: &str, response_type: Option<ResponseType>) {
        self.turns.push_back(Turn {
            role,
            content: content.to_string(),
            response_type,
            at: Utc::now(),
        });
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    /// Record a completed exchange and merge its entities
    pub fn record_turn(
        &mut self,
        user_text: &str,
        reply: &str,
        response_type: ResponseType,
        update: SessionUpdate,
    ) {
        if update.reset {
            self.last_model = None;
            self.last_model_valid = false;
            self.last_symptom = None;
            self.last_part = None;
            self.appliance = None;
            self.brand = None;
            self.pending = PendingSlot::None;
        }
        if let Some((model, valid)) = update.model {
            self.last_model = Some(model);
            self.last_model_valid = valid;
        }
        if update.symptom.is_some() {
            self.last_symptom = update.symptom;
        }
        if update.part.is_some() {
            self.last_part = update.part;
        }
        if update.appliance.is_some() {
            self.appliance = update.appliance;
        }
        if update.brand.is_some() {
            self.brand = update.brand;
        }
        if let Some(pending) = update.pending {
            self.pending = pending;
        }

        self.push_turn(Role::User, user_text, None);
        self.push_turn(Role::Assistant, reply, Some(response_type));
        self.updated_at = Utc::now();
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let skip = self.turns.len().saturating_sub(SNAPSHOT_TURNS);
        SessionSnapshot {
            conversation_id: self.id.clone(),
            last_model: self.last_model.clone(),
            last_model_valid: self.last_model_valid,
            last_symptom: self.last_symptom.clone(),
            last_part: self.last_part.clone(),
            appliance: self.appliance.clone(),
            brand: self.brand.clone(),
            pending: self.pending,
            turn_count: self.turns.len(),
            recent_turns: self
                .turns
                .iter()
                .skip(skip)
                .map(|t| TurnView {
                    role: t.role.as_str().to_string(),
                    content: t.content.clone(),
                    response_type: t.response_type,
                    at: t.at,
                })
                .collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Explicit store of live sessions, passed by handle into the engine
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    max_turns: usize,
}

impl SessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns,
        }
    }

    /// Lock a conversation for one turn, creating it on first use. The guard
    /// serializes turns on the same conversation.
    ///
    /// The entry can be pruned or cleared between cloning it and acquiring
    /// its lock; the map is re-checked once locked and checkout starts over
    /// if the locked session is no longer the live one.
    pub async fn checkout(&self, conversation_id: &str) -> OwnedMutexGuard<Session> {
        loop {
            let entry = self.entry(conversation_id).await;
            let guard = entry.clone().lock_owned().await;
            let live = self
                .sessions
                .read()
                .await
                .get(conversation_id)
                .is_some_and(|current| Arc::ptr_eq(current, &entry));
            if live {
                return guard;
            }
            debug!("Session {} dropped during checkout, retrying", conversation_id);
        }
    }

    async fn entry(&self, conversation_id: &str) -> Arc<Mutex<Session>> {
        if let Some(entry) = self.sessions.read().await.get(conversation_id).cloned() {
            return entry;
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                debug!("Session created: {}", conversation_id);
                Arc::new(Mutex::new(Session::new(conversation_id, self.max_turns)))
            })
            .clone()
    }

    pub async fn snapshot(&self, conversation_id: &str) -> Option<SessionSnapshot> {
        let entry = self.sessions.read().await.get(conversation_id).cloned()?;
        let session = entry.lock().await;
        Some(session.snapshot())
    }

    /// Drop a conversation. Returns whether it existed.
    pub async fn clear(&self, conversation_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(conversation_id).is_some();
        if removed {
            info!("Session cleared: {}", conversation_id);
        }
        removed
    }

    /// Remove sessions idle longer than `ttl`. Sessions mid-turn are kept.
    pub async fn prune_idle(&self, ttl: std::time::Duration) -> usize {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::days(36_500));
        let cutoff = Utc::now() - ttl;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| match entry.try_lock() {
            Ok(session) => session.updated_at >= cutoff,
            Err(_) => true,
        });
        let pruned = before - sessions.len();
        if pruned > 0 {
            info!("Pruned {} idle sessions", pruned);
        }
        pruned
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
