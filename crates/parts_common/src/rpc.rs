//! Wire protocol between partsd and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::records::PartView;

/// Inbound chat turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub message: String,
}

/// Outbound chat turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub response: AssistantResponse,
    pub timestamp: DateTime<Utc>,
}

/// Which strategy produced a response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    PartLookup,
    Compatibility,
    CompatibilityUnvalidated,
    SymptomTroubleshoot,
    SymptomTroubleshootUnvalidated,
    ModelRequired,
    IssueRequired,
    #[default]
    ClarificationNeeded,
}

impl ResponseType {
    pub const ALL: [ResponseType; 8] = [
        ResponseType::PartLookup,
        ResponseType::Compatibility,
        ResponseType::CompatibilityUnvalidated,
        ResponseType::SymptomTroubleshoot,
        ResponseType::SymptomTroubleshootUnvalidated,
        ResponseType::ModelRequired,
        ResponseType::IssueRequired,
        ResponseType::ClarificationNeeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::PartLookup => "part_lookup",
            ResponseType::Compatibility => "compatibility",
            ResponseType::CompatibilityUnvalidated => "compatibility_unvalidated",
            ResponseType::SymptomTroubleshoot => "symptom_troubleshoot",
            ResponseType::SymptomTroubleshootUnvalidated => "symptom_troubleshoot_unvalidated",
            ResponseType::ModelRequired => "model_required",
            ResponseType::IssueRequired => "issue_required",
            ResponseType::ClarificationNeeded => "clarification_needed",
        }
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether recommended parts were checked against the caller's model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fit {
    Verified,
    Unverified,
}

/// What a clarification response is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationKind {
    ModelNumber,
    IssueDescription,
    PartNumber,
    OutOfScope,
    General,
}

/// Entities the engine recognized, echoed back on clarification turns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appliance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_id: Option<String>,
}

/// Structured assistant reply. Field presence depends on `kind`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantResponse {
    #[serde(rename = "type")]
    pub kind: ResponseType,
    pub confidence: f64,
    #[serde(default)]
    pub requires_clarification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostic_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommended_parts: Vec<PartView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_parts: Vec<PartView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_parts: Vec<PartView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<PartView>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub helpful_tips: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clarification_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_type: Option<ClarificationKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatible: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symptom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit: Option<Fit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_info: Option<DetectedInfo>,
}

impl AssistantResponse {
    pub fn new(kind: ResponseType, confidence: f64) -> Self {
        Self {
            kind,
            confidence,
            ..Default::default()
        }
    }

    /// Every part id the response claims, in order of appearance
    pub fn claimed_part_ids(&self) -> Vec<&str> {
        self.part
            .iter()
            .chain(self.recommended_parts.iter())
            .chain(self.alternative_parts.iter())
            .chain(self.related_parts.iter())
            .map(|p| p.part_id.as_str())
            .collect()
    }

    /// All free text fields
    pub fn prose(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        out.extend(self.message.as_deref());
        out.extend(self.explanation.as_deref());
        out.extend(self.diagnostic_steps.iter().map(String::as_str));
        out.extend(self.helpful_tips.iter().map(String::as_str));
        out.extend(self.clarification_questions.iter().map(String::as_str));
        out
    }
}

/// Open question a session is waiting on the user to answer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingSlot {
    #[default]
    None,
    AwaitingModel,
    AwaitingIssue,
}

/// One turn as exposed by session introspection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnView {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_type: Option<ResponseType>,
    pub at: DateTime<Utc>,
}

/// Read-only view of a conversation's carried state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub conversation_id: String,
    pub last_model: Option<String>,
    pub last_model_valid: bool,
    pub last_symptom: Option<String>,
    pub last_part: Option<String>,
    pub appliance: Option<String>,
    pub brand: Option<String>,
    pub pending: PendingSlot,
    pub turn_count: usize,
    pub recent_turns: Vec<TurnView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Planner cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_pct: f64,
}

/// Daemon health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub parts_loaded: usize,
    pub models_loaded: usize,
    pub active_sessions: usize,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_type_wire_names() {
        for kind in ResponseType::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let resp = AssistantResponse::new(ResponseType::ModelRequired, 0.36);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["type"], "model_required");
        assert!(json.get("recommended_parts").is_none());
        assert!(json.get("compatible").is_none());
        assert!(json.get("explanation").is_none());
    }

    #[test]
    fn test_chat_request_without_conversation() {
        let req: ChatRequest = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        assert!(req.conversation_id.is_none());
        assert_eq!(req.message, "hi");
    }

    #[test]
    fn test_claimed_part_ids_order() {
        let mut resp = AssistantResponse::new(ResponseType::PartLookup, 0.9);
        resp.part = Some(PartView::from(&crate::PartRecord::new("PS111111", "A")));
        resp.related_parts = vec![PartView::from(&crate::PartRecord::new("PS222222", "B"))];
        assert_eq!(resp.claimed_part_ids(), vec!["PS111111", "PS222222"]);
    }
}
