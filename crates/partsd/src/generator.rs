//! Prose generation.
//!
//! Asks the completion backend to phrase explanations, steps and tips from
//! facts the engine has already validated. Any failure yields `None` and the
//! caller falls back to a deterministic template.

use parts_common::PartRecord;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::llm::{extract_json, CompletionRequest, LlmBackend, LlmError};
use crate::retrieval::RankedCandidate;

const SYSTEM_PROMPT: &str = "You are an appliance repair assistant for refrigerator and dishwasher parts. \
Only mention part numbers that appear in the facts you are given. \
Answer with a single JSON object and nothing else.";

const TEMPERATURE: f32 = 0.3;

/// Longest description excerpt put into a prompt
const DESCRIPTION_CHARS: usize = 200;

/// Generated prose. Steps are installation steps for lookups and diagnostic
/// checks for troubleshooting.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Prose {
    #[serde(default)]
    pub explanation: String,
    #[serde(default, alias = "installation_steps", alias = "diagnostic_steps")]
    pub steps: Vec<String>,
    #[serde(default)]
    pub tips: Vec<String>,
}

impl Prose {
    fn cleaned(self) -> Self {
        let keep = |v: Vec<String>| -> Vec<String> {
            v.into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            explanation: self.explanation.trim().to_string(),
            steps: keep(self.steps),
            tips: keep(self.tips),
        }
    }
}

pub fn parse_prose(response: &str) -> Result<Prose, LlmError> {
    let json = extract_json(response)
        .ok_or_else(|| LlmError::InvalidJson("No valid JSON found".to_string()))?;
    let prose: Prose = serde_json::from_str(json)
        .map_err(|e| LlmError::InvalidJson(format!("Prose schema violation: {}", e)))?;
    Ok(prose.cleaned())
}

fn excerpt(text: &str) -> String {
    text.chars().take(DESCRIPTION_CHARS).collect()
}

fn or_unknown(value: Option<&str>) -> &str {
    value.filter(|v| !v.is_empty()).unwrap_or("not specified")
}

pub fn part_lookup_prompt(part: &PartRecord, user_text: &str) -> String {
    format!(
        r#"Task: part_lookup
Customer asked: "{}"

Part:
- Part ID: {}
- Title: {}
- Brand: {}
- Price: {}
- Description: {}
- Installation difficulty: {}
- Installation time: {}
- Video: {}

Respond with:
{{"explanation": "2-3 sentences confirming the part and what it does", "installation_steps": ["..."], "tips": ["..."]}}
Give 3 to 8 installation steps specific to this part. If a video is listed, mention it in the last step."#,
        user_text.trim(),
        part.part_id,
        part.title,
        or_unknown(part.brand.as_deref()),
        or_unknown(part.price_display.as_deref()),
        excerpt(&part.description),
        or_unknown(part.installation.difficulty.as_deref()),
        or_unknown(part.installation.time.as_deref()),
        or_unknown(part.installation.video_url.as_deref()),
    )
}

pub fn compatibility_prompt(
    part: &PartRecord,
    model_id: &str,
    compatible: bool,
    user_text: &str,
) -> String {
    format!(
        r#"Task: compatibility
Customer asked: "{}"

Part: {} - {}
Model: {}
Compatible: {}

Respond with:
{{"explanation": "2-3 sentences answering the compatibility question", "tips": ["..."]}}
If compatible, confirm it fits. If not, say what to look for in an alternative."#,
        user_text.trim(),
        part.part_id,
        part.title,
        model_id,
        compatible,
    )
}

pub fn diagnostic_prompt(
    symptom: &str,
    model_id: Option<&str>,
    parts: &[RankedCandidate],
    user_text: &str,
) -> String {
    let listed = parts
        .iter()
        .map(|c| {
            format!(
                "- {}: {} (score {:.2})\n  Description: {}",
                c.record.part_id,
                c.record.title,
                c.final_score,
                excerpt(&c.record.description)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Task: troubleshoot
Customer asked: "{}"

Symptom: {}
Model: {}

Recommended parts:
{}

Respond with:
{{"explanation": "2-3 sentences on the likely cause", "diagnostic_steps": ["..."], "tips": ["..."]}}"#,
        user_text.trim(),
        symptom,
        model_id.unwrap_or("unknown"),
        listed,
    )
}

pub struct Generator {
    backend: Arc<dyn LlmBackend>,
    timeout: Duration,
    max_tokens: u32,
}

impl Generator {
    pub fn new(backend: Arc<dyn LlmBackend>, timeout: Duration, max_tokens: u32) -> Self {
        Self {
            backend,
            timeout,
            max_tokens,
        }
    }

    pub fn from_config(backend: Arc<dyn LlmBackend>, config: &Config) -> Self {
        Self::new(
            backend,
            Duration::from_secs(config.llm.generation_timeout_secs),
            config.llm.generation_max_tokens,
        )
    }

    async fn complete(&self, prompt: String) -> Result<Prose, LlmError> {
        let request = CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            prompt,
            max_tokens: self.max_tokens,
            temperature: TEMPERATURE,
        };
        let response = tokio::time::timeout(self.timeout, self.backend.complete(&request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))??;
        parse_prose(&response)
    }

    /// Run one generation. Errors are logged and become `None`.
    async fn generate(&self, task: &str, prompt: String) -> Option<Prose> {
        match self.complete(prompt).await {
            Ok(prose) => {
                debug!("Generated {} prose ({} steps)", task, prose.steps.len());
                Some(prose)
            }
            Err(LlmError::Disabled) => None,
            Err(e) => {
                warn!("Generation failed for {} ({}), using template", task, e);
                None
            }
        }
    }

    pub async fn part_lookup(&self, part: &PartRecord, user_text: &str) -> Option<Prose> {
        self.generate("part_lookup", part_lookup_prompt(part, user_text))
            .await
    }

    pub async fn compatibility(
        &self,
        part: &PartRecord,
        model_id: &str,
        compatible: bool,
        user_text: &str,
    ) -> Option<Prose> {
        self.generate(
            "compatibility",
            compatibility_prompt(part, model_id, compatible, user_text),
        )
        .await
    }

    pub async fn diagnostic(
        &self,
        symptom: &str,
        model_id: Option<&str>,
        parts: &[RankedCandidate],
        user_text: &str,
    ) -> Option<Prose> {
        self.generate(
            "troubleshoot",
            diagnostic_prompt(symptom, model_id, parts, user_text),
        )
        .await
    }
}
