//! Completion backend abstraction.
//!
//! The planner and the prose generator both talk to a text-completion
//! service through `LlmBackend`. `HttpLlmBackend` speaks Ollama's
//! /api/generate or an OpenAI-compatible /v1/chat/completions;
//! `FakeLlmBackend` returns scripted text for deterministic tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::config::{LlmApi, LlmConfig};

/// LLM errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("LLM is disabled in configuration")]
    Disabled,

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Invalid JSON response: {0}")]
    InvalidJson(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("LLM returned empty response")]
    EmptyResponse,
}

/// One completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Return the raw completion text
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

// ============================================================================
// HTTP backend
// ============================================================================

pub struct HttpLlmBackend {
    config: LlmConfig,
    client: reqwest::Client,
}

impl HttpLlmBackend {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        // Per-call deadlines are enforced by callers; this is a backstop.
        let backstop = config
            .planner_timeout_secs
            .max(config.generation_timeout_secs)
            + 5;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(backstop))
            .build()
            .map_err(|e| LlmError::HttpError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout(self.config.generation_timeout_secs)
        } else {
            LlmError::HttpError(format!("Request failed: {}", e))
        }
    }

    async fn call_ollama(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let url = format!("{}/api/generate", self.config.endpoint.trim_end_matches('/'));

        let body = serde_json::json!({
            "model": self.config.model,
            "system": request.system,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(LlmError::HttpError(format!(
                "HTTP {} from Ollama",
                response.status()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidJson(format!("Failed to parse response: {}", e)))?;

        json.get("response")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(LlmError::EmptyResponse)
    }

    async fn call_openai(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        );

        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.prompt},
            ],
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        let mut builder = self.client.post(&url).json(&body);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(LlmError::HttpError(format!(
                "HTTP {} from OpenAI-compatible API",
                response.status()
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidJson(format!("Failed to parse response: {}", e)))?;

        json.pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(LlmError::EmptyResponse)
    }
}

#[async_trait]
impl LlmBackend for HttpLlmBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        if !self.config.enabled {
            return Err(LlmError::Disabled);
        }

        debug!(
            "LLM call to {} ({} prompt bytes)",
            self.config.endpoint,
            request.prompt.len()
        );

        let text = match self.config.api {
            LlmApi::Ollama => self.call_ollama(request).await?,
            LlmApi::Openai => self.call_openai(request).await?,
        };

        if text.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        match self.config.api {
            LlmApi::Ollama => "ollama",
            LlmApi::Openai => "openai",
        }
    }
}

// ============================================================================
// Fake backend
// ============================================================================

/// Scripted backend. Rules are checked in order against the prompt; the
/// first rule whose needle appears wins. Queued responses take priority.
#[derive(Default)]
pub struct FakeLlmBackend {
    rules: Vec<(String, Result<String, LlmError>)>,
    queue: Mutex<VecDeque<Result<String, LlmError>>>,
    fallback: Option<Result<String, LlmError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl FakeLlmBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `response` whenever the prompt contains `needle`
    pub fn on(mut self, needle: &str, response: &str) -> Self {
        self.rules.push((needle.to_string(), Ok(response.to_string())));
        self
    }

    /// Fail whenever the prompt contains `needle`
    pub fn fail_on(mut self, needle: &str, error: LlmError) -> Self {
        self.rules.push((needle.to_string(), Err(error)));
        self
    }

    /// Answer for prompts no rule matched
    pub fn otherwise(mut self, response: &str) -> Self {
        self.fallback = Some(Ok(response.to_string()));
        self
    }

    pub fn otherwise_fail(mut self, error: LlmError) -> Self {
        self.fallback = Some(Err(error));
        self
    }

    /// Sleep before answering, to exercise timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, response: Result<String, LlmError>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(response);
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmBackend for FakeLlmBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        if let Some(response) = queued {
            return response;
        }

        self.rules
            .iter()
            .find(|(needle, _)| request.prompt.contains(needle.as_str()))
            .map(|(_, response)| response.clone())
            .or_else(|| self.fallback.clone())
            .unwrap_or(Err(LlmError::EmptyResponse))
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Pull the first JSON object out of model output. Handles bare JSON,
/// ```json fences, plain fences and JSON embedded in prose.
pub fn extract_json(response: &str) -> Option<&str> {
    let t = response.trim();
    // Direct JSON
    if t.starts_with('{') && t.ends_with('}') {
        return Some(t);
    }
    // Markdown code block
    if let Some(s) = t.find("```json") {
        let body = &t[s + 7..];
        if let Some(e) = body.find("```") {
            let inner = body[..e].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }
    // Plain code block
    if let Some(s) = t.find("```") {
        let body = &t[s + 3..];
        if let Some(e) = body.find("```") {
            let inner = body[..e].trim();
            if let Some(brace) = inner.find('{') {
                return Some(inner[brace..].trim());
            }
        }
    }
    // First balanced object anywhere
    let start = t.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in t[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&t[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
