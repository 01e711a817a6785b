//! Configuration management for partsd.
//!
//! Loads settings from $PARTSD_CONFIG or /etc/partsd/config.toml, falling back
//! to defaults when neither is readable.

use parts_common::PartsError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "PARTSD_CONFIG";

/// Config file path
pub const CONFIG_PATH: &str = "/etc/partsd/config.toml";

/// Environment variable overriding the LLM API key
pub const API_KEY_ENV: &str = "PARTSD_LLM_API_KEY";

/// Slack past the turn deadline before the HTTP layer gives up
pub const REQUEST_MARGIN_SECS: u64 = 5;

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Upper bound on a whole chat request. Raised to cover the turn
    /// deadline when set lower, see `Config::request_timeout`.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_body_limit")]
    pub max_body_bytes: usize,
}

fn default_bind() -> String {
    "127.0.0.1:7870".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout(),
            max_body_bytes: default_body_limit(),
        }
    }
}

/// Catalog data locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_parts_path")]
    pub parts_path: String,

    #[serde(default = "default_models_path")]
    pub models_path: String,
}

fn default_parts_path() -> String {
    "/var/lib/partsd/part_id_map.json".to_string()
}

fn default_models_path() -> String {
    "/var/lib/partsd/model_id_to_parts_map.json".to_string()
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            parts_path: default_parts_path(),
            models_path: default_models_path(),
        }
    }
}

/// Which wire protocol the completion endpoint speaks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmApi {
    #[default]
    Ollama,
    Openai,
}

/// Completion service configuration, shared by planner and generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub api: LlmApi,

    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Planner classification timeout in seconds
    #[serde(default = "default_planner_timeout")]
    pub planner_timeout_secs: u64,

    /// Prose generation timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,

    #[serde(default = "default_planner_max_tokens")]
    pub planner_max_tokens: u32,

    #[serde(default = "default_generation_max_tokens")]
    pub generation_max_tokens: u32,
}

fn default_llm_enabled() -> bool {
    true
}

fn default_llm_endpoint() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}

fn default_planner_timeout() -> u64 {
    8
}

fn default_generation_timeout() -> u64 {
    30
}

fn default_planner_max_tokens() -> u32 {
    220
}

fn default_generation_max_tokens() -> u32 {
    700
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: default_llm_enabled(),
            api: LlmApi::default(),
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: None,
            planner_timeout_secs: default_planner_timeout(),
            generation_timeout_secs: default_generation_timeout(),
            planner_max_tokens: default_planner_max_tokens(),
            generation_max_tokens: default_generation_max_tokens(),
        }
    }
}

/// Planner cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_cache_capacity() -> usize {
    1000
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Similarity index backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalBackend {
    /// In-process token overlap over the catalog
    #[default]
    Lexical,
    /// Vector search sidecar over HTTP
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub backend: RetrievalBackend,

    #[serde(default = "default_index_endpoint")]
    pub endpoint: String,

    /// Candidates fetched from the index
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Parts returned to handlers
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

fn default_index_endpoint() -> String {
    "http://127.0.0.1:7871".to_string()
}

fn default_top_k() -> usize {
    20
}

fn default_top_n() -> usize {
    3
}

fn default_search_timeout() -> u64 {
    5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            backend: RetrievalBackend::default(),
            endpoint: default_index_endpoint(),
            top_k: default_top_k(),
            top_n: default_top_n(),
            timeout_secs: default_search_timeout(),
        }
    }
}

/// Session retention
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Turns kept per conversation
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Idle sessions older than this are pruned
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,

    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,
}

fn default_max_turns() -> usize {
    20
}

fn default_idle_ttl() -> u64 {
    3600
}

fn default_prune_interval() -> u64 {
    300
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            idle_ttl_secs: default_idle_ttl(),
            prune_interval_secs: default_prune_interval(),
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub planner: PlannerConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

impl Config {
    /// Load config from $PARTSD_CONFIG, then CONFIG_PATH, else defaults
    pub fn load() -> Self {
        let explicit = std::env::var(CONFIG_ENV).ok();
        let candidates = explicit.iter().map(String::as_str).chain([CONFIG_PATH]);

        let mut config = None;
        for path in candidates {
            if !Path::new(path).exists() {
                continue;
            }
            match Self::load_from(path) {
                Ok(c) => {
                    info!("Loaded config from {}", path);
                    config = Some(c);
                    break;
                }
                Err(e) => warn!("Failed to load config from {}: {}", path, e),
            }
        }

        let mut config = config.unwrap_or_else(|| {
            warn!("No config file found, using defaults");
            Self::default()
        });
        config.apply_env();
        if config.request_timeout().as_secs() > config.server.request_timeout_secs {
            warn!(
                "request_timeout_secs {} is below the turn deadline, using {}s",
                config.server.request_timeout_secs,
                config.request_timeout().as_secs()
            );
        }
        config
    }

    /// Longest one turn may run: planner, primary and broadened search,
    /// generation, plus a second for the deterministic stages
    pub fn turn_deadline(&self) -> Duration {
        let secs = self
            .llm
            .planner_timeout_secs
            .saturating_add(self.retrieval.timeout_secs.saturating_mul(2))
            .saturating_add(self.llm.generation_timeout_secs)
            .saturating_add(1);
        Duration::from_secs(secs)
    }

    /// HTTP request timeout, never shorter than the turn deadline plus margin
    pub fn request_timeout(&self) -> Duration {
        let floor = self.turn_deadline() + Duration::from_secs(REQUEST_MARGIN_SECS);
        Duration::from_secs(self.server.request_timeout_secs).max(floor)
    }

    pub fn load_from(path: &str) -> Result<Self, PartsError> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| PartsError::Config(format!("{}: {}", path, e)))
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.llm.api_key = Some(key);
            }
        }
    }
}
