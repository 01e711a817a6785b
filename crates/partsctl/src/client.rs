//! HTTP client for partsd

use anyhow::{anyhow, Context, Result};
use parts_common::{CacheStats, ChatRequest, ChatResponse, HealthResponse, SessionSnapshot};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub struct PartsdClient {
    base: String,
    http: reqwest::Client,
}

impl PartsdClient {
    pub fn new(base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("partsd returned {}: {}", status, body.trim()));
        }
        response.json().await.context("Invalid response from partsd")
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(|e| unreachable_daemon(&self.base, e))?;
        Self::decode(response).await
    }

    pub async fn chat(&self, message: &str, conversation_id: Option<&str>) -> Result<ChatResponse> {
        let request = ChatRequest {
            conversation_id: conversation_id.map(str::to_string),
            message: message.to_string(),
        };
        let response = self
            .http
            .post(self.url("/v1/chat"))
            .json(&request)
            .send()
            .await
            .map_err(|e| unreachable_daemon(&self.base, e))?;
        Self::decode(response).await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.get("/v1/health").await
    }

    pub async fn cache_stats(&self) -> Result<CacheStats> {
        self.get("/v1/debug/cache-stats").await
    }

    pub async fn session(&self, id: &str) -> Result<SessionSnapshot> {
        self.get(&format!("/v1/session/{}", id)).await
    }

    /// Returns false when the daemon had no such session
    pub async fn clear_session(&self, id: &str) -> Result<bool> {
        let response = self
            .http
            .delete(self.url(&format!("/v1/session/{}", id)))
            .send()
            .await
            .map_err(|e| unreachable_daemon(&self.base, e))?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(anyhow!("partsd returned {}", s)),
        }
    }
}

fn unreachable_daemon(base: &str, e: reqwest::Error) -> anyhow::Error {
    anyhow!(
        "Cannot reach partsd at {}: {}\n\n\
         Is the daemon running? Check with:\n\
         systemctl status partsd",
        base,
        e
    )
}
