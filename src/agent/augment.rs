//! Research augmentation provider.
//!
//! Before the research turn the orchestrator may ask an external service
//! for extra context. Failures only produce a warning event.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait ResearchAugmenter: Send + Sync {
    /// Extra research context for `goal` in `round`.
    async fn augment(&self, goal: &str, round: u32) -> Result<String>;
}

/// POSTs `{"goal", "round"}` as JSON and accepts either `{"summary": ...}`
/// or a plain-text body.
pub struct HttpAugmenter {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct AugmentResponse {
    summary: String,
}

impl HttpAugmenter {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client for research augmentation")?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl ResearchAugmenter for HttpAugmenter {
    async fn augment(&self, goal: &str, round: u32) -> Result<String> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Accept", "application/json, text/plain")
            .json(&serde_json::json!({ "goal": goal, "round": round }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let body = request
            .send()
            .await
            .with_context(|| format!("Failed to reach research endpoint {}", self.endpoint))?
            .error_for_status()
            .context("Research endpoint returned error status")?
            .text()
            .await
            .context("Failed to read research endpoint response")?;

        let summary = parse_augment_body(&body);
        if summary.is_empty() {
            anyhow::bail!("Research endpoint returned an empty response");
        }
        Ok(summary)
    }
}

fn parse_augment_body(body: &str) -> String {
    match serde_json::from_str::<AugmentResponse>(body) {
        Ok(parsed) => parsed.summary.trim().to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_summary() {
        assert_eq!(
            parse_augment_body(r#"{"summary": "  use the v2 API  ", "sources": []}"#),
            "use the v2 API"
        );
    }

    #[test]
    fn test_parse_plain_text_body() {
        assert_eq!(parse_augment_body("plain notes\n"), "plain notes");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_error() {
        let augmenter = HttpAugmenter::new("http://127.0.0.1:9/augment", None).unwrap();
        let err = augmenter.augment("goal", 1).await.unwrap_err();
        assert!(err.to_string().contains("Failed to reach research endpoint"));
    }
}
