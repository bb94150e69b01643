//! External AI enrichment for the enriched tier.
//!
//! The [`Enricher`] trait abstracts an untrusted text-generation service.
//! [`OpenAIEnricher`] talks to any OpenAI-compatible `chat/completions`
//! endpoint. [`generate_report`] is the only entry point the lifecycle
//! uses: it always returns a report, falling back to the deterministic
//! generator when the service is unreachable, slow, or replies with
//! something that does not parse.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry with exponential backoff (1s, 2s, 4s, ...)
//! - HTTP 4xx (not 429) → fail immediately
//! - Network errors → retry
//!
//! Retries run inside the overall deadline passed to [`generate_report`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use profile_vault_core::aggregate::AggregatedStats;
use profile_vault_core::insight::{
    build_prompt, generate_deterministic, parse_enriched, InsightParams, InsightReport,
};
use profile_vault_core::models::Tier;
use tracing::{info, warn};

use crate::config::EnrichmentConfig;

const DEFAULT_URL: &str = "https://api.openai.com/v1";

/// A text-generation backend.
#[async_trait]
pub trait Enricher: Send + Sync {
    fn model_name(&self) -> &str;

    /// Send `prompt`, return the raw reply text.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Build the configured enricher, or `None` when enrichment is disabled.
pub fn create_enricher(config: &EnrichmentConfig) -> Result<Option<Arc<dyn Enricher>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Arc::new(OpenAIEnricher::new(config)?))),
        other => bail!("Unknown enrichment provider: '{}'", other),
    }
}

/// Client for an OpenAI-compatible chat completions API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIEnricher {
    model: String,
    base_url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIEnricher {
    pub fn new(config: &EnrichmentConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EnrichmentConfig, api_key: String) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("enrichment.model required for OpenAI provider"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_URL.to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }
}

#[async_trait]
impl Enricher for OpenAIEnricher {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                {"role": "system", "content": "Reply with a single JSON object and nothing else."},
                {"role": "user", "content": prompt},
            ],
        });
        let endpoint = format!("{}/chat/completions", self.base_url);

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&endpoint)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_chat_response(&json);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow::anyhow!(
                            "Enrichment API error {}: {}",
                            status,
                            body_text
                        ));
                        continue;
                    }
                    bail!("Enrichment API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Enrichment failed after retries")))
    }
}

/// Extract `choices[0].message.content`.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid chat completion response: missing content"))
}

/// Produce the report for `tier`. Never fails.
pub async fn generate_report(
    stats: &AggregatedStats,
    tier: Tier,
    params: &InsightParams,
    enricher: Option<&dyn Enricher>,
    deadline: Duration,
) -> InsightReport {
    let enricher = match (tier, enricher) {
        (Tier::Enriched, Some(e)) => e,
        (Tier::Enriched, None) => {
            warn!("enriched tier requested but enrichment is disabled; using deterministic report");
            return generate_deterministic(stats, tier, params);
        }
        (Tier::Deterministic, _) => return generate_deterministic(stats, tier, params),
    };

    let prompt = build_prompt(stats);
    match tokio::time::timeout(deadline, enricher.complete(&prompt)).await {
        Ok(Ok(reply)) => match parse_enriched(&reply, tier) {
            Some(report) => {
                info!(model = enricher.model_name(), "enriched report generated");
                report
            }
            None => {
                warn!(
                    model = enricher.model_name(),
                    "enrichment reply did not match the report shape; falling back"
                );
                generate_deterministic(stats, tier, params)
            }
        },
        Ok(Err(e)) => {
            warn!(model = enricher.model_name(), error = %e, "enrichment failed; falling back");
            generate_deterministic(stats, tier, params)
        }
        Err(_) => {
            warn!(
                model = enricher.model_name(),
                deadline_secs = deadline.as_secs_f64(),
                "enrichment timed out; falling back"
            );
            generate_deterministic(stats, tier, params)
        }
    }
}
