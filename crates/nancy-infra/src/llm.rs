//! Linguistic model brain: a thin HTTP client over the Gemini
//! `generateContent` API.
//!
//! Grounded on `llm_client.py`'s `_call_gemini`: a single-turn REST call
//! with the system and user prompt concatenated into one `parts[0].text`,
//! and the reply read back out of
//! `candidates[0].content.parts[0].text`. The original also supports
//! Claude and a local Ollama/transformers fallback; only the Gemini path
//! is carried over here; intent analysis and response synthesis build on
//! top of this in `nancy-cognitive` and handle the no-API-key case there
//! with a templated fallback rather than a mock LLM response.

use std::time::Duration;

use async_trait::async_trait;
use nancy_core::contracts::{BrainHealth, LinguisticModel};
use nancy_types::error::{NancyError, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

pub struct GeminiLinguisticModel {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl GeminiLinguisticModel {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| NancyError::Other(format!("failed to build llm brain http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.model,
            self.api_key
        )
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
}

#[async_trait]
impl LinguisticModel for GeminiLinguisticModel {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(NancyError::LLMError(
                "no API key configured for the linguistic model brain".to_string(),
            ));
        }

        let combined = format!("{system_prompt}\n\n{user_prompt}");
        let body = json!({
            "contents": [{
                "parts": [{ "text": combined }]
            }]
        });

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| NancyError::LLMError(format!("request failed: {e}")))?
            .error_for_status()
            .map_err(|e| NancyError::LLMError(format!("non-success status: {e}")))?;

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| NancyError::LLMError(format!("malformed response: {e}")))?;

        if let Some(usage) = parsed.usage_metadata {
            debug!(
                input_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                "linguistic model call completed"
            );
        }

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| NancyError::LLMError("response had no candidates".to_string()))
    }

    async fn health(&self) -> Result<BrainHealth> {
        if self.api_key.is_empty() {
            return Ok(BrainHealth::unhealthy("no API key configured"));
        }
        Ok(BrainHealth::ok("api key configured"))
    }
}
