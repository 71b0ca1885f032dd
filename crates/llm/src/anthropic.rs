//! Anthropic-native adapter.
//!
//! Implements the Anthropic Messages API with the provider-specific
//! structure where the system prompt goes in a separate top-level
//! `system` field.

use serde_json::Value;

use mr_domain::config::LlmProviderConfig;
use mr_domain::error::{Error, Result};

use crate::openai_compat::{from_reqwest, status_to_error};
use crate::traits::{CompletionRequest, CompletionResponse, LlmClient, Usage};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Output ceiling sent when the caller does not set one; the Messages API
/// requires `max_tokens` on every request.
const DEFAULT_MAX_TOKENS: u32 = 4_096;

/// An LLM adapter for the Anthropic Messages API.
pub struct AnthropicClient {
    id: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    /// Create a new client from the provider config.
    pub fn from_config(cfg: &LlmProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env).map_err(|_| {
            Error::Config(format!(
                "environment variable '{}' not set for provider '{}'",
                cfg.api_key_env, cfg.id
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone(),
            client,
        })
    }

    fn build_body(&self, req: &CompletionRequest) -> Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "system": req.system,
            "messages": [
                {"role": "user", "content": req.user},
            ],
        });
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        // No JSON response mode on this API — the prompt carries the
        // output-format instruction instead.
        body
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&req);

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;

        if !status.is_success() {
            return Err(status_to_error(&self.id, status.as_u16(), &text));
        }

        let parsed: Value = serde_json::from_str(&text).map_err(|e| {
            Error::UpstreamUnavailable(format!("{}: malformed response body: {e}", self.id))
        })?;

        // Content blocks: concatenate the text segments.
        let content = parsed["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        let model = parsed["model"].as_str().unwrap_or(&self.model).to_string();
        let usage = parsed.get("usage").map(|u| Usage {
            prompt_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
        });

        Ok(CompletionResponse {
            content,
            usage,
            model,
        })
    }

    fn client_id(&self) -> &str {
        &self.id
    }
}
