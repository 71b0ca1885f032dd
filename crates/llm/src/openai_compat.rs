//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Azure-fronted deployments, vLLM, Together, and any
//! other endpoint that follows the chat completions contract.

use serde_json::Value;

use mr_domain::config::LlmProviderConfig;
use mr_domain::error::{Error, Result};

use crate::traits::{CompletionRequest, CompletionResponse, LlmClient, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM adapter for any OpenAI-compatible chat completions endpoint.
pub struct OpenAiCompatClient {
    id: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    /// Create a new client from the provider config. The API key env var
    /// named in config is read once here.
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
            "messages": [
                {"role": "system", "content": req.system},
                {"role": "user", "content": req.user},
            ],
        });
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if req.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_body(&req);

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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

        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let model = parsed["model"].as_str().unwrap_or(&self.model).to_string();
        let usage = parsed.get("usage").map(|u| Usage {
            prompt_tokens: u["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: u["completion_tokens"].as_u64().unwrap_or(0) as u32,
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

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Map an HTTP failure status to a domain error. 429 and 5xx are
/// transient (the selector may fall back); other 4xx are permanent.
pub(crate) fn status_to_error(provider: &str, status: u16, body: &str) -> mr_domain::error::Error {
    match status {
        429 => Error::UpstreamRateLimited(format!("{provider} returned 429: {body}")),
        s if (500..600).contains(&s) => {
            Error::UpstreamUnavailable(format!("{provider} returned {s}: {body}"))
        }
        s => Error::Internal(format!("{provider} returned {s}: {body}")),
    }
}

pub(crate) fn from_reqwest(e: reqwest::Error) -> mr_domain::error::Error {
    if e.is_timeout() {
        Error::UpstreamUnavailable(format!("timeout: {e}"))
    } else {
        Error::UpstreamUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_maps_to_transient() {
        let e = status_to_error("primary", 429, "slow down");
        assert_eq!(e.kind(), "UpstreamRateLimited");
        assert!(e.is_transient());
    }

    #[test]
    fn server_error_maps_to_transient() {
        let e = status_to_error("primary", 503, "overloaded");
        assert!(e.is_transient());
    }

    #[test]
    fn client_error_is_permanent() {
        let e = status_to_error("primary", 400, "bad request");
        assert!(!e.is_transient());
    }
}
