//! Primary→fallback LLM selection and the two core operations.
//!
//! The selector tries the primary provider first and falls back to the
//! secondary only on *transient* failures (timeout, 5xx, rate limit).
//! Deterministic failures — malformed output, schema violations — never
//! trigger fallback: the same prompt would fail the same way on the
//! other provider, and retrying hides prompt bugs.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use mr_domain::config::LlmConfig;
use mr_domain::error::{Error, Result};
use mr_domain::memory::Memory;
use mr_domain::trace::TraceEvent;

use crate::schema::{parse_extraction, ExtractedCandidate};
use crate::traits::{CompletionRequest, CompletionResponse, LlmClient};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Prompts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const EXTRACT_SYSTEM: &str = "\
You mine durable facts about the caller from a voice-call transcript.\n\
Return ONLY a JSON array. Each element: {\"content\": string, \"type\": \
one of \"factual\"|\"preference\"|\"issue\"|\"emotion\"|\"relationship\", \
\"importance\": integer 1-10, \"confidence\": number 0-1, \
\"source_quote\": string}.\n\
Extract only facts worth remembering across calls: stable preferences, \
personal details, open issues, strong emotional signals, relationships. \
Skip pleasantries and one-off logistics. Return [] when nothing qualifies.";

const EXTRACT_SYSTEM_STRICT: &str = "\
Your previous response was not valid JSON. Respond with a JSON array and \
NOTHING else — no prose, no markdown fences, no explanations.\n\
Each element must be exactly: {\"content\": string, \"type\": \
\"factual\"|\"preference\"|\"issue\"|\"emotion\"|\"relationship\", \
\"importance\": integer 1-10, \"confidence\": number 0-1, \
\"source_quote\": string}. Return [] if nothing qualifies.";

const SUMMARIZE_SYSTEM: &str = "\
You write the opening line an AI voice agent speaks when a returning \
caller connects. One or two short sentences, warm but not saccharine, \
referencing the most relevant remembered detail naturally. Never mention \
that anything is stored or remembered by a system. Return only the \
greeting text.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Selector
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Wraps the configured providers with fallback, timeouts, and the two
/// operations the core needs. Pass it explicitly — no global state.
pub struct LlmSelector {
    primary: Arc<dyn LlmClient>,
    secondary: Option<Arc<dyn LlmClient>>,
    call_timeout: Duration,
    extract_max_input_chars: usize,
    summary_max_output_tokens: u32,
}

impl LlmSelector {
    /// Build the selector from the full LLM config.
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let primary = crate::create_client(&cfg.primary)?;
        let secondary = match &cfg.secondary {
            Some(sec) => Some(crate::create_client(sec)?),
            None => None,
        };
        Ok(Self::new(primary, secondary, cfg))
    }

    /// Build from already-constructed clients (useful for testing).
    pub fn new(
        primary: Arc<dyn LlmClient>,
        secondary: Option<Arc<dyn LlmClient>>,
        cfg: &LlmConfig,
    ) -> Self {
        Self {
            primary,
            secondary,
            call_timeout: Duration::from_secs(cfg.call_timeout_seconds),
            // ~4 chars per token; the ceiling is a guard, not an exact budget.
            extract_max_input_chars: cfg.extract_max_input_tokens.saturating_mul(4),
            summary_max_output_tokens: cfg.summary_max_output_tokens,
        }
    }

    // ── Operations ─────────────────────────────────────────────────

    /// Mine candidate memories from one transcript chunk.
    ///
    /// A malformed response earns exactly one re-prompt with stricter
    /// instructions; a second malformed response propagates as
    /// `InvalidLLMOutput`.
    pub async fn extract(
        &self,
        transcript_chunk: &str,
        agent_profile: &Value,
    ) -> Result<Vec<ExtractedCandidate>> {
        let chunk = truncate_chars(transcript_chunk, self.extract_max_input_chars);
        let user = format!(
            "Agent profile:\n{}\n\nTranscript:\n{}",
            compact_profile(agent_profile),
            chunk
        );

        let req = CompletionRequest {
            system: EXTRACT_SYSTEM.into(),
            user: user.clone(),
            max_tokens: None,
            temperature: Some(0.0),
            json_mode: true,
        };

        let resp = self.complete_with_fallback("extract", req).await?;
        match parse_extraction(&resp.content) {
            Ok(candidates) => Ok(candidates),
            Err(first_err) => {
                tracing::warn!(error = %first_err, "extraction output invalid, re-prompting");
                let retry = CompletionRequest {
                    system: EXTRACT_SYSTEM_STRICT.into(),
                    user,
                    max_tokens: None,
                    temperature: Some(0.0),
                    json_mode: true,
                };
                let resp = self.complete_with_fallback("extract_retry", retry).await?;
                parse_extraction(&resp.content)
            }
        }
    }

    /// Produce the personalized first message for a pre-call context.
    pub async fn summarize_first_message(
        &self,
        agent_profile: &Value,
        recent_memories: &[Memory],
    ) -> Result<String> {
        let mut digest = String::new();
        for m in recent_memories {
            digest.push_str("- [");
            digest.push_str(m.memory_type.as_str());
            digest.push_str(", importance ");
            digest.push_str(&m.importance.to_string());
            digest.push_str("] ");
            digest.push_str(&m.content);
            digest.push('\n');
        }

        let user = format!(
            "Agent profile:\n{}\n\nWhat we know about this caller:\n{}",
            compact_profile(agent_profile),
            if digest.is_empty() { "(nothing yet)" } else { digest.as_str() }
        );

        let req = CompletionRequest {
            system: SUMMARIZE_SYSTEM.into(),
            user,
            max_tokens: Some(self.summary_max_output_tokens),
            temperature: Some(0.7),
            json_mode: false,
        };

        let resp = self.complete_with_fallback("summarize", req).await?;
        let greeting = resp.content.trim().to_string();
        if greeting.is_empty() {
            return Err(Error::InvalidLlmOutput("empty greeting".into()));
        }
        Ok(greeting)
    }

    // ── Routing ────────────────────────────────────────────────────

    /// Try the primary; on transient failure, fall back to the secondary.
    async fn complete_with_fallback(
        &self,
        operation: &str,
        req: CompletionRequest,
    ) -> Result<CompletionResponse> {
        match self.try_complete(&self.primary, operation, req.clone()).await {
            Ok(resp) => Ok(resp),
            Err(e) if e.is_transient() => {
                let Some(secondary) = &self.secondary else {
                    return Err(e);
                };
                TraceEvent::LlmFallback {
                    from_provider: self.primary.client_id().to_string(),
                    to_provider: secondary.client_id().to_string(),
                    reason: e.to_string(),
                }
                .emit();
                self.try_complete(secondary, operation, req).await
            }
            Err(e) => Err(e),
        }
    }

    /// Send a completion request with the per-call timeout wrapper.
    async fn try_complete(
        &self,
        client: &Arc<dyn LlmClient>,
        operation: &str,
        req: CompletionRequest,
    ) -> Result<CompletionResponse> {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.call_timeout, client.complete(req)).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeadlineExceeded(format!(
                "provider '{}' exceeded {}s",
                client.client_id(),
                self.call_timeout.as_secs()
            ))),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        if let Ok(resp) = &result {
            TraceEvent::LlmRequest {
                provider: client.client_id().to_string(),
                model: resp.model.clone(),
                operation: operation.to_string(),
                duration_ms,
                prompt_tokens: resp.usage.map(|u| u.prompt_tokens),
                completion_tokens: resp.usage.map(|u| u.completion_tokens),
            }
            .emit();
        }
        result
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Truncate on a char boundary without splitting a code point.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Render the opaque profile map compactly for prompt inclusion.
fn compact_profile(profile: &Value) -> String {
    serde_json::to_string(profile).unwrap_or_else(|_| "{}".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
