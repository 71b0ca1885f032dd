//! `mr-llm` — provider-agnostic LLM facade for memrelay.
//!
//! Two concrete adapters (OpenAI-compatible and Anthropic) sit behind the
//! [`LlmClient`] trait; [`LlmSelector`] wraps them with primary→fallback
//! routing on transient failures, per-call timeouts, and the two
//! operations the core needs: transcript extraction and first-message
//! summarization. Extraction output is schema-validated; a malformed
//! response earns exactly one stricter re-prompt before the error
//! propagates.

pub mod anthropic;
pub mod openai_compat;
pub mod schema;
pub mod selector;
pub mod traits;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use anthropic::AnthropicClient;
pub use openai_compat::OpenAiCompatClient;
pub use schema::ExtractedCandidate;
pub use selector::LlmSelector;
pub use traits::{CompletionRequest, CompletionResponse, LlmClient, Usage};

use std::sync::Arc;

use mr_domain::config::{LlmProviderConfig, LlmProviderKind};
use mr_domain::error::Result;

/// Build a concrete client from one provider config entry.
pub fn create_client(cfg: &LlmProviderConfig) -> Result<Arc<dyn LlmClient>> {
    match cfg.kind {
        LlmProviderKind::OpenaiCompat => Ok(Arc::new(OpenAiCompatClient::from_config(cfg)?)),
        LlmProviderKind::Anthropic => Ok(Arc::new(AnthropicClient::from_config(cfg)?)),
    }
}
