//! Data transfer objects exchanged with the vector store API.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mr_domain::memory::{Memory, MemoryType};

use crate::store::{SearchFilters, SearchScope};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Write path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A memory about to be persisted. The store assigns the id and embeds
/// the content server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMemory {
    pub caller_id: String,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub importance: u8,
    pub shareable: bool,
    pub confidence: f32,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StoreMemoryResponse {
    pub memory_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SemanticSearchRequest<'a> {
    #[serde(flatten)]
    pub scope: &'a SearchScope,
    pub query: &'a str,
    pub limit: usize,
    pub min_score: f32,
    #[serde(flatten)]
    pub filters: &'a SearchFilters,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SemanticSearchResponse {
    pub results: Vec<ScoredMemory>,
}

/// One ranked search hit: the memory plus its similarity score in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub memory: Memory,
    pub score: f32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Batch similarity (dedup round trip)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub(crate) struct BatchSimilarRequest<'a> {
    #[serde(flatten)]
    pub scope: &'a SearchScope,
    pub texts: &'a [String],
    pub threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BatchSimilarResponse {
    /// Index-aligned with the request `texts`; `null` = no hit at or above
    /// the threshold.
    pub matches: Vec<Option<SimilarHit>>,
}

/// The nearest existing memory for one dedup candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarHit {
    #[serde(flatten)]
    pub memory: Memory,
    pub score: f32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mutations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ReinforceRequest<'a> {
    pub conversation_id: &'a str,
    pub reinforced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ImportanceRequest {
    pub importance: u8,
    pub shareable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ShareableRequest {
    pub shareable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CallerActivityRequest {
    pub seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DeleteByCallerResponse {
    pub deleted: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ListRecentResponse {
    pub memories: Vec<Memory>,
}
