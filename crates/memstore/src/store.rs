//! The `MemoryStore` trait defines the interface for all memory store
//! backends (REST, mock/test).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mr_domain::error::Result;
use mr_domain::memory::{Caller, Memory, MemoryType};

use crate::types::{NewMemory, ScoredMemory, SimilarHit};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scope & filters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The set of memories visible to a retrieval operation. Organization
/// scoping is applied by the client itself — every request the adapter
/// sends carries the configured organization id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum SearchScope {
    /// Everything belonging to the caller, regardless of agent.
    CallerOnly { caller_id: String },
    /// The caller's memories owned by one agent, plus agent-less shared ones.
    CallerAgent { caller_id: String, agent_id: String },
    /// The caller's org-shareable memories from any agent.
    CallerOrgShareable { caller_id: String },
}

impl SearchScope {
    pub fn caller_id(&self) -> &str {
        match self {
            Self::CallerOnly { caller_id }
            | Self::CallerAgent { caller_id, .. }
            | Self::CallerOrgShareable { caller_id } => caller_id,
        }
    }
}

/// Optional predicates ANDed onto a semantic search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_types: Option<Vec<MemoryType>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_importance: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_importance: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_before: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Abstraction over the external vector store API surface.
///
/// The store guarantees: results ordered by descending similarity, scores
/// in [0, 1], filter predicates ANDed. It does **not** guarantee
/// idempotent writes by content hash — the extraction pipeline enforces
/// dedup itself under the per-caller lock.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Persist a new memory. Returns the store-assigned memory id.
    async fn store(&self, memory: NewMemory) -> Result<String>;

    /// Ranked semantic search within a scope.
    async fn semantic_search(
        &self,
        scope: SearchScope,
        query_text: &str,
        limit: usize,
        min_score: f32,
        filters: SearchFilters,
    ) -> Result<Vec<ScoredMemory>>;

    /// For each text, the nearest existing memory with score ≥ threshold,
    /// or `None`. One network round trip regardless of batch size; the
    /// result vec is index-aligned with `texts`.
    async fn batch_find_similar(
        &self,
        scope: SearchScope,
        texts: &[String],
        threshold: f32,
    ) -> Result<Vec<Option<SimilarHit>>>;

    /// Atomically bump `reinforcement_count`, set `last_reinforced_at`,
    /// and append the conversation to the memory's provenance.
    async fn reinforce(
        &self,
        memory_id: &str,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Update importance, recomputing shareable visibility with it.
    async fn set_importance(&self, memory_id: &str, importance: u8, shareable: bool) -> Result<()>;

    async fn mark_shareable(&self, memory_id: &str, shareable: bool) -> Result<()>;

    /// Attach metadata keys to an existing memory (conflict markers).
    async fn tag_metadata(&self, memory_id: &str, metadata: serde_json::Value) -> Result<()>;

    /// Most recent memories in a scope, ordered `created_at` desc.
    async fn list_recent(&self, scope: SearchScope, limit: usize) -> Result<Vec<Memory>>;

    /// Record caller activity: creates the caller row on first sight,
    /// otherwise bumps `last_seen` and `conversation_count`. Returns the
    /// updated row.
    async fn upsert_caller(&self, caller_id: &str, now: DateTime<Utc>) -> Result<Caller>;

    /// Privacy erasure. Returns the number of memories removed.
    async fn delete_by_caller(&self, caller_id: &str) -> Result<u64>;

    /// Liveness probe against the store.
    async fn health(&self) -> Result<serde_json::Value>;
}
