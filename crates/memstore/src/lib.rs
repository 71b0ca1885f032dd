//! `mr-memstore` — vector memory store client for memrelay.
//!
//! Provides the [`MemoryStore`] trait that abstracts over the external
//! vector store API, the production REST implementation
//! ([`RestMemoryStore`]), and the typed DTOs the adapter exchanges with
//! the store. The core deliberately keeps no in-memory index of
//! memories — deduplication state lives entirely in the store, and the
//! adapter's `batch_find_similar` keeps the dedup path to a single
//! round trip per extraction batch.

pub mod rest;
pub mod store;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use rest::{from_reqwest, RestMemoryStore};
pub use store::{MemoryStore, SearchFilters, SearchScope};
pub use types::{NewMemory, ScoredMemory, SimilarHit};

use std::sync::Arc;

use mr_domain::config::StoreConfig;
use mr_domain::error::Result;

/// Create the production [`MemoryStore`] from config.
pub fn create_store(cfg: &StoreConfig, organization_id: &str) -> Result<Arc<dyn MemoryStore>> {
    let client = RestMemoryStore::new(cfg, organization_id)?;
    Ok(Arc::new(client))
}
