//! In-call semantic search service.
//!
//! Thin ranked-retrieval layer over the store adapter: scope selection,
//! input validation, a template-based one-line summary of the top hit
//! (no LLM call on this path — it has a 3 s budget), and the
//! empty-but-degraded fallback when the store is down.

use std::sync::Arc;

use serde::Serialize;

use mr_domain::config::SearchConfig;
use mr_domain::error::{Error, Result};
use mr_memstore::{MemoryStore, ScoredMemory, SearchFilters, SearchScope};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query: String,
    pub caller_id: String,
    pub agent_id: String,
    pub search_all_agents: bool,
    pub limit: Option<usize>,
    pub min_score: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScopeLabel {
    Agent,
    Org,
}

#[derive(Debug)]
pub struct SearchOutcome {
    pub results: Vec<ScoredMemory>,
    pub summary: String,
    pub scope: SearchScopeLabel,
    /// Set when the store failed and empty results were substituted.
    pub degraded: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SearchService {
    store: Arc<dyn MemoryStore>,
    config: SearchConfig,
}

impl SearchService {
    pub fn new(store: Arc<dyn MemoryStore>, config: SearchConfig) -> Self {
        Self { store, config }
    }

    /// Validate and execute one in-call search.
    ///
    /// Store unavailability degrades to empty results rather than an
    /// error — the agent mid-call is better served by "nothing found"
    /// than a hard failure. Validation errors still surface: they are
    /// caller bugs, not infrastructure weather.
    pub async fn search(&self, query: SearchQuery) -> Result<SearchOutcome> {
        self.validate(&query)?;

        let limit = query.limit.unwrap_or(self.config.default_limit);
        let min_score = query.min_score.unwrap_or(self.config.default_min_score);

        let (scope, label) = if query.search_all_agents {
            (
                SearchScope::CallerOrgShareable {
                    caller_id: query.caller_id.clone(),
                },
                SearchScopeLabel::Org,
            )
        } else {
            (
                SearchScope::CallerAgent {
                    caller_id: query.caller_id.clone(),
                    agent_id: query.agent_id.clone(),
                },
                SearchScopeLabel::Agent,
            )
        };

        match self
            .store
            .semantic_search(scope, &query.query, limit, min_score, SearchFilters::default())
            .await
        {
            Ok(mut results) => {
                // The store orders by score; break exact ties newest-first
                // so conflict pairs surface their most recent version.
                results.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(b.memory.created_at.cmp(&a.memory.created_at))
                });
                let summary = summarize_top(&results);
                Ok(SearchOutcome {
                    results,
                    summary,
                    scope: label,
                    degraded: false,
                })
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "store unavailable, degrading to empty search results");
                Ok(SearchOutcome {
                    results: Vec::new(),
                    summary: summarize_top(&[]),
                    scope: label,
                    degraded: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    fn validate(&self, query: &SearchQuery) -> Result<()> {
        if query.query.trim().is_empty() {
            return Err(Error::PayloadSchema("query must not be empty".into()));
        }
        if query.query.chars().count() > self.config.max_query_chars {
            return Err(Error::PayloadSchema(format!(
                "query exceeds {} characters",
                self.config.max_query_chars
            )));
        }
        if query.caller_id.is_empty() {
            return Err(Error::PayloadSchema("caller_id is required".into()));
        }
        if query.agent_id.is_empty() {
            return Err(Error::PayloadSchema("agent_id is required".into()));
        }
        if let Some(limit) = query.limit {
            if !(1..=100).contains(&limit) {
                return Err(Error::PayloadSchema("limit must be in 1..=100".into()));
            }
        }
        if let Some(min_score) = query.min_score {
            if !(0.0..=1.0).contains(&min_score) {
                return Err(Error::PayloadSchema("min_score must be in [0, 1]".into()));
            }
        }
        Ok(())
    }
}

/// One-line natural-language summary of the top-ranked result.
fn summarize_top(results: &[ScoredMemory]) -> String {
    match results.first() {
        Some(top) => format!(
            "Top match ({}% similar): {}",
            (top.score * 100.0).round() as u32,
            top.memory.content
        ),
        None => "No matching memories found.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_of_empty_results() {
        assert_eq!(summarize_top(&[]), "No matching memories found.");
    }
}
