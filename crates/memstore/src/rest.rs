//! REST implementation of [`MemoryStore`].
//!
//! `RestMemoryStore` wraps a `reqwest::Client` and translates every trait
//! method into the corresponding HTTP call against the external vector
//! store, with automatic retry + exponential back-off on transient
//! (5xx / 429 / timeout) failures. The connection pool inside
//! `reqwest::Client` is shared by webhook handlers and extraction
//! workers alike; no other store state is held in-process.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use uuid::Uuid;

use mr_domain::config::StoreConfig;
use mr_domain::error::{Error, Result};
use mr_domain::memory::{Caller, Memory};
use mr_domain::trace::TraceEvent;

use crate::store::{MemoryStore, SearchFilters, SearchScope};
use crate::types::{
    BatchSimilarRequest, BatchSimilarResponse, CallerActivityRequest, DeleteByCallerResponse,
    ImportanceRequest, ListRecentResponse, NewMemory, ReinforceRequest, ScoredMemory,
    SemanticSearchRequest, SemanticSearchResponse, ShareableRequest, SimilarHit,
    StoreMemoryResponse,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A REST-based client for the external vector store.
///
/// Created once and reused for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct RestMemoryStore {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    organization_id: String,
    max_retries: u32,
}

impl RestMemoryStore {
    /// Build a new client from the shared [`StoreConfig`]. The API key env
    /// var named in config is read once here.
    pub fn new(cfg: &StoreConfig, organization_id: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        let api_key = match &cfg.api_key_env {
            Some(env_var) => std::env::var(env_var).ok(),
            None => None,
        };

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key,
            organization_id: organization_id.to_owned(),
            max_retries: cfg.max_retries,
        })
    }

    // ── request helpers ──────────────────────────────────────────────

    /// Decorate a `RequestBuilder` with the standard memrelay headers.
    /// Every request carries the organization id — the store enforces the
    /// isolation boundary server-side too.
    fn decorate(&self, rb: RequestBuilder) -> RequestBuilder {
        let trace_id = Uuid::new_v4().to_string();
        let mut rb = rb
            .header("X-Client-Type", "memrelay")
            .header("X-Trace-Id", &trace_id)
            .header("X-Organization-Id", &self.organization_id);

        if let Some(ref key) = self.api_key {
            rb = rb.header("X-Api-Key", key);
        }
        rb
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ── retry engine ─────────────────────────────────────────────────

    /// Execute a request with retry + exponential back-off on transient
    /// errors.
    ///
    /// * Retries on 5xx, 429 and timeouts.
    /// * Does **not** retry on other 4xx (client errors are permanent).
    /// * Emits a `TraceEvent::StoreCall` after every attempt.
    async fn execute_with_retry(
        &self,
        endpoint: &str,
        build_request: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_millis(100 * 2u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }

            let start = Instant::now();
            let rb = self.decorate(build_request());
            let result = rb.send().await;
            let duration_ms = start.elapsed().as_millis() as u64;

            match result {
                Ok(resp) => {
                    let status = resp.status().as_u16();

                    TraceEvent::StoreCall {
                        endpoint: endpoint.to_owned(),
                        status,
                        duration_ms,
                    }
                    .emit();

                    if resp.status() == StatusCode::TOO_MANY_REQUESTS {
                        let body = resp.text().await.unwrap_or_default();
                        last_err = Some(Error::UpstreamRateLimited(format!(
                            "{endpoint} returned 429: {body}"
                        )));
                        continue;
                    }

                    if resp.status().is_server_error() {
                        let body = resp.text().await.unwrap_or_default();
                        last_err = Some(Error::StoreUnavailable(format!(
                            "{endpoint} returned {status}: {body}"
                        )));
                        continue;
                    }

                    if resp.status().is_client_error() {
                        let resp_status = resp.status();
                        let body = resp.text().await.unwrap_or_default();
                        if resp_status == StatusCode::CONFLICT {
                            return Err(Error::StoreConflict(format!("{endpoint}: {body}")));
                        }
                        return Err(Error::Internal(format!(
                            "{endpoint} returned {status}: {body}"
                        )));
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    let status = e.status().map(|s| s.as_u16()).unwrap_or(0);

                    TraceEvent::StoreCall {
                        endpoint: endpoint.to_owned(),
                        status,
                        duration_ms,
                    }
                    .emit();

                    last_err = Some(from_reqwest(e));
                    // Timeouts and connection errors are transient — retry.
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::StoreUnavailable(format!("{endpoint}: retries exhausted"))))
    }

    /// POST `path` with a JSON body and parse a JSON response.
    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .execute_with_retry(endpoint, || self.http.post(&url).json(body))
            .await?;
        parse_body(endpoint, resp).await
    }
}

async fn parse_body<T: serde::de::DeserializeOwned>(endpoint: &str, resp: Response) -> Result<T> {
    let body = resp.text().await.map_err(from_reqwest)?;
    serde_json::from_str(&body)
        .map_err(|e| Error::StoreUnavailable(format!("{endpoint}: malformed response: {e}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl MemoryStore for RestMemoryStore {
    async fn store(&self, memory: NewMemory) -> Result<String> {
        let resp: StoreMemoryResponse = self
            .post_json("POST /api/memories", "/api/memories", &memory)
            .await?;
        Ok(resp.memory_id)
    }

    async fn semantic_search(
        &self,
        scope: SearchScope,
        query_text: &str,
        limit: usize,
        min_score: f32,
        filters: SearchFilters,
    ) -> Result<Vec<ScoredMemory>> {
        let req = SemanticSearchRequest {
            scope: &scope,
            query: query_text,
            limit,
            min_score,
            filters: &filters,
        };
        let resp: SemanticSearchResponse = self
            .post_json("POST /api/memories/search", "/api/memories/search", &req)
            .await?;
        Ok(resp.results)
    }

    async fn batch_find_similar(
        &self,
        scope: SearchScope,
        texts: &[String],
        threshold: f32,
    ) -> Result<Vec<Option<SimilarHit>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = BatchSimilarRequest {
            scope: &scope,
            texts,
            threshold,
        };
        let resp: BatchSimilarResponse = self
            .post_json("POST /api/memories/similar", "/api/memories/similar", &req)
            .await?;
        if resp.matches.len() != texts.len() {
            return Err(Error::StoreUnavailable(format!(
                "POST /api/memories/similar: expected {} matches, got {}",
                texts.len(),
                resp.matches.len()
            )));
        }
        Ok(resp.matches)
    }

    async fn reinforce(
        &self,
        memory_id: &str,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let req = ReinforceRequest {
            conversation_id,
            reinforced_at: now,
        };
        let url = self.url(&format!("/api/memories/{memory_id}/reinforce"));
        self.execute_with_retry("POST /api/memories/:id/reinforce", || {
            self.http.post(&url).json(&req)
        })
        .await?;
        Ok(())
    }

    async fn set_importance(&self, memory_id: &str, importance: u8, shareable: bool) -> Result<()> {
        let req = ImportanceRequest {
            importance,
            shareable,
        };
        let url = self.url(&format!("/api/memories/{memory_id}/importance"));
        self.execute_with_retry("PUT /api/memories/:id/importance", || {
            self.http.put(&url).json(&req)
        })
        .await?;
        Ok(())
    }

    async fn mark_shareable(&self, memory_id: &str, shareable: bool) -> Result<()> {
        let req = ShareableRequest { shareable };
        let url = self.url(&format!("/api/memories/{memory_id}/shareable"));
        self.execute_with_retry("PUT /api/memories/:id/shareable", || {
            self.http.put(&url).json(&req)
        })
        .await?;
        Ok(())
    }

    async fn tag_metadata(&self, memory_id: &str, metadata: serde_json::Value) -> Result<()> {
        let url = self.url(&format!("/api/memories/{memory_id}/metadata"));
        self.execute_with_retry("PATCH /api/memories/:id/metadata", || {
            self.http.patch(&url).json(&metadata)
        })
        .await?;
        Ok(())
    }

    async fn list_recent(&self, scope: SearchScope, limit: usize) -> Result<Vec<Memory>> {
        // Flatten the scope tag into the body alongside the limit.
        let mut req = serde_json::json!({ "limit": limit });
        if let (serde_json::Value::Object(map), serde_json::Value::Object(scope_map)) =
            (&mut req, serde_json::to_value(&scope)?)
        {
            map.extend(scope_map);
        }
        let resp: ListRecentResponse = self
            .post_json("POST /api/memories/recent", "/api/memories/recent", &req)
            .await?;
        Ok(resp.memories)
    }

    async fn upsert_caller(&self, caller_id: &str, now: DateTime<Utc>) -> Result<Caller> {
        let req = CallerActivityRequest { seen_at: now };
        let url = self.url(&format!("/api/callers/{caller_id}/activity"));
        let resp = self
            .execute_with_retry("POST /api/callers/:id/activity", || {
                self.http.post(&url).json(&req)
            })
            .await?;
        parse_body("POST /api/callers/:id/activity", resp).await
    }

    async fn delete_by_caller(&self, caller_id: &str) -> Result<u64> {
        let url = self.url(&format!("/api/callers/{caller_id}"));
        let resp = self
            .execute_with_retry("DELETE /api/callers/:id", || self.http.delete(&url))
            .await?;
        let parsed: DeleteByCallerResponse = parse_body("DELETE /api/callers/:id", resp).await?;
        Ok(parsed.deleted)
    }

    async fn health(&self) -> Result<serde_json::Value> {
        let url = self.url("/admin/health");
        let resp = self
            .execute_with_retry("GET /admin/health", || self.http.get(&url))
            .await?;
        parse_body("GET /admin/health", resp).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error conversion helper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Convert a `reqwest::Error` into a domain error. Both timeouts and
/// connection failures land on `StoreUnavailable`, which the retry
/// classifier treats as transient.
pub fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::StoreUnavailable(format!("timeout: {e}"))
    } else {
        Error::StoreUnavailable(e.to_string())
    }
}
