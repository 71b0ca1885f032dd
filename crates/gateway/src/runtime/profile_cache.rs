//! Agent profile cache with TTL and single-flight fetches.
//!
//! Profiles change rarely but sit on the pre-call critical path, so
//! lookups must be cheap and concurrent misses for the same agent must
//! collapse into one upstream request. On upstream failure with an
//! expired entry still in the map, the cache serves the stale value once
//! per miss and logs a warning; with nothing cached the lookup fails
//! with `ProfileUnavailable`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use mr_domain::config::ProfileApiConfig;
use mr_domain::error::{Error, Result};
use mr_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fetcher seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Upstream profile source. The production implementation is HTTP; tests
/// substitute counting doubles.
#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    async fn fetch(&self, agent_id: &str) -> Result<serde_json::Value>;
}

/// HTTP fetcher against the remote profile API.
pub struct HttpProfileFetcher {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpProfileFetcher {
    pub fn new(cfg: &ProfileApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| Error::ProfileUnavailable(e.to_string()))?;
        let api_key = match &cfg.api_key_env {
            Some(env_var) => std::env::var(env_var).ok(),
            None => None,
        };
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_owned(),
            api_key,
        })
    }
}

#[async_trait]
impl ProfileFetcher for HttpProfileFetcher {
    async fn fetch(&self, agent_id: &str) -> Result<serde_json::Value> {
        let url = format!("{}/api/agents/{agent_id}/profile", self.base_url);
        let mut rb = self.client.get(&url);
        if let Some(ref key) = self.api_key {
            rb = rb.header("X-Api-Key", key);
        }
        let resp = rb
            .send()
            .await
            .map_err(|e| Error::ProfileUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::ProfileUnavailable(format!(
                "profile API returned {} for agent {agent_id}",
                resp.status().as_u16()
            )));
        }
        resp.json()
            .await
            .map_err(|e| Error::ProfileUnavailable(format!("malformed profile body: {e}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
struct CacheEntry {
    profile: serde_json::Value,
    fetched_at: Instant,
}

/// Single-process TTL cache over the remote profile API.
pub struct ProfileCache {
    fetcher: Arc<dyn ProfileFetcher>,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
    /// Per-key fetch locks: concurrent misses for the same agent await
    /// the same in-flight request instead of stampeding upstream.
    fetch_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProfileCache {
    pub fn new(fetcher: Arc<dyn ProfileFetcher>, ttl: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            entries: Mutex::new(HashMap::new()),
            fetch_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Look up an agent profile, fetching on miss.
    pub async fn get(&self, agent_id: &str) -> Result<serde_json::Value> {
        // Fast path: fresh entry.
        if let Some(entry) = self.fresh_entry(agent_id) {
            TraceEvent::ProfileFetched {
                agent_id: agent_id.to_string(),
                cache_hit: true,
                served_stale: false,
            }
            .emit();
            return Ok(entry.profile);
        }

        // Miss: serialize fetches per key.
        let key_lock = {
            let mut locks = self.fetch_locks.lock();
            locks
                .entry(agent_id.to_owned())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _guard = key_lock.lock().await;

        // Another flight may have filled the cache while we waited.
        if let Some(entry) = self.fresh_entry(agent_id) {
            TraceEvent::ProfileFetched {
                agent_id: agent_id.to_string(),
                cache_hit: true,
                served_stale: false,
            }
            .emit();
            return Ok(entry.profile);
        }

        match self.fetcher.fetch(agent_id).await {
            Ok(profile) => {
                self.entries.lock().insert(
                    agent_id.to_owned(),
                    CacheEntry {
                        profile: profile.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                TraceEvent::ProfileFetched {
                    agent_id: agent_id.to_string(),
                    cache_hit: false,
                    served_stale: false,
                }
                .emit();
                Ok(profile)
            }
            Err(e) => {
                // Expired-but-present entry: serve stale once per miss.
                let stale = self.entries.lock().get(agent_id).cloned();
                match stale {
                    Some(entry) => {
                        tracing::warn!(
                            agent_id = %agent_id,
                            error = %e,
                            "profile fetch failed, serving stale cache entry"
                        );
                        TraceEvent::ProfileFetched {
                            agent_id: agent_id.to_string(),
                            cache_hit: false,
                            served_stale: true,
                        }
                        .emit();
                        Ok(entry.profile)
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Number of cached profiles (exported via the health endpoint).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop long-expired entries and idle fetch locks.
    pub fn prune(&self) {
        // Keep expired entries one extra TTL for stale-serve, then drop.
        let cutoff = self.ttl.saturating_mul(2);
        self.entries
            .lock()
            .retain(|_, e| e.fetched_at.elapsed() < cutoff);
        self.fetch_locks
            .lock()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    fn fresh_entry(&self, agent_id: &str) -> Option<CacheEntry> {
        let entries = self.entries.lock();
        entries
            .get(agent_id)
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .cloned()
    }
}
