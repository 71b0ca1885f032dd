//! Shared test doubles: an in-memory store with scripted similarity and
//! a scripted LLM client.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use mr_domain::error::{Error, Result};
use mr_domain::memory::{normalize_content, Caller, Memory};
use mr_llm::{CompletionRequest, CompletionResponse, LlmClient};
use mr_memstore::{MemoryStore, NewMemory, ScoredMemory, SearchFilters, SearchScope, SimilarHit};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mock memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory [`MemoryStore`] double. Similarity between non-identical
/// contents is scripted per test via [`MockMemoryStore::set_similarity`];
/// identical normalized content always scores 1.0.
#[derive(Default)]
pub struct MockMemoryStore {
    pub memories: Mutex<Vec<Memory>>,
    similarity: Mutex<HashMap<(String, String), f32>>,
    next_id: AtomicUsize,
    pub batch_calls: AtomicUsize,
    pub list_recent_calls: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub fail_all: AtomicBool,
    callers: Mutex<HashMap<String, Caller>>,
}

impl MockMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script the similarity score between two contents (symmetric).
    pub fn set_similarity(&self, a: &str, b: &str, score: f32) {
        let a = normalize_content(a);
        let b = normalize_content(b);
        let mut map = self.similarity.lock();
        map.insert((a.clone(), b.clone()), score);
        map.insert((b, a), score);
    }

    /// Seed a memory directly, bypassing the pipeline.
    pub fn seed(&self, memory: Memory) {
        self.memories.lock().push(memory);
    }

    pub fn memory_count(&self) -> usize {
        self.memories.lock().len()
    }

    pub fn find_by_content(&self, content: &str) -> Option<Memory> {
        let wanted = normalize_content(content);
        self.memories
            .lock()
            .iter()
            .find(|m| normalize_content(&m.content) == wanted)
            .cloned()
    }

    fn score(&self, existing: &Memory, query: &str) -> f32 {
        let a = normalize_content(&existing.content);
        let b = normalize_content(query);
        if a == b {
            return 1.0;
        }
        self.similarity.lock().get(&(a, b)).copied().unwrap_or(0.0)
    }

    fn in_scope(memory: &Memory, scope: &SearchScope) -> bool {
        match scope {
            SearchScope::CallerOnly { caller_id } => memory.caller_id == *caller_id,
            SearchScope::CallerAgent {
                caller_id,
                agent_id,
            } => {
                memory.caller_id == *caller_id
                    && (memory.agent_id.as_deref() == Some(agent_id) || memory.agent_id.is_none())
            }
            SearchScope::CallerOrgShareable { caller_id } => {
                memory.caller_id == *caller_id && memory.shareable
            }
        }
    }

    fn check_failure(&self) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("scripted outage".into()));
        }
        Ok(())
    }

    fn check_read_failure(&self) -> Result<()> {
        self.check_failure()?;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("scripted read outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MemoryStore for MockMemoryStore {
    async fn store(&self, new: NewMemory) -> Result<String> {
        self.check_failure()?;
        let id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let now = Utc::now();
        self.memories.lock().push(Memory {
            memory_id: id.clone(),
            caller_id: new.caller_id,
            conversation_id: new.conversation_id,
            agent_id: new.agent_id,
            organization_id: "org".into(),
            content: new.content,
            memory_type: new.memory_type,
            importance: new.importance,
            shareable: new.shareable,
            created_at: now,
            last_reinforced_at: now,
            reinforcement_count: 0,
            confidence: new.confidence,
            content_hash: new.content_hash,
            metadata: new.metadata,
        });
        Ok(id)
    }

    async fn semantic_search(
        &self,
        scope: SearchScope,
        query_text: &str,
        limit: usize,
        min_score: f32,
        _filters: SearchFilters,
    ) -> Result<Vec<ScoredMemory>> {
        self.check_read_failure()?;
        let mut hits: Vec<ScoredMemory> = self
            .memories
            .lock()
            .iter()
            .filter(|m| Self::in_scope(m, &scope))
            .map(|m| ScoredMemory {
                memory: m.clone(),
                score: self.score(m, query_text),
            })
            .filter(|h| h.score >= min_score)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        hits.truncate(limit);
        Ok(hits)
    }

    async fn batch_find_similar(
        &self,
        scope: SearchScope,
        texts: &[String],
        threshold: f32,
    ) -> Result<Vec<Option<SimilarHit>>> {
        self.check_read_failure()?;
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let memories = self.memories.lock();
        Ok(texts
            .iter()
            .map(|text| {
                memories
                    .iter()
                    .filter(|m| Self::in_scope(m, &scope))
                    .map(|m| (m, self.score(m, text)))
                    .filter(|(_, score)| *score >= threshold)
                    .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
                    .map(|(m, score)| SimilarHit {
                        memory: m.clone(),
                        score,
                    })
            })
            .collect())
    }

    async fn reinforce(
        &self,
        memory_id: &str,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.check_failure()?;
        let mut memories = self.memories.lock();
        let memory = memories
            .iter_mut()
            .find(|m| m.memory_id == memory_id)
            .ok_or_else(|| Error::StoreConflict(format!("no memory {memory_id}")))?;
        memory.reinforcement_count += 1;
        memory.last_reinforced_at = now;
        if let Some(provenance) = memory
            .metadata
            .entry("provenance".into())
            .or_insert_with(|| serde_json::json!([]))
            .as_array_mut()
        {
            provenance.push(serde_json::json!(conversation_id));
        }
        Ok(())
    }

    async fn set_importance(&self, memory_id: &str, importance: u8, shareable: bool) -> Result<()> {
        self.check_failure()?;
        let mut memories = self.memories.lock();
        let memory = memories
            .iter_mut()
            .find(|m| m.memory_id == memory_id)
            .ok_or_else(|| Error::StoreConflict(format!("no memory {memory_id}")))?;
        memory.importance = importance;
        memory.shareable = shareable;
        Ok(())
    }

    async fn mark_shareable(&self, memory_id: &str, shareable: bool) -> Result<()> {
        self.check_failure()?;
        let mut memories = self.memories.lock();
        let memory = memories
            .iter_mut()
            .find(|m| m.memory_id == memory_id)
            .ok_or_else(|| Error::StoreConflict(format!("no memory {memory_id}")))?;
        memory.shareable = shareable;
        Ok(())
    }

    async fn tag_metadata(&self, memory_id: &str, metadata: serde_json::Value) -> Result<()> {
        self.check_failure()?;
        let mut memories = self.memories.lock();
        let memory = memories
            .iter_mut()
            .find(|m| m.memory_id == memory_id)
            .ok_or_else(|| Error::StoreConflict(format!("no memory {memory_id}")))?;
        if let serde_json::Value::Object(map) = metadata {
            for (k, v) in map {
                memory.metadata.insert(k, v);
            }
        }
        Ok(())
    }

    async fn list_recent(&self, scope: SearchScope, limit: usize) -> Result<Vec<Memory>> {
        self.check_read_failure()?;
        self.list_recent_calls.fetch_add(1, Ordering::SeqCst);
        let mut hits: Vec<Memory> = self
            .memories
            .lock()
            .iter()
            .filter(|m| Self::in_scope(m, &scope))
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn upsert_caller(&self, caller_id: &str, now: DateTime<Utc>) -> Result<Caller> {
        self.check_failure()?;
        let mut callers = self.callers.lock();
        let caller = callers
            .entry(caller_id.to_owned())
            .and_modify(|c| {
                c.last_seen = now;
                c.conversation_count += 1;
            })
            .or_insert_with(|| Caller {
                caller_id: caller_id.to_owned(),
                organization_id: "org".into(),
                first_seen: now,
                last_seen: now,
                conversation_count: 1,
            });
        Ok(caller.clone())
    }

    async fn delete_by_caller(&self, caller_id: &str) -> Result<u64> {
        self.check_failure()?;
        let mut memories = self.memories.lock();
        let before = memories.len();
        memories.retain(|m| m.caller_id != caller_id);
        Ok((before - memories.len()) as u64)
    }

    async fn health(&self) -> Result<serde_json::Value> {
        self.check_failure()?;
        Ok(serde_json::json!({"status": "ok"}))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted LLM client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pops one scripted outcome per `complete` call.
pub struct ScriptedLlm {
    script: Mutex<Vec<Result<String>>>,
    pub calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(script: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    /// A script that answers every call with the same JSON payload.
    pub fn repeating(json: &str, times: usize) -> Arc<Self> {
        Self::new((0..times).map(|_| Ok(json.to_string())).collect())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let mut script = self.script.lock();
            if script.is_empty() {
                Ok("[]".to_string())
            } else {
                script.remove(0)
            }
        };
        outcome.map(|content| CompletionResponse {
            content,
            usage: None,
            model: "scripted".into(),
        })
    }

    fn client_id(&self) -> &str {
        "scripted"
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fixtures
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn seeded_memory(
    id: &str,
    caller_id: &str,
    agent_id: Option<&str>,
    content: &str,
    memory_type: mr_domain::memory::MemoryType,
    importance: u8,
    share_threshold: u8,
) -> Memory {
    let now = Utc::now();
    Memory {
        memory_id: id.into(),
        caller_id: caller_id.into(),
        conversation_id: "seed-conv".into(),
        agent_id: agent_id.map(str::to_owned),
        organization_id: "org".into(),
        content: content.into(),
        memory_type,
        importance,
        shareable: importance >= share_threshold,
        created_at: now,
        last_reinforced_at: now,
        reinforcement_count: 0,
        confidence: 0.9,
        content_hash: mr_domain::memory::content_hash(content),
        metadata: Default::default(),
    }
}

/// A profile fetcher that always returns the same static profile.
pub struct StaticProfileFetcher(pub serde_json::Value);

#[async_trait]
impl mr_gateway::runtime::profile_cache::ProfileFetcher for StaticProfileFetcher {
    async fn fetch(&self, _agent_id: &str) -> Result<serde_json::Value> {
        Ok(self.0.clone())
    }
}
