//! Transcript extraction pipeline.
//!
//! chunk → extract (bounded parallelism) → normalize/hash → intra-batch
//! dedup → one-round-trip store dedup → per-candidate decision. The
//! dedup-then-store section for a caller runs inside that caller's
//! critical section; concurrent conversations from different callers
//! proceed independently.
//!
//! Failure semantics: a chunk that errors is recorded and skipped; the
//! job as a whole fails only when *every* chunk failed. Partial outcomes
//! persist the failed-chunk list in the extraction state file and still
//! count as completed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use uuid::Uuid;

use mr_domain::config::{ExtractionConfig, OrganizationConfig};
use mr_domain::conversation::{Conversation, SpeakerRole, TranscriptTurn};
use mr_domain::error::{Error, Result};
use mr_domain::memory::{self, MemoryType, META_CONFLICT_GROUP, META_SOURCE_QUOTE};
use mr_domain::trace::TraceEvent;
use mr_llm::{ExtractedCandidate, LlmSelector};
use mr_memstore::{MemoryStore, NewMemory, SearchScope};

use super::caller_lock::CallerLockMap;
use super::payloads::{ExtractionState, PayloadStore};
use super::profile_cache::ProfileCache;
use super::scheduler::{ExtractionJob, JobProcessor};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Clone)]
pub struct ExtractionOutcome {
    pub chunks_total: usize,
    pub failed_chunks: Vec<usize>,
    pub stored: usize,
    pub reinforced: usize,
    pub conflicts: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ExtractionPipeline {
    store: Arc<dyn MemoryStore>,
    llm: Arc<LlmSelector>,
    profiles: Arc<ProfileCache>,
    caller_locks: Arc<CallerLockMap>,
    payloads: Arc<PayloadStore>,
    organization: OrganizationConfig,
    extraction: ExtractionConfig,
}

impl ExtractionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn MemoryStore>,
        llm: Arc<LlmSelector>,
        profiles: Arc<ProfileCache>,
        caller_locks: Arc<CallerLockMap>,
        payloads: Arc<PayloadStore>,
        organization: OrganizationConfig,
        extraction: ExtractionConfig,
    ) -> Self {
        Self {
            store,
            llm,
            profiles,
            caller_locks,
            payloads,
            organization,
            extraction,
        }
    }

    /// Run the full pipeline for one completed conversation.
    pub async fn run(&self, conversation: &Conversation) -> Result<ExtractionOutcome> {
        let start = Instant::now();
        let Some(caller_id) = conversation.caller_id.as_deref() else {
            // Anonymous call: nothing to bind memories to.
            return Ok(ExtractionOutcome::default());
        };

        // Caller bookkeeping is best-effort; a store hiccup here must not
        // fail the whole job.
        match self.store.upsert_caller(caller_id, Utc::now()).await {
            Ok(caller) => tracing::debug!(
                caller_id = %caller_id,
                conversation_count = caller.conversation_count,
                "caller activity recorded"
            ),
            Err(e) => {
                tracing::warn!(caller_id = %caller_id, error = %e, "caller activity update failed");
            }
        }

        // ── 1. Chunk ─────────────────────────────────────────────────
        let chunks = chunk_transcript(&conversation.transcript, self.extraction.chunk_tokens);
        if chunks.is_empty() {
            return Ok(ExtractionOutcome::default());
        }
        let chunks_total = chunks.len();

        // Profile context enriches the extraction prompt but is not load-
        // bearing; fall back to an empty profile on fetch failure.
        let profile = match self.profiles.get(&conversation.agent_id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(
                    agent_id = %conversation.agent_id,
                    error = %e,
                    "profile unavailable for extraction, proceeding without"
                );
                serde_json::json!({})
            }
        };

        // ── 2. Extract (bounded parallelism) ─────────────────────────
        let results: Vec<(usize, Result<Vec<ExtractedCandidate>>)> =
            stream::iter(chunks.into_iter().enumerate())
                .map(|(idx, chunk)| {
                    let llm = self.llm.clone();
                    let profile = profile.clone();
                    async move { (idx, llm.extract(&chunk, &profile).await) }
                })
                .buffered(self.extraction.parallelism)
                .collect()
                .await;

        let mut failed_chunks = Vec::new();
        let mut chunk_errors = Vec::new();
        let mut raw_candidates = Vec::new();
        for (idx, result) in results {
            match result {
                Ok(candidates) => raw_candidates.extend(candidates),
                Err(e) => {
                    tracing::warn!(
                        conversation_id = %conversation.conversation_id,
                        chunk = idx,
                        error = %e,
                        "chunk extraction failed"
                    );
                    failed_chunks.push(idx);
                    chunk_errors.push(e);
                }
            }
        }

        if failed_chunks.len() == chunks_total {
            // Total failure: surface a transient error when any chunk
            // failed transiently so the scheduler retries the job.
            let err = chunk_errors
                .iter()
                .position(|e| e.is_transient())
                .map(|i| chunk_errors.swap_remove(i))
                .unwrap_or_else(|| chunk_errors.swap_remove(0));
            return Err(err);
        }
        failed_chunks.sort_unstable();

        // ── 3–4. Normalize, hash, intra-batch dedup ──────────────────
        let candidates = dedup_batch(normalize_candidates(
            raw_candidates,
            self.extraction.max_content_chars,
            self.extraction.default_confidence,
        ));

        // ── 5–6. Store-side dedup + decisions, per-caller serialized ──
        let mut outcome = ExtractionOutcome {
            chunks_total,
            failed_chunks,
            ..Default::default()
        };

        if !candidates.is_empty() {
            let _lock = self.caller_locks.acquire(caller_id).await;
            self.decide_and_store(conversation, caller_id, candidates, &mut outcome)
                .await?;
        }

        TraceEvent::ExtractionFinished {
            conversation_id: conversation.conversation_id.clone(),
            chunks_total: outcome.chunks_total,
            chunks_failed: outcome.failed_chunks.len(),
            stored: outcome.stored,
            reinforced: outcome.reinforced,
            conflicts: outcome.conflicts,
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        Ok(outcome)
    }

    /// Steps 5–6: one `batch_find_similar` round trip, then the
    /// per-candidate decision table. Runs under the caller lock.
    async fn decide_and_store(
        &self,
        conversation: &Conversation,
        caller_id: &str,
        candidates: Vec<Candidate>,
        outcome: &mut ExtractionOutcome,
    ) -> Result<()> {
        let scope = SearchScope::CallerOnly {
            caller_id: caller_id.to_owned(),
        };
        let texts: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();

        // One round trip regardless of batch size. Requested at the
        // conflict threshold — the lower of the two decision bands — so a
        // single response serves both the reinforce and conflict checks.
        let hits = self
            .store
            .batch_find_similar(scope, &texts, self.organization.conflict_threshold)
            .await?;

        let now = Utc::now();
        for (candidate, hit) in candidates.into_iter().zip(hits) {
            match hit {
                Some(hit) if hit.memory.content_hash == candidate.hash => {
                    // Pure duplicate.
                    self.store
                        .reinforce(&hit.memory.memory_id, &conversation.conversation_id, now)
                        .await?;
                    outcome.reinforced += 1;
                }
                Some(hit) if hit.score >= self.organization.similarity_threshold => {
                    // Same meaning, different phrasing.
                    self.store
                        .reinforce(&hit.memory.memory_id, &conversation.conversation_id, now)
                        .await?;
                    if candidate.importance > hit.memory.importance {
                        let shareable = memory::is_shareable(
                            candidate.importance,
                            self.organization.share_threshold,
                        );
                        self.store
                            .set_importance(&hit.memory.memory_id, candidate.importance, shareable)
                            .await?;
                    }
                    outcome.reinforced += 1;
                }
                Some(hit)
                    if matches!(
                        candidate.memory_type,
                        MemoryType::Factual | MemoryType::Preference
                    ) =>
                {
                    // Near but not equivalent, and of a type where both
                    // versions matter: keep both, flagged as a conflict
                    // pair. The newer one wins retrieval tie-breaks.
                    let group_id = match hit.memory.conflict_group() {
                        Some(existing) => existing.to_owned(),
                        None => {
                            let group_id = Uuid::new_v4().to_string();
                            self.store
                                .tag_metadata(
                                    &hit.memory.memory_id,
                                    serde_json::json!({ META_CONFLICT_GROUP: group_id }),
                                )
                                .await?;
                            group_id
                        }
                    };
                    self.store_new(conversation, caller_id, candidate, Some(group_id))
                        .await?;
                    outcome.stored += 1;
                    outcome.conflicts += 1;
                }
                _ => {
                    self.store_new(conversation, caller_id, candidate, None).await?;
                    outcome.stored += 1;
                }
            }
        }
        Ok(())
    }

    async fn store_new(
        &self,
        conversation: &Conversation,
        caller_id: &str,
        candidate: Candidate,
        conflict_group: Option<String>,
    ) -> Result<()> {
        let mut metadata = HashMap::new();
        if let Some(quote) = candidate.source_quote {
            metadata.insert(META_SOURCE_QUOTE.to_owned(), serde_json::json!(quote));
        }
        if let Some(group_id) = conflict_group {
            metadata.insert(META_CONFLICT_GROUP.to_owned(), serde_json::json!(group_id));
        }

        let shareable =
            memory::is_shareable(candidate.importance, self.organization.share_threshold);
        self.store
            .store(NewMemory {
                caller_id: caller_id.to_owned(),
                conversation_id: conversation.conversation_id.clone(),
                agent_id: Some(conversation.agent_id.clone()),
                content: candidate.content,
                memory_type: candidate.memory_type,
                importance: candidate.importance,
                shareable,
                confidence: candidate.confidence,
                content_hash: candidate.hash,
                metadata,
            })
            .await?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job processor wiring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
impl JobProcessor for ExtractionPipeline {
    async fn process(&self, job: &ExtractionJob) -> Result<()> {
        let conversation_id = &job.conversation.conversation_id;
        self.payloads
            .update_state(conversation_id, |s| {
                s.state = ExtractionState::Running;
                s.attempts = job.attempt;
            })
            .await?;

        let outcome = self.run(&job.conversation).await?;

        self.payloads
            .update_state(conversation_id, |s| {
                s.state = ExtractionState::Completed;
                s.failed_chunks = outcome.failed_chunks.clone();
                s.last_error = None;
            })
            .await?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chunking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Split the transcript into contiguous windows under the token budget,
/// always on turn boundaries and preserving order. A single turn larger
/// than the budget becomes its own (oversized) chunk; the LLM facade
/// clips input defensively anyway.
pub fn chunk_transcript(transcript: &[TranscriptTurn], chunk_tokens: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0usize;

    for turn in transcript {
        let line = format_turn(turn);
        let line_tokens = memory::estimate_tokens(&line);

        if current_tokens > 0 && current_tokens + line_tokens > chunk_tokens {
            chunks.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(&line);
        current_tokens += line_tokens;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn format_turn(turn: &TranscriptTurn) -> String {
    let speaker = match turn.role {
        SpeakerRole::Agent => "agent",
        SpeakerRole::User => "user",
    };
    format!("{speaker}: {}", turn.text)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Normalization & intra-batch dedup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A candidate that survived normalization.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub content: String,
    pub hash: String,
    pub memory_type: MemoryType,
    pub importance: u8,
    pub confidence: f32,
    pub source_quote: Option<String>,
}

/// Stage 3: drop empty / oversized / unknown-type candidates, clamp
/// importance into [1, 10], default missing confidence.
pub fn normalize_candidates(
    raw: Vec<ExtractedCandidate>,
    max_content_chars: usize,
    default_confidence: f32,
) -> Vec<Candidate> {
    raw.into_iter()
        .filter_map(|c| {
            let content = c.content.trim().to_owned();
            if content.is_empty() || content.chars().count() > max_content_chars {
                return None;
            }
            let memory_type = MemoryType::parse(&c.type_label)?;
            let importance = c.importance.clamp(1, 10) as u8;
            let confidence = c.confidence.unwrap_or(default_confidence).clamp(0.0, 1.0);
            let hash = memory::content_hash(&content);
            Some(Candidate {
                content,
                hash,
                memory_type,
                importance,
                confidence,
                source_quote: c.source_quote.filter(|q| !q.trim().is_empty()),
            })
        })
        .collect()
}

/// Stage 4: collapse candidates sharing a `content_hash`; keep the highest
/// importance, merge source quotes. Order of first appearance is kept.
pub fn dedup_batch(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut order = Vec::new();
    let mut by_hash: HashMap<String, Candidate> = HashMap::new();

    for candidate in candidates {
        match by_hash.get_mut(&candidate.hash) {
            None => {
                order.push(candidate.hash.clone());
                by_hash.insert(candidate.hash.clone(), candidate);
            }
            Some(existing) => {
                if candidate.importance > existing.importance {
                    existing.importance = candidate.importance;
                    existing.confidence = existing.confidence.max(candidate.confidence);
                }
                match (&mut existing.source_quote, candidate.source_quote) {
                    (Some(mine), Some(theirs)) if !mine.contains(&theirs) => {
                        mine.push_str(" | ");
                        mine.push_str(&theirs);
                    }
                    (slot @ None, Some(theirs)) => *slot = Some(theirs),
                    _ => {}
                }
            }
        }
    }

    order
        .into_iter()
        .filter_map(|hash| by_hash.remove(&hash))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: SpeakerRole, text: &str) -> TranscriptTurn {
        TranscriptTurn {
            role,
            text: text.into(),
        }
    }

    fn raw(content: &str, label: &str, importance: i64) -> ExtractedCandidate {
        serde_json::from_value(serde_json::json!({
            "content": content,
            "type": label,
            "importance": importance,
        }))
        .unwrap()
    }

    // ── Chunking ─────────────────────────────────────────────────────

    #[test]
    fn short_transcript_is_one_chunk() {
        let transcript = vec![
            turn(SpeakerRole::Agent, "Hello!"),
            turn(SpeakerRole::User, "Hi, where is my package?"),
        ];
        let chunks = chunk_transcript(&transcript, 8_000);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].starts_with("agent: Hello!"));
        assert!(chunks[0].contains("user: Hi, where is my package?"));
    }

    #[test]
    fn splits_on_turn_boundaries_preserving_order() {
        // Each turn ≈ 13 tokens; budget of 20 forces one turn per chunk.
        let transcript: Vec<_> = (0..4)
            .map(|i| turn(SpeakerRole::User, &format!("turn number {i} {}", "x".repeat(40))))
            .collect();
        let chunks = chunk_transcript(&transcript, 20);
        assert_eq!(chunks.len(), 4);
        for (i, chunk) in chunks.iter().enumerate() {
            assert!(chunk.contains(&format!("turn number {i}")));
            assert!(!chunk.contains('\n'), "turns must not be split mid-chunk");
        }
    }

    #[test]
    fn oversized_single_turn_still_chunks() {
        let transcript = vec![turn(SpeakerRole::User, &"long ".repeat(10_000))];
        let chunks = chunk_transcript(&transcript, 100);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn empty_transcript_no_chunks() {
        assert!(chunk_transcript(&[], 8_000).is_empty());
    }

    // ── Normalization ────────────────────────────────────────────────

    #[test]
    fn normalization_drops_invalid_candidates() {
        let raw_candidates = vec![
            raw("valid fact", "factual", 5),
            raw("   ", "factual", 5),
            raw("unknown type", "opinion", 5),
            raw(&"x".repeat(10_001), "factual", 5),
        ];
        let out = normalize_candidates(raw_candidates, 10_000, 0.7);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "valid fact");
    }

    #[test]
    fn importance_is_clamped_confidence_defaulted() {
        let out = normalize_candidates(
            vec![raw("a", "factual", 0), raw("b", "factual", 99)],
            10_000,
            0.7,
        );
        assert_eq!(out[0].importance, 1);
        assert_eq!(out[1].importance, 10);
        assert!((out[0].confidence - 0.7).abs() < f32::EPSILON);
    }

    // ── Intra-batch dedup ────────────────────────────────────────────

    #[test]
    fn same_hash_collapses_keeping_highest_importance() {
        let mut a = normalize_candidates(vec![raw("Likes tea", "preference", 4)], 10_000, 0.7);
        let mut b = normalize_candidates(vec![raw("likes  TEA", "preference", 7)], 10_000, 0.7);
        a.append(&mut b);
        assert_eq!(a[0].hash, a[1].hash);

        let out = dedup_batch(a);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].importance, 7);
    }

    #[test]
    fn distinct_hashes_survive() {
        let candidates = normalize_candidates(
            vec![raw("likes tea", "preference", 4), raw("likes coffee", "preference", 4)],
            10_000,
            0.7,
        );
        assert_eq!(dedup_batch(candidates).len(), 2);
    }

    #[test]
    fn source_quotes_merge_on_collapse() {
        let mk = |quote: &str| {
            serde_json::from_value::<ExtractedCandidate>(serde_json::json!({
                "content": "likes tea",
                "type": "preference",
                "importance": 4,
                "source_quote": quote,
            }))
            .unwrap()
        };
        let candidates = normalize_candidates(vec![mk("I love tea"), mk("tea please")], 10_000, 0.7);
        let out = dedup_batch(candidates);
        assert_eq!(out.len(), 1);
        let quote = out[0].source_quote.as_deref().unwrap();
        assert!(quote.contains("I love tea") && quote.contains("tea please"));
    }
}
