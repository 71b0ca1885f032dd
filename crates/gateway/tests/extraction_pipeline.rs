//! End-to-end extraction pipeline tests against the in-memory store
//! double: dedup, reinforcement, importance promotion, conflict
//! flagging, idempotent resubmission, and chunk failure semantics.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use common::{seeded_memory, MockMemoryStore, ScriptedLlm, StaticProfileFetcher};
use mr_domain::config::{ExtractionConfig, LlmConfig, OrganizationConfig};
use mr_domain::conversation::{Conversation, ConversationStatus, SpeakerRole, TranscriptTurn};
use mr_domain::error::Error;
use mr_domain::memory::MemoryType;
use mr_gateway::runtime::caller_lock::CallerLockMap;
use mr_gateway::runtime::extraction::ExtractionPipeline;
use mr_gateway::runtime::payloads::PayloadStore;
use mr_gateway::runtime::profile_cache::ProfileCache;
use mr_llm::{LlmClient, LlmSelector};

const CALLER: &str = "+15551234567";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Harness {
    store: Arc<MockMemoryStore>,
    pipeline: ExtractionPipeline,
    _tmp: tempfile::TempDir,
}

fn harness(llm: Arc<ScriptedLlm>) -> Harness {
    harness_with(llm, ExtractionConfig::default())
}

fn harness_with(llm: Arc<ScriptedLlm>, extraction: ExtractionConfig) -> Harness {
    let store = MockMemoryStore::new();
    let selector = Arc::new(LlmSelector::new(
        llm as Arc<dyn LlmClient>,
        None,
        &LlmConfig::default(),
    ));
    let profiles = Arc::new(ProfileCache::new(
        Arc::new(StaticProfileFetcher(serde_json::json!({"name": "Support"}))),
        Duration::from_secs(600),
    ));
    let tmp = tempfile::tempdir().unwrap();
    let payloads = Arc::new(PayloadStore::new(tmp.path().join("payloads")).unwrap());

    let pipeline = ExtractionPipeline::new(
        store.clone(),
        selector,
        profiles,
        Arc::new(CallerLockMap::new()),
        payloads,
        OrganizationConfig::default(),
        extraction,
    );
    Harness {
        store,
        pipeline,
        _tmp: tmp,
    }
}

fn conversation(transcript: Vec<TranscriptTurn>) -> Conversation {
    Conversation {
        conversation_id: "C-new".into(),
        agent_id: "A1".into(),
        caller_id: Some(CALLER.into()),
        organization_id: "org".into(),
        started_at: Utc::now(),
        ended_at: Some(Utc::now()),
        duration_seconds: Some(120),
        status: ConversationStatus::ExtractionPending,
        transcript,
    }
}

fn turn(text: &str) -> TranscriptTurn {
    TranscriptTurn {
        role: SpeakerRole::User,
        text: text.into(),
    }
}

fn candidate_json(content: &str, memory_type: &str, importance: u8) -> String {
    serde_json::json!([{
        "content": content,
        "type": memory_type,
        "importance": importance,
        "confidence": 0.9,
        "source_quote": content,
    }])
    .to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Storage & dedup decisions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn brand_new_fact_is_stored_with_derived_shareability() {
    let llm = ScriptedLlm::new(vec![Ok(candidate_json(
        "tracked package XYZ-789",
        "factual",
        7,
    ))]);
    let h = harness(llm);

    let outcome = h
        .pipeline
        .run(&conversation(vec![turn("where is package XYZ-789?")]))
        .await
        .unwrap();

    assert_eq!(outcome.stored, 1);
    assert_eq!(outcome.reinforced, 0);
    let stored = h.store.find_by_content("tracked package XYZ-789").unwrap();
    assert_eq!(stored.importance, 7);
    assert!(!stored.shareable, "importance 7 is below the share threshold");
    assert_eq!(stored.caller_id, CALLER);
    assert_eq!(stored.agent_id.as_deref(), Some("A1"));
}

#[tokio::test]
async fn importance_at_threshold_is_shareable() {
    let llm = ScriptedLlm::new(vec![Ok(candidate_json(
        "is the CFO of Acme Corp",
        "factual",
        8,
    ))]);
    let h = harness(llm);

    h.pipeline
        .run(&conversation(vec![turn("I'm the CFO over at Acme")]))
        .await
        .unwrap();

    let stored = h.store.find_by_content("is the CFO of Acme Corp").unwrap();
    assert!(stored.shareable);
}

#[tokio::test]
async fn exact_duplicate_reinforces_instead_of_storing() {
    let llm = ScriptedLlm::new(vec![Ok(candidate_json(
        "Prefers Express Shipping",
        "preference",
        6,
    ))]);
    let h = harness(llm);
    h.store.seed(seeded_memory(
        "m-existing",
        CALLER,
        Some("A1"),
        "prefers express shipping",
        MemoryType::Preference,
        6,
        8,
    ));

    let outcome = h
        .pipeline
        .run(&conversation(vec![turn("express please, always")]))
        .await
        .unwrap();

    assert_eq!(outcome.stored, 0);
    assert_eq!(outcome.reinforced, 1);
    assert_eq!(h.store.memory_count(), 1);
    let existing = h.store.find_by_content("prefers express shipping").unwrap();
    assert_eq!(existing.reinforcement_count, 1);
    assert!(existing.last_reinforced_at >= existing.created_at);
}

#[tokio::test]
async fn semantic_duplicate_reinforces_and_promotes_importance() {
    // Scenario: seeded importance 6, the extractor now rates the same
    // preference an 8 → reinforced, importance raised, shareable flips.
    let llm = ScriptedLlm::new(vec![Ok(candidate_json(
        "always wants express shipping",
        "preference",
        8,
    ))]);
    let h = harness(llm);
    h.store.seed(seeded_memory(
        "m-existing",
        CALLER,
        Some("A1"),
        "prefers express shipping",
        MemoryType::Preference,
        6,
        8,
    ));
    h.store.set_similarity(
        "prefers express shipping",
        "always wants express shipping",
        0.91,
    );

    let outcome = h
        .pipeline
        .run(&conversation(vec![turn("I always want express shipping")]))
        .await
        .unwrap();

    assert_eq!(outcome.stored, 0);
    assert_eq!(outcome.reinforced, 1);
    assert_eq!(h.store.memory_count(), 1);
    let existing = h.store.find_by_content("prefers express shipping").unwrap();
    assert_eq!(existing.reinforcement_count, 1);
    assert_eq!(existing.importance, 8);
    assert!(existing.shareable);
}

#[tokio::test]
async fn semantic_duplicate_with_lower_importance_keeps_existing() {
    let llm = ScriptedLlm::new(vec![Ok(candidate_json(
        "likes fast delivery",
        "preference",
        3,
    ))]);
    let h = harness(llm);
    h.store.seed(seeded_memory(
        "m-existing",
        CALLER,
        Some("A1"),
        "prefers express shipping",
        MemoryType::Preference,
        6,
        8,
    ));
    h.store
        .set_similarity("prefers express shipping", "likes fast delivery", 0.88);

    h.pipeline
        .run(&conversation(vec![turn("fast delivery please")]))
        .await
        .unwrap();

    let existing = h.store.find_by_content("prefers express shipping").unwrap();
    assert_eq!(existing.importance, 6);
    assert_eq!(existing.reinforcement_count, 1);
}

#[tokio::test]
async fn near_match_factual_content_becomes_conflict_pair() {
    let llm = ScriptedLlm::new(vec![Ok(candidate_json(
        "lives at 99 Pine Avenue",
        "factual",
        5,
    ))]);
    let h = harness(llm);
    h.store.seed(seeded_memory(
        "m-existing",
        CALLER,
        Some("A1"),
        "lives at 12 Oak Street",
        MemoryType::Factual,
        5,
        8,
    ));
    // In the conflict band: above 0.70, below 0.85.
    h.store
        .set_similarity("lives at 12 Oak Street", "lives at 99 Pine Avenue", 0.78);

    let outcome = h
        .pipeline
        .run(&conversation(vec![turn("I moved to 99 Pine Avenue")]))
        .await
        .unwrap();

    assert_eq!(outcome.stored, 1);
    assert_eq!(outcome.conflicts, 1);
    assert_eq!(h.store.memory_count(), 2);

    let old = h.store.find_by_content("lives at 12 Oak Street").unwrap();
    let new = h.store.find_by_content("lives at 99 Pine Avenue").unwrap();
    let old_group = old.conflict_group().expect("existing memory tagged");
    let new_group = new.conflict_group().expect("new memory tagged");
    assert_eq!(old_group, new_group);
}

#[tokio::test]
async fn near_match_emotion_is_stored_without_conflict() {
    // The conflict branch is reserved for factual/preference content.
    let llm = ScriptedLlm::new(vec![Ok(candidate_json(
        "sounded frustrated about billing",
        "emotion",
        4,
    ))]);
    let h = harness(llm);
    h.store.seed(seeded_memory(
        "m-existing",
        CALLER,
        Some("A1"),
        "was upset about billing",
        MemoryType::Emotion,
        4,
        8,
    ));
    h.store.set_similarity(
        "was upset about billing",
        "sounded frustrated about billing",
        0.75,
    );

    let outcome = h
        .pipeline
        .run(&conversation(vec![turn("this billing thing again...")]))
        .await
        .unwrap();

    assert_eq!(outcome.conflicts, 0);
    assert_eq!(outcome.stored, 1);
    assert!(h
        .store
        .find_by_content("sounded frustrated about billing")
        .unwrap()
        .conflict_group()
        .is_none());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Idempotence & batching
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn resubmitting_the_same_conversation_reinforces_not_duplicates() {
    let payload = candidate_json("has a golden retriever named Biscuit", "factual", 6);
    let llm = ScriptedLlm::new(vec![Ok(payload.clone()), Ok(payload)]);
    let h = harness(llm);
    let conv = conversation(vec![turn("my dog Biscuit chewed the router")]);

    let first = h.pipeline.run(&conv).await.unwrap();
    let second = h.pipeline.run(&conv).await.unwrap();

    assert_eq!(first.stored, 1);
    assert_eq!(second.stored, 0);
    assert_eq!(second.reinforced, 1);
    assert_eq!(h.store.memory_count(), 1);
}

#[tokio::test]
async fn dedup_round_trip_is_single_batch_call() {
    let llm = ScriptedLlm::new(vec![Ok(serde_json::json!([
        {"content": "fact one", "type": "factual", "importance": 3},
        {"content": "fact two", "type": "factual", "importance": 4},
        {"content": "fact three", "type": "factual", "importance": 5},
    ])
    .to_string())]);
    let h = harness(llm);

    h.pipeline
        .run(&conversation(vec![turn("three facts in one call")]))
        .await
        .unwrap();

    assert_eq!(h.store.batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.store.memory_count(), 3);
}

#[tokio::test]
async fn intra_batch_duplicates_collapse_before_storage() {
    let llm = ScriptedLlm::new(vec![Ok(serde_json::json!([
        {"content": "Likes Tea", "type": "preference", "importance": 3},
        {"content": "likes tea", "type": "preference", "importance": 7},
    ])
    .to_string())]);
    let h = harness(llm);

    let outcome = h
        .pipeline
        .run(&conversation(vec![turn("tea, always tea")]))
        .await
        .unwrap();

    assert_eq!(outcome.stored, 1);
    assert_eq!(h.store.find_by_content("likes tea").unwrap().importance, 7);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Degenerate inputs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn anonymous_conversation_extracts_nothing() {
    let llm = ScriptedLlm::new(vec![]);
    let h = harness(llm.clone());
    let mut conv = conversation(vec![turn("hello")]);
    conv.caller_id = None;

    let outcome = h.pipeline.run(&conv).await.unwrap();
    assert_eq!(outcome.chunks_total, 0);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.memory_count(), 0);
}

#[tokio::test]
async fn empty_transcript_completes_with_empty_memory_set() {
    let llm = ScriptedLlm::new(vec![]);
    let h = harness(llm);
    let outcome = h.pipeline.run(&conversation(vec![])).await.unwrap();
    assert_eq!(outcome.chunks_total, 0);
    assert_eq!(outcome.stored, 0);
}

#[tokio::test]
async fn zero_candidates_is_success_not_error() {
    let llm = ScriptedLlm::new(vec![Ok("[]".into())]);
    let h = harness(llm);
    let outcome = h
        .pipeline
        .run(&conversation(vec![turn("nothing memorable said")]))
        .await
        .unwrap();
    assert_eq!(outcome.chunks_total, 1);
    assert!(outcome.failed_chunks.is_empty());
    assert_eq!(h.store.memory_count(), 0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chunk failure semantics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn two_chunk_config() -> ExtractionConfig {
    ExtractionConfig {
        // Small enough that two substantial turns land in separate chunks.
        chunk_tokens: 40,
        parallelism: 1,
        ..Default::default()
    }
}

fn two_chunk_transcript() -> Vec<TranscriptTurn> {
    vec![
        turn(&format!("first half of the call. {}", "details ".repeat(20))),
        turn(&format!("second half of the call. {}", "details ".repeat(20))),
    ]
}

#[tokio::test]
async fn partial_chunk_failure_still_succeeds_and_records_it() {
    let llm = ScriptedLlm::new(vec![
        Err(Error::UpstreamUnavailable("provider 503".into())),
        Ok(candidate_json("renewal is due in March", "factual", 5)),
    ]);
    let h = harness_with(llm, two_chunk_config());

    let outcome = h
        .pipeline
        .run(&conversation(two_chunk_transcript()))
        .await
        .unwrap();

    assert_eq!(outcome.chunks_total, 2);
    assert_eq!(outcome.failed_chunks, vec![0]);
    assert_eq!(outcome.stored, 1);
}

#[tokio::test]
async fn all_chunks_failing_fails_the_job_transiently() {
    let llm = ScriptedLlm::new(vec![
        Err(Error::UpstreamUnavailable("503".into())),
        Err(Error::UpstreamUnavailable("503".into())),
    ]);
    let h = harness_with(llm, two_chunk_config());

    let err = h
        .pipeline
        .run(&conversation(two_chunk_transcript()))
        .await
        .unwrap_err();
    assert!(err.is_transient(), "retryable failure expected: {err}");
    assert_eq!(h.store.memory_count(), 0);
}

#[tokio::test]
async fn concurrent_conversations_for_same_caller_never_duplicate() {
    // Two conversations extract the same fact concurrently; the
    // per-caller lock serializes dedup-then-store, so exactly one copy
    // lands and the other reinforces it.
    let payload = candidate_json("works night shifts", "factual", 5);
    let llm = ScriptedLlm::new(vec![Ok(payload.clone()), Ok(payload)]);
    let h = Arc::new(harness(llm));

    let mut conv_a = conversation(vec![turn("I work nights")]);
    conv_a.conversation_id = "C-a".into();
    let mut conv_b = conversation(vec![turn("night shift again")]);
    conv_b.conversation_id = "C-b".into();

    let (ha, hb) = (h.clone(), h.clone());
    let (ra, rb) = tokio::join!(
        async move { ha.pipeline.run(&conv_a).await },
        async move { hb.pipeline.run(&conv_b).await },
    );
    ra.unwrap();
    rb.unwrap();

    assert_eq!(h.store.memory_count(), 1);
    let memory = h.store.find_by_content("works night shifts").unwrap();
    assert_eq!(memory.reinforcement_count, 1);
}
