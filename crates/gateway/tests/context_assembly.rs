//! Pre-call context assembly against the store/LLM doubles: personalized
//! greetings, anonymous callers, cross-agent sharing, and degradation.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{seeded_memory, MockMemoryStore, ScriptedLlm, StaticProfileFetcher};
use mr_domain::config::{ContextConfig, LlmConfig};
use mr_domain::error::Error;
use mr_domain::memory::MemoryType;
use mr_gateway::context::ContextAssembler;
use mr_gateway::runtime::profile_cache::ProfileCache;
use mr_llm::{LlmClient, LlmSelector};

const CALLER: &str = "+15551234567";

fn assembler(
    store: Arc<MockMemoryStore>,
    llm: Arc<ScriptedLlm>,
    config: ContextConfig,
) -> ContextAssembler {
    let selector = Arc::new(LlmSelector::new(
        llm as Arc<dyn LlmClient>,
        None,
        &LlmConfig::default(),
    ));
    let profiles = Arc::new(ProfileCache::new(
        Arc::new(StaticProfileFetcher(serde_json::json!({
            "name": "Acme Support",
            "greeting": "Thanks for calling Acme Support!",
        }))),
        Duration::from_secs(600),
    ));
    ContextAssembler::new(store, selector, profiles, config)
}

#[tokio::test]
async fn known_caller_gets_personalized_greeting_with_memories() {
    let store = MockMemoryStore::new();
    store.seed(seeded_memory(
        "m1",
        CALLER,
        Some("A1"),
        "tracked package XYZ-789",
        MemoryType::Factual,
        7,
        8,
    ));
    let llm = ScriptedLlm::new(vec![Ok(
        "Welcome back! Any news on package XYZ-789?".into()
    )]);
    let asm = assembler(store, llm, ContextConfig::default());

    let ctx = asm.assemble(Some(CALLER), "A1").await;

    let first_message = ctx.first_message.expect("greeting present");
    assert!(first_message.contains("XYZ-789"));
    assert!(!ctx.degraded);
    assert_eq!(ctx.context.memories.len(), 1);
    assert_eq!(ctx.context.memories[0].content, "tracked package XYZ-789");
    assert!(ctx.context.preferences.is_empty());
    assert!(ctx.context.conflicts.is_empty());
}

#[tokio::test]
async fn anonymous_caller_skips_store_and_uses_generic_greeting() {
    let store = MockMemoryStore::new();
    let llm = ScriptedLlm::new(vec![]);
    let asm = assembler(store.clone(), llm.clone(), ContextConfig::default());

    let ctx = asm.assemble(None, "A1").await;

    assert_eq!(
        ctx.first_message.as_deref(),
        Some("Thanks for calling Acme Support!")
    );
    assert!(ctx.context.memories.is_empty());
    assert!(!ctx.degraded);
    assert_eq!(store.list_recent_calls.load(Ordering::SeqCst), 0);
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0, "no LLM call either");
}

#[tokio::test]
async fn shareable_memory_from_another_agent_is_visible() {
    // Stored by the support agent at importance 9 → shareable → the
    // billing agent's pre-call context includes it.
    let store = MockMemoryStore::new();
    store.seed(seeded_memory(
        "m1",
        CALLER,
        Some("support"),
        "is a VIP customer since 2019",
        MemoryType::Factual,
        9,
        8,
    ));
    let llm = ScriptedLlm::new(vec![Ok("Hello again!".into())]);
    let asm = assembler(store, llm, ContextConfig::default());

    let ctx = asm.assemble(Some(CALLER), "billing").await;

    assert_eq!(ctx.context.memories.len(), 1);
    assert_eq!(ctx.context.memories[0].agent_id.as_deref(), Some("support"));
    assert!(!ctx.degraded);
}

#[tokio::test]
async fn non_shareable_memory_stays_with_its_agent() {
    let store = MockMemoryStore::new();
    store.seed(seeded_memory(
        "m1",
        CALLER,
        Some("support"),
        "mentioned a minor shipping delay",
        MemoryType::Factual,
        4,
        8,
    ));
    let llm = ScriptedLlm::new(vec![Ok("Hello!".into())]);
    let asm = assembler(store, llm, ContextConfig::default());

    let ctx = asm.assemble(Some(CALLER), "billing").await;
    assert!(ctx.context.memories.is_empty());
}

#[tokio::test]
async fn store_outage_degrades_to_partial_context() {
    let store = MockMemoryStore::new();
    store.fail_reads.store(true, Ordering::SeqCst);
    let llm = ScriptedLlm::new(vec![Ok("Hello there!".into())]);
    let asm = assembler(store, llm, ContextConfig::default());

    let ctx = asm.assemble(Some(CALLER), "A1").await;

    assert!(ctx.degraded);
    assert!(ctx.first_message.is_some());
    assert!(ctx.context.memories.is_empty());
}

#[tokio::test]
async fn llm_outage_degrades_to_generic_greeting() {
    let store = MockMemoryStore::new();
    store.seed(seeded_memory(
        "m1",
        CALLER,
        Some("A1"),
        "tracked package XYZ-789",
        MemoryType::Factual,
        7,
        8,
    ));
    let llm = ScriptedLlm::new(vec![Err(Error::UpstreamUnavailable("llm down".into()))]);
    let asm = assembler(store, llm, ContextConfig::default());

    let ctx = asm.assemble(Some(CALLER), "A1").await;

    assert!(ctx.degraded);
    assert_eq!(
        ctx.first_message.as_deref(),
        Some("Thanks for calling Acme Support!")
    );
    // Memories still served despite the LLM being down.
    assert_eq!(ctx.context.memories.len(), 1);
}

#[tokio::test]
async fn memory_types_partition_into_sections() {
    let store = MockMemoryStore::new();
    store.seed(seeded_memory(
        "m1", CALLER, Some("A1"), "lives in Lisbon", MemoryType::Factual, 5, 8,
    ));
    store.seed(seeded_memory(
        "m2", CALLER, Some("A1"), "prefers email over calls", MemoryType::Preference, 5, 8,
    ));
    store.seed(seeded_memory(
        "m3", CALLER, Some("A1"), "daughter named Amy", MemoryType::Relationship, 5, 8,
    ));
    let llm = ScriptedLlm::new(vec![Ok("Hi!".into())]);
    let asm = assembler(store, llm, ContextConfig::default());

    let ctx = asm.assemble(Some(CALLER), "A1").await;

    assert_eq!(ctx.context.memories.len(), 1);
    assert_eq!(ctx.context.preferences.len(), 1);
    assert_eq!(ctx.context.relationship_insights.len(), 1);
}

#[tokio::test]
async fn context_respects_memory_cap_and_token_budget() {
    let store = MockMemoryStore::new();
    for i in 0..30 {
        store.seed(seeded_memory(
            &format!("m{i}"),
            CALLER,
            Some("A1"),
            &format!("fact number {i}: {}", "padding ".repeat(30)),
            MemoryType::Factual,
            (i % 10) as u8 + 1,
            8,
        ));
    }
    let llm = ScriptedLlm::new(vec![Ok("Hello!".into())]);
    let config = ContextConfig {
        token_budget: 500,
        ..Default::default()
    };
    let asm = assembler(store, llm, config);

    let ctx = asm.assemble(Some(CALLER), "A1").await;

    let total = ctx.context.memories.len()
        + ctx.context.preferences.len()
        + ctx.context.relationship_insights.len()
        + ctx.context.conflicts.len();
    assert!(total <= 20, "memory cap enforced, got {total}");

    let token_estimate: usize = ctx
        .context
        .memories
        .iter()
        .map(|v| v.content.chars().count() / 4 + 16)
        .sum();
    assert!(token_estimate <= 500, "token budget enforced, got {token_estimate}");
}

#[tokio::test]
async fn conflict_flagged_memories_surface_in_conflicts_array() {
    let store = MockMemoryStore::new();
    let mut old_addr = seeded_memory(
        "m1", CALLER, Some("A1"), "lives at 12 Oak Street", MemoryType::Factual, 6, 8,
    );
    old_addr
        .metadata
        .insert("conflict_group_id".into(), serde_json::json!("g1"));
    let mut new_addr = seeded_memory(
        "m2", CALLER, Some("A1"), "lives at 99 Pine Avenue", MemoryType::Factual, 6, 8,
    );
    new_addr
        .metadata
        .insert("conflict_group_id".into(), serde_json::json!("g1"));
    store.seed(old_addr);
    store.seed(new_addr);

    let llm = ScriptedLlm::new(vec![Ok("Hi!".into())]);
    let asm = assembler(store, llm, ContextConfig::default());

    let ctx = asm.assemble(Some(CALLER), "A1").await;

    assert_eq!(ctx.context.conflicts.len(), 2);
    assert!(ctx.context.memories.is_empty());
    assert!(ctx
        .context
        .conflicts
        .iter()
        .all(|v| v.conflict_group_id.as_deref() == Some("g1")));
}
