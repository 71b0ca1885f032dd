//! Pre-call context assembly.
//!
//! Builds the JSON envelope handed to the agent before it answers:
//! a personalized first message plus the caller's memories partitioned
//! by type, under a hard token budget. Everything upstream (agent-scope
//! memories, org-shareable memories, agent profile) is fetched
//! concurrently; the LLM summarization is the only blocking dependency
//! on the critical path. Missing caller identity is never an error, and
//! upstream failures degrade to partial context rather than failing the
//! call.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use mr_domain::config::ContextConfig;
use mr_domain::error::Result;
use mr_domain::memory::{estimate_tokens, Memory, MemoryType, META_CONFLICT_GROUP};
use mr_domain::trace::TraceEvent;
use mr_llm::LlmSelector;
use mr_memstore::{MemoryStore, SearchScope};

use crate::runtime::profile_cache::ProfileCache;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One memory as exposed to the agent.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryView {
    pub memory_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub importance: u8,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict_group_id: Option<String>,
}

impl MemoryView {
    fn from_memory(m: &Memory) -> Self {
        Self {
            memory_id: m.memory_id.clone(),
            content: m.content.clone(),
            memory_type: m.memory_type,
            importance: m.importance,
            created_at: m.created_at,
            conversation_id: m.conversation_id.clone(),
            agent_id: m.agent_id.clone(),
            conflict_group_id: m
                .metadata
                .get(META_CONFLICT_GROUP)
                .and_then(|v| v.as_str())
                .map(str::to_owned),
        }
    }
}

/// Memories partitioned by type for the agent's consumption.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContextSections {
    pub memories: Vec<MemoryView>,
    pub preferences: Vec<MemoryView>,
    pub relationship_insights: Vec<MemoryView>,
    pub conflicts: Vec<MemoryView>,
}

/// The full pre-call response payload.
#[derive(Debug, Clone, Serialize)]
pub struct CallContext {
    /// Always present: unknown callers get the generic greeting derived
    /// from the agent profile instead of a personalized one.
    pub first_message: Option<String>,
    pub context: ContextSections,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Assembler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ContextAssembler {
    store: Arc<dyn MemoryStore>,
    llm: Arc<LlmSelector>,
    profiles: Arc<ProfileCache>,
    config: ContextConfig,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        llm: Arc<LlmSelector>,
        profiles: Arc<ProfileCache>,
        config: ContextConfig,
    ) -> Self {
        Self {
            store,
            llm,
            profiles,
            config,
        }
    }

    /// Assemble the pre-call context. Infallible by design: every
    /// upstream failure degrades instead of erroring, because the call
    /// is connecting either way.
    pub async fn assemble(&self, caller_id: Option<&str>, agent_id: &str) -> CallContext {
        let start = Instant::now();
        let mut degraded = false;

        let context = match caller_id {
            Some(caller_id) => {
                self.assemble_known(caller_id, agent_id, &mut degraded).await
            }
            None => self.assemble_anonymous(agent_id, &mut degraded).await,
        };

        TraceEvent::ContextAssembled {
            caller_id: caller_id.map(str::to_owned),
            agent_id: agent_id.to_owned(),
            memories: context.context.memories.len()
                + context.context.preferences.len()
                + context.context.relationship_insights.len()
                + context.context.conflicts.len(),
            estimated_tokens: context_tokens(&context),
            degraded: context.degraded,
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        context
    }

    async fn assemble_known(
        &self,
        caller_id: &str,
        agent_id: &str,
        degraded: &mut bool,
    ) -> CallContext {
        let agent_scope = SearchScope::CallerAgent {
            caller_id: caller_id.to_owned(),
            agent_id: agent_id.to_owned(),
        };
        let org_scope = SearchScope::CallerOrgShareable {
            caller_id: caller_id.to_owned(),
        };

        let (recent, shareable, profile) = tokio::join!(
            self.store.list_recent(agent_scope, self.config.recent_memories),
            self.store.list_recent(org_scope, self.config.max_memories),
            self.profiles.get(agent_id),
        );

        let recent = unwrap_degrading(recent, "agent-scope memory fetch", degraded);
        let shareable = unwrap_degrading(shareable, "org-shareable memory fetch", degraded);
        let profile = match profile {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(agent_id = %agent_id, error = %e, "profile unavailable for pre-call");
                *degraded = true;
                serde_json::json!({})
            }
        };

        let merged = merge_memories(recent, shareable, agent_id, self.config.max_memories);

        let first_message = match self.llm.summarize_first_message(&profile, &merged).await {
            Ok(greeting) => greeting,
            Err(e) => {
                tracing::warn!(error = %e, "summarization failed, using generic greeting");
                *degraded = true;
                generic_greeting(&profile)
            }
        };

        let first_message_tokens = estimate_tokens(&first_message);
        let views: Vec<MemoryView> = merged.iter().map(MemoryView::from_memory).collect();
        let views = enforce_token_budget(
            views,
            self.config.token_budget.saturating_sub(first_message_tokens),
        );

        CallContext {
            first_message: Some(first_message),
            context: partition(views),
            degraded: *degraded,
        }
    }

    /// No caller identity: skip all store reads and greet generically.
    async fn assemble_anonymous(&self, agent_id: &str, degraded: &mut bool) -> CallContext {
        let first_message = match self.profiles.get(agent_id).await {
            Ok(profile) => generic_greeting(&profile),
            Err(e) => {
                tracing::warn!(agent_id = %agent_id, error = %e, "profile unavailable for pre-call");
                *degraded = true;
                generic_greeting(&serde_json::json!({}))
            }
        };
        CallContext {
            first_message: Some(first_message),
            context: ContextSections::default(),
            degraded: *degraded,
        }
    }
}

fn unwrap_degrading(result: Result<Vec<Memory>>, what: &str, degraded: &mut bool) -> Vec<Memory> {
    match result {
        Ok(memories) => memories,
        Err(e) => {
            tracing::warn!(error = %e, "{what} failed, serving partial context");
            *degraded = true;
            Vec::new()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Merge, partition, budget
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Merge the agent-scope and org-shareable fetches by `memory_id`. The
/// agent-owned copy wins ties; the result is ordered importance-first
/// (newest first within equal importance) and capped.
pub fn merge_memories(
    agent_recent: Vec<Memory>,
    org_shareable: Vec<Memory>,
    _agent_id: &str,
    cap: usize,
) -> Vec<Memory> {
    let mut merged: Vec<Memory> = Vec::with_capacity(agent_recent.len() + org_shareable.len());
    let mut seen = std::collections::HashSet::new();

    // Agent-owned first, so duplicates from the shareable fetch lose.
    for memory in agent_recent.into_iter().chain(org_shareable) {
        if seen.insert(memory.memory_id.clone()) {
            merged.push(memory);
        }
    }

    merged.sort_by(|a, b| {
        b.importance
            .cmp(&a.importance)
            .then(b.created_at.cmp(&a.created_at))
    });
    merged.truncate(cap);
    merged
}

/// Partition views by memory type. Conflict-flagged memories go to the
/// `conflicts` array only — the agent should see them side by side, not
/// scattered through the other sections.
pub fn partition(views: Vec<MemoryView>) -> ContextSections {
    let mut sections = ContextSections::default();
    for view in views {
        if view.conflict_group_id.is_some() {
            sections.conflicts.push(view);
        } else {
            match view.memory_type {
                MemoryType::Preference => sections.preferences.push(view),
                MemoryType::Relationship => sections.relationship_insights.push(view),
                MemoryType::Factual | MemoryType::Issue | MemoryType::Emotion => {
                    sections.memories.push(view)
                }
            }
        }
    }
    sections
}

/// Enforce the token budget by dropping lowest-importance entries first.
/// Input order is preserved for the survivors.
pub fn enforce_token_budget(views: Vec<MemoryView>, budget_tokens: usize) -> Vec<MemoryView> {
    let mut total: usize = views.iter().map(|v| view_tokens(v)).sum();
    if total <= budget_tokens {
        return views;
    }

    // Indexes sorted worst-first: lowest importance, oldest within equal
    // importance.
    let mut drop_order: Vec<usize> = (0..views.len()).collect();
    drop_order.sort_by(|&a, &b| {
        views[a]
            .importance
            .cmp(&views[b].importance)
            .then(views[a].created_at.cmp(&views[b].created_at))
    });

    let mut dropped = vec![false; views.len()];
    for idx in drop_order {
        if total <= budget_tokens {
            break;
        }
        total -= view_tokens(&views[idx]);
        dropped[idx] = true;
    }

    views
        .into_iter()
        .enumerate()
        .filter_map(|(i, v)| (!dropped[i]).then_some(v))
        .collect()
}

/// Per-entry cost: content plus a fixed overhead for the envelope fields.
fn view_tokens(view: &MemoryView) -> usize {
    estimate_tokens(&view.content) + 16
}

fn context_tokens(context: &CallContext) -> usize {
    let sections = &context.context;
    sections
        .memories
        .iter()
        .chain(&sections.preferences)
        .chain(&sections.relationship_insights)
        .chain(&sections.conflicts)
        .map(view_tokens)
        .sum::<usize>()
        + context
            .first_message
            .as_deref()
            .map(estimate_tokens)
            .unwrap_or(0)
}

/// Fallback opening line when summarization is unavailable or the caller
/// is unknown, derived from the agent profile where possible.
pub fn generic_greeting(profile: &serde_json::Value) -> String {
    if let Some(greeting) = profile.get("greeting").and_then(|v| v.as_str()) {
        return greeting.to_owned();
    }
    match profile.get("name").and_then(|v| v.as_str()) {
        Some(name) => format!("Hello, you've reached {name}. How can I help you today?"),
        None => "Hello! How can I help you today?".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn memory(id: &str, importance: u8, agent_id: Option<&str>, age_minutes: i64) -> Memory {
        let created = Utc::now() - Duration::minutes(age_minutes);
        Memory {
            memory_id: id.into(),
            caller_id: "+15551234567".into(),
            conversation_id: "C1".into(),
            agent_id: agent_id.map(str::to_owned),
            organization_id: "org".into(),
            content: format!("fact {id}"),
            memory_type: MemoryType::Factual,
            importance,
            shareable: importance >= 8,
            created_at: created,
            last_reinforced_at: created,
            reinforcement_count: 0,
            confidence: 0.9,
            content_hash: mr_domain::memory::content_hash(&format!("fact {id}")),
            metadata: Default::default(),
        }
    }

    fn view(id: &str, importance: u8, content: &str) -> MemoryView {
        MemoryView {
            memory_id: id.into(),
            content: content.into(),
            memory_type: MemoryType::Factual,
            importance,
            created_at: Utc::now(),
            conversation_id: "C1".into(),
            agent_id: None,
            conflict_group_id: None,
        }
    }

    #[test]
    fn merge_prefers_agent_owned_copy_on_id_ties() {
        let agent_copy = memory("m1", 5, Some("A1"), 10);
        let mut shared_copy = memory("m1", 5, Some("support"), 10);
        shared_copy.content = "shared copy".into();

        let merged = merge_memories(vec![agent_copy], vec![shared_copy], "A1", 20);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, "fact m1");
    }

    #[test]
    fn merge_orders_importance_then_recency_and_caps() {
        let merged = merge_memories(
            vec![memory("old-important", 9, Some("A1"), 600)],
            vec![
                memory("new-important", 9, Some("support"), 5),
                memory("minor", 2, Some("support"), 5),
            ],
            "A1",
            2,
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].memory_id, "new-important");
        assert_eq!(merged[1].memory_id, "old-important");
    }

    #[test]
    fn partition_routes_types_and_conflicts() {
        let mut conflict = view("c", 5, "old address");
        conflict.conflict_group_id = Some("g1".into());
        let mut pref = view("p", 5, "prefers email");
        pref.memory_type = MemoryType::Preference;
        let mut rel = view("r", 5, "daughter Amy");
        rel.memory_type = MemoryType::Relationship;

        let sections = partition(vec![view("f", 5, "fact"), conflict, pref, rel]);
        assert_eq!(sections.memories.len(), 1);
        assert_eq!(sections.preferences.len(), 1);
        assert_eq!(sections.relationship_insights.len(), 1);
        assert_eq!(sections.conflicts.len(), 1);
    }

    #[test]
    fn budget_drops_lowest_importance_first() {
        let views = vec![
            view("keep-high", 9, &"x".repeat(400)),
            view("drop-low", 2, &"y".repeat(400)),
            view("keep-mid", 6, &"z".repeat(400)),
        ];
        // Each view ≈ 116 tokens; budget fits two.
        let survivors = enforce_token_budget(views, 250);
        let ids: Vec<_> = survivors.iter().map(|v| v.memory_id.as_str()).collect();
        assert_eq!(ids, vec!["keep-high", "keep-mid"]);
    }

    #[test]
    fn budget_noop_when_under() {
        let views = vec![view("a", 5, "short")];
        assert_eq!(enforce_token_budget(views, 1_000).len(), 1);
    }

    #[test]
    fn generic_greeting_prefers_profile_greeting() {
        let profile = serde_json::json!({"greeting": "Hey there, Acme Support speaking!"});
        assert_eq!(generic_greeting(&profile), "Hey there, Acme Support speaking!");

        let named = serde_json::json!({"name": "Acme Billing"});
        assert!(generic_greeting(&named).contains("Acme Billing"));

        assert!(!generic_greeting(&serde_json::json!({})).is_empty());
    }

    #[test]
    fn degraded_flag_omitted_when_false() {
        let ctx = CallContext {
            first_message: Some("hi".into()),
            context: ContextSections::default(),
            degraded: false,
        };
        let json = serde_json::to_value(&ctx).unwrap();
        assert!(json.get("degraded").is_none());

        let ctx = CallContext {
            degraded: true,
            ..ctx
        };
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["degraded"], true);
    }
}
