//! Memory, caller and organization types shared across memrelay crates.
//!
//! A `Memory` is a single atomic fact mined from a conversation. Its
//! `content_hash` is computed over *normalized* content (lowercased,
//! whitespace collapsed) so trivially different phrasings of the same
//! string collapse to one hash.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata key marking a memory as part of a conflict pair.
pub const META_CONFLICT_GROUP: &str = "conflict_group_id";
/// Metadata key carrying the verbatim transcript quote a fact came from.
pub const META_SOURCE_QUOTE: &str = "source_quote";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    Factual,
    Preference,
    Issue,
    Emotion,
    Relationship,
}

impl MemoryType {
    /// Parse a type label emitted by the extraction model. Unknown labels
    /// return `None` — the candidate is dropped, not coerced.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "factual" => Some(Self::Factual),
            "preference" => Some(Self::Preference),
            "issue" => Some(Self::Issue),
            "emotion" => Some(Self::Emotion),
            "relationship" => Some(Self::Relationship),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Factual => "factual",
            Self::Preference => "preference",
            Self::Issue => "issue",
            Self::Emotion => "emotion",
            Self::Relationship => "relationship",
        }
    }
}

/// A single atomic fact with its provenance and reinforcement history.
///
/// Owned by its `(organization_id, caller_id)` pair; `agent_id = None`
/// means the memory is shared across the organization's agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub memory_id: String,
    pub caller_id: String,
    pub conversation_id: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    pub organization_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub importance: u8,
    pub shareable: bool,
    pub created_at: DateTime<Utc>,
    pub last_reinforced_at: DateTime<Utc>,
    pub reinforcement_count: u32,
    pub confidence: f32,
    pub content_hash: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Memory {
    /// Whether this memory is flagged as part of a conflict pair.
    pub fn conflict_group(&self) -> Option<&str> {
        self.metadata.get(META_CONFLICT_GROUP).and_then(|v| v.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Content normalization & hashing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lowercase and collapse runs of whitespace to single spaces.
pub fn normalize_content(content: &str) -> String {
    content
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable SHA-256 hex digest of normalized content.
///
/// Deterministic on the normalized form: two candidates differing only in
/// case or whitespace hash identically.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(normalize_content(content).as_bytes()))
}

/// Derived visibility: a memory is org-shareable iff its importance meets
/// the organization's share threshold.
pub fn is_shareable(importance: u8, share_threshold: u8) -> bool {
    importance >= share_threshold
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Caller & organization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identity record for a physical end-user. Created on first observation,
/// updated per conversation, never deleted except by explicit erasure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caller {
    pub caller_id: String,
    pub organization_id: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub conversation_count: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token estimation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Rough token estimate used for chunking and context budgeting.
/// ~4 characters per token for English text; close enough for budget
/// enforcement where exactness is not required.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
