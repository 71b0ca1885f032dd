//! Conversation lifecycle types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who spoke a transcript turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    Agent,
    User,
}

/// One ordered turn of a call transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptTurn {
    pub role: SpeakerRole,
    pub text: String,
}

/// Conversation status machine:
///
/// ```text
/// initiated → active → completed → extraction_pending
///                                    ├→ extraction_completed
///                                    └→ extraction_failed
///    └→ failed (call never established)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Initiated,
    Active,
    Completed,
    Failed,
    ExtractionPending,
    ExtractionCompleted,
    ExtractionFailed,
}

impl ConversationStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ConversationStatus) -> bool {
        use ConversationStatus::*;
        matches!(
            (self, next),
            (Initiated, Active)
                | (Initiated, Failed)
                | (Active, Completed)
                | (Completed, ExtractionPending)
                | (ExtractionPending, ExtractionCompleted)
                | (ExtractionPending, ExtractionFailed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Failed | Self::ExtractionCompleted | Self::ExtractionFailed
        )
    }
}

/// One call instance. The transcript is owned by the conversation for its
/// lifetime; extracted memories reference it by id only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub agent_id: String,
    /// `None` = anonymous caller; extraction is skipped without an identity
    /// to bind memories to.
    #[serde(default)]
    pub caller_id: Option<String>,
    pub organization_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<u64>,
    pub status: ConversationStatus,
    #[serde(default)]
    pub transcript: Vec<TranscriptTurn>,
}
