//! Durable on-disk archive of raw webhook payloads.
//!
//! Layout, one directory per conversation:
//!
//! ```text
//! <root>/<conversation_id>/
//!   <conversation_id>_transcription.json
//!   <conversation_id>_audio.bin              (raw, decoded)
//!   <conversation_id>_failure.json
//!   <conversation_id>_extraction_state.json
//! ```
//!
//! Every write goes through a temp-file-then-rename so a crash never
//! leaves a half-written file behind. The extraction state file doubles
//! as the durable queue record: on restart the recovery sweep re-enqueues
//! every conversation whose state is still `queued`, `deferred`, or
//! `running` (interrupted mid-job).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use mr_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Extraction state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionState {
    /// In the in-memory queue (or waiting for a retry timer).
    Queued,
    /// Queue was full at enqueue time; the recovery sweep picks it up.
    Deferred,
    Running,
    Completed,
    Failed,
}

impl ExtractionState {
    /// States the recovery sweep re-enqueues. `Running` qualifies because
    /// a crash mid-job leaves it behind with no worker attached.
    pub fn is_recoverable(self) -> bool {
        matches!(self, Self::Queued | Self::Deferred | Self::Running)
    }
}

/// The persisted `<id>_extraction_state.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionStateFile {
    pub conversation_id: String,
    pub state: ExtractionState,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Chunk indexes that failed in a partial outcome, kept for reprocessing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_chunks: Vec<usize>,
    pub updated_at: DateTime<Utc>,
}

impl ExtractionStateFile {
    pub fn new(conversation_id: &str, state: ExtractionState) -> Self {
        Self {
            conversation_id: conversation_id.to_owned(),
            state,
            attempts: 0,
            last_error: None,
            failed_chunks: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Filesystem payload archive rooted at `payloads.root`.
pub struct PayloadStore {
    root: PathBuf,
}

impl PayloadStore {
    /// Open (creating if needed) the archive root.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn conversation_dir(&self, conversation_id: &str) -> PathBuf {
        self.root.join(sanitize_id(conversation_id))
    }

    fn file_path(&self, conversation_id: &str, suffix: &str) -> PathBuf {
        let id = sanitize_id(conversation_id);
        self.conversation_dir(conversation_id)
            .join(format!("{id}_{suffix}"))
    }

    // ── Raw payload writes ───────────────────────────────────────────

    pub async fn write_transcription(&self, conversation_id: &str, raw: &[u8]) -> Result<()> {
        self.write_atomic(self.file_path(conversation_id, "transcription.json"), raw)
            .await
    }

    pub async fn write_audio(&self, conversation_id: &str, decoded: &[u8]) -> Result<()> {
        self.write_atomic(self.file_path(conversation_id, "audio.bin"), decoded)
            .await
    }

    pub async fn write_failure(&self, conversation_id: &str, raw: &[u8]) -> Result<()> {
        self.write_atomic(self.file_path(conversation_id, "failure.json"), raw)
            .await
    }

    pub async fn read_transcription(&self, conversation_id: &str) -> Result<Vec<u8>> {
        let path = self.file_path(conversation_id, "transcription.json");
        Ok(tokio::fs::read(&path).await?)
    }

    // ── Extraction state ─────────────────────────────────────────────

    pub async fn write_state(&self, state: &ExtractionStateFile) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        self.write_atomic(
            self.file_path(&state.conversation_id, "extraction_state.json"),
            &bytes,
        )
        .await
    }

    pub async fn read_state(&self, conversation_id: &str) -> Result<Option<ExtractionStateFile>> {
        let path = self.file_path(conversation_id, "extraction_state.json");
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Update the state file in place, creating it if absent.
    pub async fn update_state(
        &self,
        conversation_id: &str,
        mutate: impl FnOnce(&mut ExtractionStateFile),
    ) -> Result<ExtractionStateFile> {
        let mut state = self
            .read_state(conversation_id)
            .await?
            .unwrap_or_else(|| ExtractionStateFile::new(conversation_id, ExtractionState::Queued));
        mutate(&mut state);
        state.updated_at = Utc::now();
        self.write_state(&state).await?;
        Ok(state)
    }

    // ── Recovery scan ────────────────────────────────────────────────

    /// Conversation ids whose persisted state is recoverable (queued,
    /// deferred, or interrupted mid-run). Used by the startup sweep and
    /// the periodic deferred-payload sweep.
    pub async fn list_recoverable(&self) -> Result<Vec<String>> {
        let mut recoverable = Vec::new();
        let mut dirs = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dirs.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let conversation_id = entry.file_name().to_string_lossy().into_owned();
            match self.read_state(&conversation_id).await {
                Ok(Some(state)) if state.state.is_recoverable() => {
                    recoverable.push(conversation_id);
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "unreadable extraction state, skipping"
                    );
                }
            }
        }
        recoverable.sort();
        Ok(recoverable)
    }

    /// Remove every conversation directory whose transcription payload
    /// names this caller. Returns the number of directories removed.
    pub async fn erase_caller(&self, caller_id: &str) -> Result<u64> {
        let mut removed = 0;
        let mut dirs = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dirs.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let conversation_id = entry.file_name().to_string_lossy().into_owned();
            let Ok(raw) = self.read_transcription(&conversation_id).await else {
                continue;
            };
            let Ok(value) = serde_json::from_slice::<serde_json::Value>(&raw) else {
                continue;
            };
            let payload_caller = value["data"]["caller_id"].as_str();
            if payload_caller == Some(caller_id) {
                tokio::fs::remove_dir_all(entry.path()).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn write_atomic(&self, path: PathBuf, bytes: &[u8]) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| Error::Internal("payload path has no parent".into()))?;
        tokio::fs::create_dir_all(dir).await?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Conversation ids come from the wire; never let one escape the archive
/// root through path separators or dot segments.
fn sanitize_id(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
