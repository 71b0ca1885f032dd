//! Deferred-payload recovery.
//!
//! Queue overflow and process restarts leave conversations on disk whose
//! extraction never ran to completion. The sweeper re-reads their
//! persisted transcription payloads and re-submits them:
//!
//! * `deferred` — always picked up (never made it into the queue).
//! * `queued` / `running` — only when stale, to avoid double-enqueueing
//!   a job that is legitimately sitting in the live queue or mid-run.
//!   At startup the queue is empty, so the caller passes a zero
//!   staleness threshold and everything recoverable is resubmitted.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use mr_domain::error::Result;

use super::payloads::{ExtractionState, PayloadStore};
use super::scheduler::JobScheduler;

pub struct RecoverySweeper {
    payloads: Arc<PayloadStore>,
    scheduler: Arc<JobScheduler>,
    organization_id: String,
}

impl RecoverySweeper {
    pub fn new(
        payloads: Arc<PayloadStore>,
        scheduler: Arc<JobScheduler>,
        organization_id: &str,
    ) -> Self {
        Self {
            payloads,
            scheduler,
            organization_id: organization_id.to_owned(),
        }
    }

    /// Scan the archive and re-submit recoverable conversations. Returns
    /// how many were re-submitted.
    pub async fn sweep(&self, stale_after: Duration) -> Result<usize> {
        let candidates = self.payloads.list_recoverable().await?;
        let mut resubmitted = 0;

        for conversation_id in candidates {
            let Some(state) = self.payloads.read_state(&conversation_id).await? else {
                continue;
            };

            let age = (Utc::now() - state.updated_at)
                .to_std()
                .unwrap_or(Duration::ZERO);
            let eligible = match state.state {
                ExtractionState::Deferred => true,
                ExtractionState::Queued | ExtractionState::Running => age >= stale_after,
                _ => false,
            };
            if !eligible {
                continue;
            }

            let raw = match self.payloads.read_transcription(&conversation_id).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "recoverable state without transcription payload, skipping"
                    );
                    continue;
                }
            };

            let conversation = match crate::api::post_call::parse_transcription(&raw, &self.organization_id) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(
                        conversation_id = %conversation_id,
                        error = %e,
                        "persisted transcription no longer parses, marking failed"
                    );
                    self.payloads
                        .update_state(&conversation_id, |s| {
                            s.state = ExtractionState::Failed;
                            s.last_error = Some(e.to_string());
                        })
                        .await?;
                    continue;
                }
            };

            self.scheduler.submit(conversation).await?;
            resubmitted += 1;
            tracing::info!(conversation_id = %conversation_id, "recovered deferred extraction");
        }

        Ok(resubmitted)
    }
}
