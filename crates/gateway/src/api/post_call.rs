//! Post-call webhook — persist, enqueue, acknowledge.
//!
//! `POST /v1/webhooks/post-call` receives one of three event types,
//! discriminated on `type`. The transcription path persists the raw
//! payload, enqueues an extraction job, and acknowledges within the 1 s
//! budget no matter what the queue looks like — overflow degrades to a
//! deferred on-disk marker, never an error to the platform.

use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;

use mr_domain::conversation::{Conversation, ConversationStatus, TranscriptTurn};
use mr_domain::error::{Error, Result};
use mr_domain::trace::TraceEvent;

use crate::api::{ApiError, RequestContext};
use crate::runtime::scheduler::SubmitOutcome;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostCallEvent {
    PostCallTranscription { data: TranscriptionData },
    PostCallAudio { data: AudioData },
    CallInitiationFailure { data: FailureData },
}

#[derive(Debug, Deserialize)]
pub struct TranscriptionData {
    pub conversation_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub caller_id: Option<String>,
    #[serde(default)]
    pub transcript: Vec<TranscriptTurn>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub dynamic_variables: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub struct AudioData {
    pub conversation_id: String,
    pub full_audio: String,
}

#[derive(Debug, Deserialize)]
pub struct FailureData {
    pub conversation_id: String,
    pub agent_id: String,
    pub failure_reason: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl TranscriptionData {
    /// Build the domain conversation, ready for extraction. The caller
    /// identity may also arrive via dynamic variables when the top-level
    /// field is absent.
    pub fn into_conversation(self, organization_id: &str) -> Conversation {
        let caller_id = self
            .caller_id
            .filter(|c| !c.is_empty())
            .or_else(|| {
                self.dynamic_variables
                    .as_ref()
                    .and_then(|vars| vars.get("system__caller_id"))
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
            });

        let ended_at = Utc::now();
        let started_at = ended_at
            - chrono::Duration::seconds(self.duration.unwrap_or(0).min(i64::MAX as u64) as i64);

        Conversation {
            conversation_id: self.conversation_id,
            agent_id: self.agent_id,
            caller_id,
            organization_id: organization_id.to_owned(),
            started_at,
            ended_at: Some(ended_at),
            duration_seconds: self.duration,
            status: ConversationStatus::ExtractionPending,
            transcript: self.transcript,
        }
    }
}

/// Parse a persisted transcription payload back into a conversation —
/// the recovery sweep replays archived bodies through this.
pub fn parse_transcription(raw: &[u8], organization_id: &str) -> Result<Conversation> {
    let event: PostCallEvent = serde_json::from_slice(raw)
        .map_err(|e| Error::PayloadSchema(format!("transcription payload: {e}")))?;
    match event {
        PostCallEvent::PostCallTranscription { data } => {
            Ok(data.into_conversation(organization_id))
        }
        _ => Err(Error::PayloadSchema(
            "payload is not a post_call_transcription event".into(),
        )),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn post_call(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Response {
    let start = Instant::now();

    let event: PostCallEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            return ApiError::new(Error::PayloadSchema(e.to_string()), ctx.request_id)
                .into_response();
        }
    };

    let deadline = Duration::from_millis(state.config.scheduler.post_call_ack_deadline_ms);
    let handled = tokio::time::timeout(
        deadline,
        handle_event(&state, &ctx.request_id, event, &body),
    )
    .await;

    let response = match handled {
        Ok(Ok(response)) => response,
        Ok(Err((e, request_id))) => ApiError::new(e, request_id).into_response(),
        Err(_) => ApiError::new(
            Error::DeadlineExceeded(format!("post-call ack budget of {}ms", deadline.as_millis())),
            ctx.request_id.clone(),
        )
        .into_response(),
    };

    TraceEvent::WebhookHandled {
        endpoint: "post_call".into(),
        status: response.status().as_u16(),
        duration_ms: start.elapsed().as_millis() as u64,
        request_id: ctx.request_id,
    }
    .emit();
    response
}

async fn handle_event(
    state: &AppState,
    request_id: &str,
    event: PostCallEvent,
    raw_body: &Bytes,
) -> std::result::Result<Response, (Error, String)> {
    let err = |e: Error| (e, request_id.to_owned());

    match event {
        PostCallEvent::PostCallTranscription { data } => {
            let conversation_id = data.conversation_id.clone();
            tracing::info!(
                request_id = %request_id,
                organization_id = %state.config.organization.organization_id,
                conversation_id = %conversation_id,
                agent_id = %data.agent_id,
                turns = data.transcript.len(),
                "post-call transcription received"
            );

            state
                .payloads
                .write_transcription(&conversation_id, raw_body)
                .await
                .map_err(err)?;

            let conversation =
                data.into_conversation(&state.config.organization.organization_id);
            let outcome = state.scheduler.submit(conversation).await.map_err(err)?;

            Ok(accepted(
                request_id,
                &conversation_id,
                outcome == SubmitOutcome::Queued,
            ))
        }
        PostCallEvent::PostCallAudio { data } => {
            tracing::info!(
                request_id = %request_id,
                organization_id = %state.config.organization.organization_id,
                conversation_id = %data.conversation_id,
                "post-call audio received"
            );
            // Opaque blob passthrough: decoded and archived, never processed.
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(data.full_audio.as_bytes())
                .map_err(|e| err(Error::PayloadSchema(format!("full_audio: {e}"))))?;
            state
                .payloads
                .write_audio(&data.conversation_id, &decoded)
                .await
                .map_err(err)?;
            Ok(accepted(request_id, &data.conversation_id, false))
        }
        PostCallEvent::CallInitiationFailure { data } => {
            tracing::info!(
                request_id = %request_id,
                organization_id = %state.config.organization.organization_id,
                conversation_id = %data.conversation_id,
                agent_id = %data.agent_id,
                failure_reason = %data.failure_reason,
                "call initiation failure received"
            );
            state
                .payloads
                .write_failure(&data.conversation_id, raw_body)
                .await
                .map_err(err)?;
            Ok(accepted(request_id, &data.conversation_id, false))
        }
    }
}

fn accepted(request_id: &str, conversation_id: &str, queued: bool) -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "request_id": request_id,
            "data": {
                "conversation_id": conversation_id,
                "accepted": true,
                "queued": queued,
            }
        })),
    )
        .into_response()
}
