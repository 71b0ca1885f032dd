//! Pre-call webhook — personalized context before the agent answers.
//!
//! `POST /v1/webhooks/pre-call` runs the context assembler under the
//! hard 2 s deadline. A caller without `system__caller_id` gets the
//! generic greeting path — never an error.

use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde::Deserialize;

use mr_domain::error::Error;
use mr_domain::trace::TraceEvent;

use crate::api::{ApiError, RequestContext};
use crate::state::AppState;

/// Pre-call request body from the voice platform.
#[derive(Debug, Deserialize)]
pub struct PreCallRequest {
    pub agent_id: String,
    pub conversation_id: String,
    /// Platform-supplied variables; the caller identity key is
    /// `system__caller_id` and may be absent for anonymous calls.
    #[serde(default)]
    pub dynamic_variables: serde_json::Map<String, serde_json::Value>,
}

impl PreCallRequest {
    pub fn caller_id(&self) -> Option<&str> {
        self.dynamic_variables
            .get("system__caller_id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
    }
}

pub async fn pre_call(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Response {
    let start = Instant::now();

    let req: PreCallRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            return ApiError::new(Error::PayloadSchema(e.to_string()), ctx.request_id)
                .into_response();
        }
    };
    if req.agent_id.is_empty() {
        return ApiError::new(
            Error::PayloadSchema("agent_id must not be empty".into()),
            ctx.request_id,
        )
        .into_response();
    }

    let caller_id = req.caller_id().map(str::to_owned);
    tracing::info!(
        request_id = %ctx.request_id,
        organization_id = %state.config.organization.organization_id,
        conversation_id = %req.conversation_id,
        agent_id = %req.agent_id,
        caller_known = caller_id.is_some(),
        "pre-call context requested"
    );

    let deadline = Duration::from_millis(state.config.context.pre_call_deadline_ms);
    let assembled = tokio::time::timeout(
        deadline,
        state.assembler.assemble(caller_id.as_deref(), &req.agent_id),
    )
    .await;

    let response = match assembled {
        Ok(context) => (StatusCode::OK, Json(context)).into_response(),
        Err(_) => ApiError::new(
            Error::DeadlineExceeded(format!("pre-call budget of {}ms", deadline.as_millis())),
            ctx.request_id.clone(),
        )
        .into_response(),
    };

    TraceEvent::WebhookHandled {
        endpoint: "pre_call".into(),
        status: response.status().as_u16(),
        duration_ms: start.elapsed().as_millis() as u64,
        request_id: ctx.request_id,
    }
    .emit();
    response
}
