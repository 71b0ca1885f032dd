//! In-call search webhook — real-time semantic lookup mid-conversation.
//!
//! `POST /v1/webhooks/search` under the hard 3 s deadline. Concurrent
//! searches share nothing but the store's connection pool.

use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::Extension;
use serde::{Deserialize, Serialize};

use mr_domain::error::Error;
use mr_domain::memory::MemoryType;
use mr_domain::trace::TraceEvent;
use mr_memstore::ScoredMemory;

use crate::api::{ApiError, RequestContext};
use crate::runtime::search::{SearchQuery, SearchScopeLabel};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct InCallSearchRequest {
    pub query: String,
    pub caller_id: String,
    pub agent_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub search_all_agents: bool,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub min_score: Option<f32>,
}

#[derive(Debug, Serialize)]
pub struct SearchResultView {
    pub memory_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    pub importance: u8,
    pub score: f32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl From<ScoredMemory> for SearchResultView {
    fn from(hit: ScoredMemory) -> Self {
        Self {
            memory_id: hit.memory.memory_id,
            content: hit.memory.content,
            memory_type: hit.memory.memory_type,
            importance: hit.memory.importance,
            score: hit.score,
            created_at: hit.memory.created_at,
            conversation_id: hit.memory.conversation_id,
            agent_id: hit.memory.agent_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InCallSearchResponse {
    pub results: Vec<SearchResultView>,
    pub summary: String,
    pub scope: SearchScopeLabel,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn in_call_search(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    body: Bytes,
) -> Response {
    let start = Instant::now();

    let req: InCallSearchRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            return ApiError::new(Error::PayloadSchema(e.to_string()), ctx.request_id)
                .into_response();
        }
    };

    tracing::info!(
        request_id = %ctx.request_id,
        organization_id = %state.config.organization.organization_id,
        conversation_id = %req.conversation_id.as_deref().unwrap_or("-"),
        agent_id = %req.agent_id,
        search_all_agents = req.search_all_agents,
        "in-call search requested"
    );

    let query = SearchQuery {
        query: req.query,
        caller_id: req.caller_id,
        agent_id: req.agent_id,
        search_all_agents: req.search_all_agents,
        limit: req.limit,
        min_score: req.min_score,
    };

    let deadline = Duration::from_millis(state.config.search.deadline_ms);
    let outcome = tokio::time::timeout(deadline, state.search.search(query)).await;

    let response = match outcome {
        Ok(Ok(outcome)) => {
            let body = InCallSearchResponse {
                results: outcome.results.into_iter().map(Into::into).collect(),
                summary: outcome.summary,
                scope: outcome.scope,
                degraded: outcome.degraded,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(Err(e)) => ApiError::new(e, ctx.request_id.clone()).into_response(),
        Err(_) => ApiError::new(
            Error::DeadlineExceeded(format!("search budget of {}ms", deadline.as_millis())),
            ctx.request_id.clone(),
        )
        .into_response(),
    };

    TraceEvent::WebhookHandled {
        endpoint: "in_call_search".into(),
        status: response.status().as_u16(),
        duration_ms: start.elapsed().as_millis() as u64,
        request_id: ctx.request_id,
    }
    .emit();
    response
}
