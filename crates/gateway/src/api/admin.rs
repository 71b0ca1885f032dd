//! Operational endpoints — health probe and admin actions.
//!
//! `GET /v1/health` is public and carries the operational gauges (queue
//! depth, worker occupancy, cache sizes, store reachability). Admin
//! routes require `Authorization: Bearer <token>` matched against the
//! env var named in config; with no token configured the routes are
//! disabled outright.

use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use mr_domain::error::Error;

use crate::api::ApiError;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth middleware
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bearer-token gate for admin routes. The expected token's SHA-256 is
/// computed once at startup; comparison hashes the presented token to a
/// fixed length first so equality is constant-time and length-blind.
/// Rejections carry the same `{error: {kind, message, request_id}}`
/// envelope as every other failure.
pub async fn require_admin_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected_hash) = &state.admin_token_hash else {
        return ApiError::new(
            Error::Forbidden("admin endpoints are disabled (no admin token configured)".into()),
            Uuid::new_v4().to_string(),
        )
        .into_response();
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");
    let provided_hash = Sha256::digest(provided.as_bytes());

    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return ApiError::new(
            Error::Unauthorized("invalid or missing admin token".into()),
            Uuid::new_v4().to_string(),
        )
        .into_response();
    }

    next.run(req).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/health
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    // A hung store must not hang the probe.
    let store_reachable = matches!(
        tokio::time::timeout(Duration::from_secs(2), state.store.health()).await,
        Ok(Ok(_))
    );

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "queue": {
            "depth": state.scheduler.queue_depth(),
            "capacity": state.scheduler.queue_capacity(),
        },
        "workers": {
            "active": state.scheduler.active_workers(),
            "pool_size": state.config.scheduler.worker_pool_size,
        },
        "profiles_cached": state.profiles.len(),
        "callers_locked": state.caller_locks.caller_count(),
        "store_reachable": store_reachable,
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin actions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `POST /v1/admin/recovery/sweep` — run the deferred-payload sweep now.
pub async fn trigger_sweep(State(state): State<AppState>) -> Response {
    let request_id = Uuid::new_v4().to_string();
    match state.sweeper.sweep(Duration::from_secs(300)).await {
        Ok(resubmitted) => Json(serde_json::json!({
            "request_id": request_id,
            "data": { "resubmitted": resubmitted }
        }))
        .into_response(),
        Err(e) => ApiError::new(e, request_id).into_response(),
    }
}

/// `DELETE /v1/admin/callers/:caller_id` — privacy erasure. Removes the
/// caller's memories from the store and their payload directories from
/// the archive.
pub async fn erase_caller(
    State(state): State<AppState>,
    Path(caller_id): Path<String>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    tracing::info!(
        request_id = %request_id,
        organization_id = %state.config.organization.organization_id,
        caller_id = %caller_id,
        "privacy erasure requested"
    );

    let memories_deleted = match state.store.delete_by_caller(&caller_id).await {
        Ok(n) => n,
        Err(e) => return ApiError::new(e, request_id).into_response(),
    };
    let payload_dirs_removed = match state.payloads.erase_caller(&caller_id).await {
        Ok(n) => n,
        Err(e) => return ApiError::new(e, request_id).into_response(),
    };

    Json(serde_json::json!({
        "request_id": request_id,
        "data": {
            "caller_id": caller_id,
            "memories_deleted": memories_deleted,
            "payload_dirs_removed": payload_dirs_removed,
        }
    }))
    .into_response()
}

/// `GET /v1/admin/conversations/:conversation_id/extraction` — read the
/// persisted extraction state for debugging.
pub async fn extraction_state(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    match state.payloads.read_state(&conversation_id).await {
        Ok(Some(extraction)) => Json(serde_json::json!({
            "request_id": request_id,
            "data": extraction,
        }))
        .into_response(),
        Ok(None) => ApiError::new(
            Error::NotFound("no extraction state for that conversation".into()),
            request_id,
        )
        .into_response(),
        Err(e) => ApiError::new(Error::Internal(e.to_string()), request_id).into_response(),
    }
}
