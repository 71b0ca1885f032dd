//! Webhook dispatcher — routing, authentication, and the uniform
//! response envelope.
//!
//! Every webhook request passes through [`verify_webhook`] first: body
//! size cap, content-type check, HMAC signature verification, and
//! correlation-id assignment, in that order. Handlers parse the buffered
//! body themselves so schema violations produce the same
//! `{error: {kind, message, request_id}}` envelope as every other
//! failure. Admin routes use bearer-token auth instead of HMAC.

pub mod admin;
pub mod post_call;
pub mod pre_call;
pub mod search;
pub mod signature;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use uuid::Uuid;

use mr_domain::error::Error;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request context & error envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-request correlation context, assigned by the verification
/// middleware and threaded through every log line and response.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// A domain error bound to its request, rendered as the uniform error
/// envelope with the status the error kind maps to.
pub struct ApiError {
    pub error: Error,
    pub request_id: String,
}

impl ApiError {
    pub fn new(error: Error, request_id: impl Into<String>) -> Self {
        Self {
            error,
            request_id: request_id.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        // Internal details stay in the logs; the caller gets the kind.
        let message = match &self.error {
            Error::Internal(_) | Error::Io(_) | Error::Json(_) | Error::Config(_) => {
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        (
            status,
            Json(serde_json::json!({
                "error": {
                    "kind": self.error.kind(),
                    "message": message,
                    "request_id": self.request_id,
                }
            })),
        )
            .into_response()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the full API router.
///
/// Routes are split into **public** (health probe), **webhook**
/// (HMAC-verified), and **admin** (bearer-token).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/health", get(admin::health));

    let webhooks = Router::new()
        .route("/v1/webhooks/pre-call", post(pre_call::pre_call))
        .route("/v1/webhooks/search", post(search::in_call_search))
        .route("/v1/webhooks/post-call", post(post_call::post_call))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            verify_webhook,
        ));

    let admin_routes = Router::new()
        .route("/v1/admin/recovery/sweep", post(admin::trigger_sweep))
        .route("/v1/admin/callers/:caller_id", delete(admin::erase_caller))
        .route(
            "/v1/admin/conversations/:conversation_id/extraction",
            get(admin::extraction_state),
        )
        .layer(middleware::from_fn_with_state(
            state,
            admin::require_admin_token,
        ));

    public.merge(webhooks).merge(admin_routes)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Webhook verification middleware
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Buffer, bound, and authenticate the raw request before any handler
/// sees it. Rejections never reach handler code: 413 for oversized
/// bodies, 400 for a wrong content type, 401 for every signature
/// failure kind.
pub async fn verify_webhook(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let (mut parts, body) = req.into_parts();

    let content_type = parts
        .headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.starts_with("application/json") {
        return ApiError::new(
            Error::PayloadSchema("content-type must be application/json".into()),
            request_id,
        )
        .into_response();
    }

    let limit = state.config.server.max_body_bytes;
    let bytes = match axum::body::to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError::new(Error::PayloadTooLarge { limit_bytes: limit }, request_id)
                .into_response();
        }
    };

    let signature_header = parts
        .headers
        .get("webhook-signature")
        .and_then(|v| v.to_str().ok());

    if let Err(e) = signature::verify(
        &bytes,
        signature_header,
        &state.hmac_secret,
        Utc::now(),
        state.config.organization.signature_skew_seconds,
    ) {
        tracing::info!(
            request_id = %request_id,
            organization_id = %state.config.organization.organization_id,
            path = %parts.uri.path(),
            kind = e.kind(),
            "webhook signature rejected"
        );
        return ApiError::new(e, request_id).into_response();
    }

    parts.extensions.insert(RequestContext { request_id });
    let req = Request::from_parts(parts, Body::from(bytes));
    next.run(req).await
}
