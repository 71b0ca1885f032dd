/// Shared error type used across all memrelay crates.
///
/// Every variant maps to a stable, enumerable kind string that is surfaced
/// verbatim in webhook error envelopes, plus an HTTP status for the
/// dispatcher. Keep the kind strings frozen — external callers match on them.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // ── Signature verification ────────────────────────────────────────
    #[error("webhook-signature header missing")]
    SignatureMissing,

    #[error("webhook-signature header malformed: {0}")]
    SignatureMalformed(String),

    #[error("signature timestamp outside skew window ({age_seconds}s old)")]
    SignatureStale { age_seconds: i64 },

    #[error("signature digest mismatch")]
    SignatureMismatch,

    // ── Admin auth & resources ────────────────────────────────────────
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    // ── Request validation ────────────────────────────────────────────
    #[error("payload schema: {0}")]
    PayloadSchema(String),

    #[error("payload exceeds {limit_bytes} bytes")]
    PayloadTooLarge { limit_bytes: usize },

    // ── Deadlines & upstreams ─────────────────────────────────────────
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream rate limited: {0}")]
    UpstreamRateLimited(String),

    #[error("LLM output failed schema validation: {0}")]
    InvalidLlmOutput(String),

    #[error("memory store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("memory store conflict: {0}")]
    StoreConflict(String),

    #[error("agent profile unavailable: {0}")]
    ProfileUnavailable(String),

    // ── Scheduling ────────────────────────────────────────────────────
    #[error("extraction queue full")]
    QueueOverflow,

    // ── Process-internal ──────────────────────────────────────────────
    #[error("config: {0}")]
    Config(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The stable wire kind, surfaced in `{error: {kind, ...}}` envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::SignatureMissing => "SignatureMissing",
            Error::SignatureMalformed(_) => "SignatureMalformed",
            Error::SignatureStale { .. } => "SignatureStale",
            Error::SignatureMismatch => "SignatureMismatch",
            Error::Unauthorized(_) => "Unauthorized",
            Error::Forbidden(_) => "Forbidden",
            Error::NotFound(_) => "NotFound",
            Error::PayloadSchema(_) => "PayloadSchema",
            Error::PayloadTooLarge { .. } => "PayloadTooLarge",
            Error::DeadlineExceeded(_) => "DeadlineExceeded",
            Error::UpstreamUnavailable(_) => "UpstreamUnavailable",
            Error::UpstreamRateLimited(_) => "UpstreamRateLimited",
            Error::InvalidLlmOutput(_) => "InvalidLLMOutput",
            Error::StoreUnavailable(_) => "StoreUnavailable",
            Error::StoreConflict(_) => "StoreConflict",
            Error::ProfileUnavailable(_) => "ProfileUnavailable",
            Error::QueueOverflow => "QueueOverflow",
            Error::Config(_) | Error::Io(_) | Error::Json(_) | Error::Internal(_) => "Internal",
        }
    }

    /// HTTP status the dispatcher maps this error to.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::SignatureMissing
            | Error::SignatureMalformed(_)
            | Error::SignatureStale { .. }
            | Error::SignatureMismatch
            | Error::Unauthorized(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::PayloadSchema(_) => 400,
            Error::PayloadTooLarge { .. } => 413,
            Error::UpstreamRateLimited(_) => 429,
            Error::DeadlineExceeded(_)
            | Error::UpstreamUnavailable(_)
            | Error::StoreUnavailable(_)
            | Error::ProfileUnavailable(_)
            | Error::QueueOverflow => 503,
            Error::InvalidLlmOutput(_)
            | Error::StoreConflict(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Internal(_) => 500,
        }
    }

    /// Whether a retry can reasonably succeed.
    ///
    /// Transient: timeouts, 5xx-shaped upstream failures, rate limits.
    /// Deterministic: schema violations, size caps, malformed LLM output —
    /// retrying replays the same failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::DeadlineExceeded(_)
                | Error::UpstreamUnavailable(_)
                | Error::UpstreamRateLimited(_)
                | Error::StoreUnavailable(_)
                | Error::ProfileUnavailable(_)
        )
    }
}
