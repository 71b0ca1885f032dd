//! memrelay configuration.
//!
//! Deserialized from a TOML file; every field has a serde default so a
//! minimal config (or none at all) still yields a runnable dev setup.
//! Secrets are never stored in the file — config names the environment
//! variables they are read from, once, at startup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub organization: OrganizationConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub profiles: ProfileApiConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub payloads: PayloadConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Hard cap on inbound webhook body size, enforced before signature work.
    #[serde(default = "d_max_body")]
    pub max_body_bytes: usize,
    #[serde(default = "d_max_concurrent")]
    pub max_concurrent_requests: usize,
    /// Per-IP rate limiting. `None` disables the governor layer.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            max_body_bytes: d_max_body(),
            max_concurrent_requests: d_max_concurrent(),
            rate_limit: None,
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u64,
    pub burst_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Webhook callers are servers, so this
    /// defaults to empty (no browser access).
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Organization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The isolation boundary every caller, conversation and memory belongs to.
/// memrelay serves one organization per process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationConfig {
    #[serde(default = "d_org_id")]
    pub organization_id: String,
    /// Environment variable holding the webhook HMAC secret (≥ 32 bytes).
    #[serde(default = "d_hmac_env")]
    pub hmac_secret_env: String,
    /// Maximum allowed |now − t| for signature timestamps, in seconds.
    #[serde(default = "d_skew")]
    pub signature_skew_seconds: i64,
    /// Memories at or above this importance are visible to every agent
    /// in the organization.
    #[serde(default = "d_share_threshold")]
    pub share_threshold: u8,
    /// Similarity score at or above which a candidate reinforces an
    /// existing memory instead of being stored.
    #[serde(default = "d_similarity")]
    pub similarity_threshold: f32,
    /// Similarity score at or above which differing factual/preference
    /// content is flagged as a conflict rather than stored silently.
    #[serde(default = "d_conflict")]
    pub conflict_threshold: f32,
}

impl Default for OrganizationConfig {
    fn default() -> Self {
        Self {
            organization_id: d_org_id(),
            hmac_secret_env: d_hmac_env(),
            signature_skew_seconds: d_skew(),
            share_threshold: d_share_threshold(),
            similarity_threshold: d_similarity(),
            conflict_threshold: d_conflict(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Memory store connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "d_store_url")]
    pub base_url: String,
    /// Environment variable holding the store API key, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "d_store_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "d_3")]
    pub max_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: d_store_url(),
            api_key_env: None,
            timeout_ms: d_store_timeout_ms(),
            max_retries: d_3(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Primary provider, always tried first.
    #[serde(default = "d_primary")]
    pub primary: LlmProviderConfig,
    /// Optional fallback, used on transient primary failure only.
    #[serde(default)]
    pub secondary: Option<LlmProviderConfig>,
    #[serde(default = "d_llm_timeout")]
    pub call_timeout_seconds: u64,
    /// Input-token ceiling per extraction chunk.
    #[serde(default = "d_extract_input_tokens")]
    pub extract_max_input_tokens: usize,
    /// Output-token ceiling for first-message summarization.
    #[serde(default = "d_summary_output_tokens")]
    pub summary_max_output_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary: d_primary(),
            secondary: None,
            call_timeout_seconds: d_llm_timeout(),
            extract_max_input_tokens: d_extract_input_tokens(),
            summary_max_output_tokens: d_summary_output_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    pub id: String,
    pub kind: LlmProviderKind,
    pub base_url: String,
    /// Environment variable holding the provider API key.
    pub api_key_env: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProviderKind {
    OpenaiCompat,
    Anthropic,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent profile API
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileApiConfig {
    #[serde(default = "d_profile_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "d_profile_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "d_profile_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ProfileApiConfig {
    fn default() -> Self {
        Self {
            base_url: d_profile_url(),
            api_key_env: None,
            ttl_seconds: d_profile_ttl(),
            timeout_ms: d_profile_timeout_ms(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pre-call context assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Most-recent memories fetched for the (caller, agent) pair.
    #[serde(default = "d_recent")]
    pub recent_memories: usize,
    /// Cap on merged memories in one context envelope.
    #[serde(default = "d_context_max")]
    pub max_memories: usize,
    /// Whole-envelope token budget; lowest-importance entries drop first.
    #[serde(default = "d_token_budget")]
    pub token_budget: usize,
    #[serde(default = "d_pre_call_deadline")]
    pub pre_call_deadline_ms: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            recent_memories: d_recent(),
            max_memories: d_context_max(),
            token_budget: d_token_budget(),
            pre_call_deadline_ms: d_pre_call_deadline(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-call search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "d_search_deadline")]
    pub deadline_ms: u64,
    #[serde(default = "d_5")]
    pub default_limit: usize,
    #[serde(default = "d_min_score")]
    pub default_min_score: f32,
    #[serde(default = "d_query_chars")]
    pub max_query_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            deadline_ms: d_search_deadline(),
            default_limit: d_5(),
            default_min_score: d_min_score(),
            max_query_chars: d_query_chars(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Extraction pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Transcript window size; chunks split on turn boundaries under this.
    #[serde(default = "d_chunk_tokens")]
    pub chunk_tokens: usize,
    /// Concurrent chunk extractions per job (provider rate-limit headroom).
    #[serde(default = "d_parallelism")]
    pub parallelism: usize,
    /// Candidates longer than this are dropped during normalization.
    #[serde(default = "d_content_chars")]
    pub max_content_chars: usize,
    /// Confidence assigned when the extractor omits one.
    #[serde(default = "d_confidence")]
    pub default_confidence: f32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: d_chunk_tokens(),
            parallelism: d_parallelism(),
            max_content_chars: d_content_chars(),
            default_confidence: d_confidence(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job scheduler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "d_workers")]
    pub worker_pool_size: usize,
    #[serde(default = "d_queue_capacity")]
    pub queue_capacity: usize,
    /// Per-attempt retry delays. Length bounds the attempt count.
    #[serde(default = "d_retry_delays")]
    pub retry_delays_seconds: Vec<u64>,
    #[serde(default = "d_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
    /// Cadence of the deferred-payload recovery sweep.
    #[serde(default = "d_sweep")]
    pub recovery_sweep_seconds: u64,
    #[serde(default = "d_ack_deadline")]
    pub post_call_ack_deadline_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: d_workers(),
            queue_capacity: d_queue_capacity(),
            retry_delays_seconds: d_retry_delays(),
            shutdown_grace_seconds: d_shutdown_grace(),
            recovery_sweep_seconds: d_sweep(),
            post_call_ack_deadline_ms: d_ack_deadline(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload archive
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadConfig {
    /// Root directory of the on-disk payload archive.
    #[serde(default = "d_payload_root")]
    pub root: PathBuf,
}

impl Default for PayloadConfig {
    fn default() -> Self {
        Self {
            root: d_payload_root(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Admin
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Environment variable holding the admin bearer token.
    /// If the env var is unset, admin endpoints are disabled.
    #[serde(default = "d_admin_token_env")]
    pub token_env: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            token_env: d_admin_token_env(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good. Startup aborts on
    /// any `Error`-severity issue.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        fn error(issues: &mut Vec<ConfigIssue>, field: &str, message: String) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message,
            });
        }
        fn warn(issues: &mut Vec<ConfigIssue>, field: &str, message: String) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: field.into(),
                message,
            });
        }

        let mut issues = Vec::new();

        if self.server.port == 0 {
            error(&mut issues, "server.port", "port must be greater than 0".into());
        }
        if self.server.host.is_empty() {
            error(&mut issues, "server.host", "host must not be empty".into());
        }
        if self.server.max_body_bytes == 0 {
            error(&mut issues, "server.max_body_bytes", "body cap must be non-zero".into());
        }

        if self.organization.organization_id.is_empty() {
            error(
                &mut issues,
                "organization.organization_id",
                "organization id must not be empty".into(),
            );
        }
        if self.organization.signature_skew_seconds <= 0 {
            error(
                &mut issues,
                "organization.signature_skew_seconds",
                "skew window must be positive".into(),
            );
        }
        if !(1..=10).contains(&self.organization.share_threshold) {
            error(
                &mut issues,
                "organization.share_threshold",
                format!(
                    "share threshold must be in 1..=10 (got {})",
                    self.organization.share_threshold
                ),
            );
        }
        for (field, value) in [
            (
                "organization.similarity_threshold",
                self.organization.similarity_threshold,
            ),
            (
                "organization.conflict_threshold",
                self.organization.conflict_threshold,
            ),
            ("search.default_min_score", self.search.default_min_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                error(&mut issues, field, format!("score threshold must be in [0, 1] (got {value})"));
            }
        }
        if self.organization.conflict_threshold > self.organization.similarity_threshold {
            warn(
                &mut issues,
                "organization.conflict_threshold",
                "conflict threshold above similarity threshold makes conflicts unreachable".into(),
            );
        }

        for (field, url) in [
            ("store.base_url", &self.store.base_url),
            ("llm.primary.base_url", &self.llm.primary.base_url),
            ("profiles.base_url", &self.profiles.base_url),
        ] {
            if url.is_empty() {
                error(&mut issues, field, "base_url must not be empty".into());
            } else if !url.starts_with("http://") && !url.starts_with("https://") {
                error(
                    &mut issues,
                    field,
                    format!("base_url must start with http:// or https:// (got \"{url}\")"),
                );
            }
        }
        if self.llm.secondary.is_none() {
            warn(
                &mut issues,
                "llm.secondary",
                "no fallback provider configured — transient LLM failures will surface".into(),
            );
        }

        if self.scheduler.worker_pool_size == 0 {
            error(&mut issues, "scheduler.worker_pool_size", "worker pool must be non-empty".into());
        }
        if self.scheduler.queue_capacity == 0 {
            error(&mut issues, "scheduler.queue_capacity", "queue capacity must be non-zero".into());
        }
        if self.scheduler.retry_delays_seconds.is_empty() {
            error(
                &mut issues,
                "scheduler.retry_delays_seconds",
                "at least one retry delay is required".into(),
            );
        }

        if self.extraction.chunk_tokens == 0 {
            error(&mut issues, "extraction.chunk_tokens", "chunk size must be non-zero".into());
        }
        if self.extraction.parallelism == 0 {
            error(&mut issues, "extraction.parallelism", "parallelism must be non-zero".into());
        }

        if self.context.max_memories == 0 {
            error(&mut issues, "context.max_memories", "context cap must be non-zero".into());
        }

        issues
    }

    /// Read and validate the webhook HMAC secret from the configured env var.
    ///
    /// Secrets shorter than 32 bytes are rejected — the process must refuse
    /// to start rather than verify signatures against weak keys.
    pub fn load_hmac_secret(&self) -> crate::error::Result<Vec<u8>> {
        let env_var = &self.organization.hmac_secret_env;
        let secret = std::env::var(env_var).map_err(|_| {
            crate::error::Error::Config(format!("{env_var} is not set — webhook auth requires it"))
        })?;
        if secret.len() < 32 {
            return Err(crate::error::Error::Config(format!(
                "{env_var} must be at least 32 bytes (got {})",
                secret.len()
            )));
        }
        Ok(secret.into_bytes())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// serde default helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_port() -> u16 {
    3400
}
fn d_max_body() -> usize {
    4 * 1024 * 1024
}
fn d_max_concurrent() -> usize {
    256
}
fn d_org_id() -> String {
    "default".into()
}
fn d_hmac_env() -> String {
    "MEMRELAY_HMAC_SECRET".into()
}
fn d_skew() -> i64 {
    1800
}
fn d_share_threshold() -> u8 {
    8
}
fn d_similarity() -> f32 {
    0.85
}
fn d_conflict() -> f32 {
    0.70
}
fn d_store_url() -> String {
    "http://127.0.0.1:8900".into()
}
fn d_store_timeout_ms() -> u64 {
    10_000
}
fn d_3() -> u32 {
    3
}
fn d_primary() -> LlmProviderConfig {
    LlmProviderConfig {
        id: "primary".into(),
        kind: LlmProviderKind::OpenaiCompat,
        base_url: "https://api.openai.com".into(),
        api_key_env: "MEMRELAY_LLM_PRIMARY_KEY".into(),
        model: "gpt-4o-mini".into(),
    }
}
fn d_llm_timeout() -> u64 {
    30
}
fn d_extract_input_tokens() -> usize {
    10_000
}
fn d_summary_output_tokens() -> u32 {
    2_000
}
fn d_profile_url() -> String {
    "http://127.0.0.1:8910".into()
}
fn d_profile_ttl() -> u64 {
    86_400
}
fn d_profile_timeout_ms() -> u64 {
    5_000
}
fn d_recent() -> usize {
    10
}
fn d_context_max() -> usize {
    20
}
fn d_token_budget() -> usize {
    2_000
}
fn d_pre_call_deadline() -> u64 {
    2_000
}
fn d_search_deadline() -> u64 {
    3_000
}
fn d_5() -> usize {
    5
}
fn d_min_score() -> f32 {
    0.70
}
fn d_query_chars() -> usize {
    1_000
}
fn d_chunk_tokens() -> usize {
    8_000
}
fn d_parallelism() -> usize {
    3
}
fn d_content_chars() -> usize {
    10_000
}
fn d_confidence() -> f32 {
    0.7
}
fn d_workers() -> usize {
    10
}
fn d_queue_capacity() -> usize {
    1_000
}
fn d_retry_delays() -> Vec<u64> {
    vec![60, 300, 1_800]
}
fn d_shutdown_grace() -> u64 {
    30
}
fn d_sweep() -> u64 {
    60
}
fn d_ack_deadline() -> u64 {
    1_000
}
fn d_payload_root() -> PathBuf {
    PathBuf::from("./data/payloads")
}
fn d_admin_token_env() -> String {
    "MEMRELAY_ADMIN_TOKEN".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_working_defaults() {
        let cfg: Config = toml::from_str("").expect("defaults");
        assert_eq!(cfg.server.port, 3400);
        assert_eq!(cfg.organization.share_threshold, 8);
        assert!((cfg.organization.similarity_threshold - 0.85).abs() < f32::EPSILON);
        assert_eq!(cfg.scheduler.retry_delays_seconds, vec![60, 300, 1_800]);
        assert_eq!(cfg.context.token_budget, 2_000);
        assert!(cfg.validate().iter().all(|i| i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn share_threshold_out_of_range_is_an_error() {
        let cfg: Config = toml::from_str("[organization]\nshare_threshold = 11\n").unwrap();
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error
                && i.field == "organization.share_threshold"));
    }

    #[test]
    fn zero_workers_is_an_error() {
        let cfg: Config = toml::from_str("[scheduler]\nworker_pool_size = 0\n").unwrap();
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.field == "scheduler.worker_pool_size"));
    }

    #[test]
    fn conflict_above_similarity_warns() {
        let cfg: Config =
            toml::from_str("[organization]\nconflict_threshold = 0.9\nsimilarity_threshold = 0.8\n")
                .unwrap();
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Warning
                && i.field == "organization.conflict_threshold"));
    }
}
