use std::sync::Arc;

use mr_domain::config::Config;
use mr_llm::LlmSelector;
use mr_memstore::MemoryStore;

use crate::context::ContextAssembler;
use crate::runtime::caller_lock::CallerLockMap;
use crate::runtime::payloads::PayloadStore;
use crate::runtime::profile_cache::ProfileCache;
use crate::runtime::recovery::RecoverySweeper;
use crate::runtime::scheduler::JobScheduler;
use crate::runtime::search::SearchService;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Core services** — config, store adapter, LLM selector
/// - **Webhook paths** — context assembler, search service
/// - **Background work** — scheduler, payload archive, recovery sweeper
/// - **Shared structures** — profile cache, per-caller locks
/// - **Security (startup-computed)** — HMAC secret, admin token hash
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Arc<dyn MemoryStore>,
    pub llm: Arc<LlmSelector>,

    // ── Webhook paths ─────────────────────────────────────────────────
    pub assembler: Arc<ContextAssembler>,
    pub search: Arc<SearchService>,

    // ── Background work ───────────────────────────────────────────────
    pub scheduler: Arc<JobScheduler>,
    pub payloads: Arc<PayloadStore>,
    pub sweeper: Arc<RecoverySweeper>,

    // ── Shared structures ─────────────────────────────────────────────
    pub profiles: Arc<ProfileCache>,
    pub caller_locks: Arc<CallerLockMap>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// Webhook HMAC secret, validated ≥ 32 bytes at startup.
    pub hmac_secret: Arc<Vec<u8>>,
    /// SHA-256 hash of the admin bearer token. `None` = admin disabled.
    pub admin_token_hash: Option<Vec<u8>>,
}
