use serde::Serialize;

/// Structured trace events emitted across all memrelay crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    WebhookHandled {
        endpoint: String,
        status: u16,
        duration_ms: u64,
        request_id: String,
    },
    StoreCall {
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
    LlmRequest {
        provider: String,
        model: String,
        operation: String,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmFallback {
        from_provider: String,
        to_provider: String,
        reason: String,
    },
    ProfileFetched {
        agent_id: String,
        cache_hit: bool,
        served_stale: bool,
    },
    ContextAssembled {
        caller_id: Option<String>,
        agent_id: String,
        memories: usize,
        estimated_tokens: usize,
        degraded: bool,
        duration_ms: u64,
    },
    ExtractionFinished {
        conversation_id: String,
        chunks_total: usize,
        chunks_failed: usize,
        stored: usize,
        reinforced: usize,
        conflicts: usize,
        duration_ms: u64,
    },
    JobRetryScheduled {
        conversation_id: String,
        attempt: u32,
        delay_seconds: u64,
    },
    QueueDepth {
        depth: usize,
        capacity: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "mr_event");
    }
}
