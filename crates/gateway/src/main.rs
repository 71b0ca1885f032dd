use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use clap::Parser;
use sha2::{Digest, Sha256};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use mr_domain::config::{Config, ConfigSeverity};
use mr_gateway::api;
use mr_gateway::cli::{self, Cli, Command, ConfigCommand};
use mr_gateway::context::ContextAssembler;
use mr_gateway::runtime::caller_lock::CallerLockMap;
use mr_gateway::runtime::extraction::ExtractionPipeline;
use mr_gateway::runtime::payloads::PayloadStore;
use mr_gateway::runtime::profile_cache::{HttpProfileFetcher, ProfileCache};
use mr_gateway::runtime::recovery::RecoverySweeper;
use mr_gateway::runtime::scheduler::JobScheduler;
use mr_gateway::runtime::search::SearchService;
use mr_gateway::state::AppState;
use mr_llm::LlmSelector;
use mr_memstore::create_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = cli::load_config(cli.config.as_deref())?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config(cli.config.as_deref())?;
            if !cli::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config(cli.config.as_deref())?;
            cli::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("memrelay {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mr_gateway=debug")),
        )
        .json()
        .init();
}

/// Start the webhook server with the given configuration.
async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("memrelay starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Webhook HMAC secret (refuses weak keys) ──────────────────────
    let hmac_secret = Arc::new(
        config
            .load_hmac_secret()
            .context("loading webhook HMAC secret")?,
    );
    tracing::info!("webhook signature verification ready");

    // ── Memory store adapter ─────────────────────────────────────────
    let store = create_store(&config.store, &config.organization.organization_id)
        .context("creating memory store client")?;
    tracing::info!(url = %config.store.base_url, "memory store client ready");

    // ── LLM selector ─────────────────────────────────────────────────
    let llm = Arc::new(LlmSelector::from_config(&config.llm).context("initializing LLM providers")?);
    tracing::info!(
        primary = %config.llm.primary.id,
        fallback = config.llm.secondary.as_ref().map(|s| s.id.as_str()).unwrap_or("none"),
        "LLM selector ready"
    );

    // ── Agent profile cache (TTL + single-flight) ────────────────────
    let fetcher = Arc::new(HttpProfileFetcher::new(&config.profiles).context("profile fetcher")?);
    let profiles = Arc::new(ProfileCache::new(
        fetcher,
        Duration::from_secs(config.profiles.ttl_seconds),
    ));
    tracing::info!(ttl_seconds = config.profiles.ttl_seconds, "profile cache ready");

    // ── Payload archive ──────────────────────────────────────────────
    let payloads =
        Arc::new(PayloadStore::new(config.payloads.root.clone()).context("payload archive")?);
    tracing::info!(root = %config.payloads.root.display(), "payload archive ready");

    // ── Per-caller extraction locks ──────────────────────────────────
    let caller_locks = Arc::new(CallerLockMap::new());

    // ── Extraction pipeline + scheduler ──────────────────────────────
    let pipeline = Arc::new(ExtractionPipeline::new(
        store.clone(),
        llm.clone(),
        profiles.clone(),
        caller_locks.clone(),
        payloads.clone(),
        config.organization.clone(),
        config.extraction.clone(),
    ));
    let scheduler = JobScheduler::new(&config.scheduler, pipeline, payloads.clone());
    tracing::info!(
        workers = config.scheduler.worker_pool_size,
        queue_capacity = config.scheduler.queue_capacity,
        "extraction scheduler started"
    );

    // ── Recovery sweeper (startup sweep picks up everything) ─────────
    let sweeper = Arc::new(RecoverySweeper::new(
        payloads.clone(),
        scheduler.clone(),
        &config.organization.organization_id,
    ));
    match sweeper.sweep(Duration::ZERO).await {
        Ok(0) => {}
        Ok(n) => tracing::info!(resubmitted = n, "startup recovery sweep re-enqueued jobs"),
        Err(e) => tracing::warn!(error = %e, "startup recovery sweep failed"),
    }

    // ── Context assembler + search service ───────────────────────────
    let assembler = Arc::new(ContextAssembler::new(
        store.clone(),
        llm.clone(),
        profiles.clone(),
        config.context.clone(),
    ));
    let search = Arc::new(SearchService::new(store.clone(), config.search.clone()));

    // ── Admin token (read once, hashed for constant-time comparison) ─
    let admin_token_hash = match std::env::var(&config.admin.token_env) {
        Ok(token) if !token.is_empty() => {
            tracing::info!("admin bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(
                env_var = %config.admin.token_env,
                "admin endpoints DISABLED — set the admin token env var to enable"
            );
            None
        }
    };

    let state = AppState {
        config: config.clone(),
        store,
        llm,
        assembler,
        search,
        scheduler: scheduler.clone(),
        payloads,
        sweeper: sweeper.clone(),
        profiles: profiles.clone(),
        caller_locks: caller_locks.clone(),
        hmac_secret,
        admin_token_hash,
    };

    // ── Periodic recovery sweep ──────────────────────────────────────
    {
        let sweeper = sweeper.clone();
        let cadence = Duration::from_secs(config.scheduler.recovery_sweep_seconds);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cadence);
            interval.tick().await; // first tick fires immediately; skip it
            loop {
                interval.tick().await;
                match sweeper.sweep(Duration::from_secs(300)).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(resubmitted = n, "recovery sweep re-enqueued jobs"),
                    Err(e) => tracing::warn!(error = %e, "recovery sweep failed"),
                }
            }
        });
    }

    // ── Periodic lock + cache pruning, queue depth gauge ─────────────
    {
        let caller_locks = caller_locks.clone();
        let profiles = profiles.clone();
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                caller_locks.prune_idle();
                profiles.prune();
                scheduler.emit_depth();
            }
        });
    }

    // ── Router + layers ──────────────────────────────────────────────
    let cors_layer = build_cors_layer(&config.server.cors.allowed_origins);
    let mut app = api::router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            config.server.max_concurrent_requests,
        ));

    if let Some(rl) = &config.server.rate_limit {
        use tower_governor::governor::GovernorConfigBuilder;
        use tower_governor::GovernorLayer;

        let gov_config = GovernorConfigBuilder::default()
            .per_second(rl.requests_per_second)
            .burst_size(rl.burst_size)
            .finish()
            .context("rate_limit: requests_per_second and burst_size must be > 0")?;
        tracing::info!(
            requests_per_second = rl.requests_per_second,
            burst_size = rl.burst_size,
            "per-IP rate limiting enabled"
        );
        app = app.layer(GovernorLayer {
            config: Arc::new(gov_config),
        });
    }

    let app = app.with_state(state);

    // ── Bind & serve with graceful shutdown ──────────────────────────
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "memrelay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server error")?;

    // Drain in-flight extraction jobs inside the grace window; anything
    // still queued survives restart through its state file.
    tracing::info!("shutting down, draining extraction workers");
    scheduler
        .shutdown(Duration::from_secs(config.scheduler.shutdown_grace_seconds))
        .await;
    tracing::info!("memrelay stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Webhook callers are servers, not browsers; CORS stays closed unless
/// origins are explicitly configured.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(hv) => Some(hv),
            Err(_) => {
                tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
}
