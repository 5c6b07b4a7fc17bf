//! HTTP server for the wafer yield dashboard.
//!
//! Features:
//! - Single-record and batch prediction over JSON/CSV
//! - CSV export of full results or the ranking view
//! - Report catalog and artifact serving
//! - Hot reload of the classifier without dropping in-flight requests
//! - Per-IP rate limiting with LRU eviction past 10k entries
//! - JSONL access logging with size-based rotation
//! - Structured logging via [`tracing`]

pub mod handlers;
pub mod logging;
pub mod middleware;
pub mod types;

pub use handlers::MAX_BODY_BYTES;
pub use logging::{RecordEvent, UsageMetrics, METRICS_PERSIST_INTERVAL_SECS};
pub use types::{
    AuthMethod, BatchResponse, ErrorResponse, ExportView, HealthResponse, PredictRequest,
    PredictResponse, ReloadResponse, ReportsResponse, SchemaResponse, ServerConfig, StatsResponse,
    DEFAULT_CACHE_DIR,
};

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::middleware as axum_mw;
use axum::routing::{get, post};
use axum::Router;
use eyre::{Result, WrapErr};
use lru::LruCache;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::Pipeline;

// ---------------------------------------------------------------------------
// Server state
// ---------------------------------------------------------------------------

/// The active pipeline, or why there is none.
#[derive(Default)]
struct PipelineSlot {
    current: Option<Arc<Pipeline>>,
    last_error: Option<String>,
}

pub struct ServerState {
    pub config: ServerConfig,
    pub pipeline_config: PipelineConfig,
    pipeline: RwLock<PipelineSlot>,
    pub start_time: Instant,
    pub rate_limiters: Mutex<LruCache<IpAddr, Arc<middleware::IpRateLimiter>>>,
    pub usage: UsageMetrics,
}

impl ServerState {
    /// Build state and try to load the pipeline. A missing classifier leaves
    /// the server up in a degraded mode where reports and schema still work.
    pub fn new(config: ServerConfig, pipeline_config: PipelineConfig) -> Self {
        let usage = UsageMetrics::new(
            &config.access_log_path,
            config.max_access_log_bytes,
            &config.cache_dir,
        );

        let slot = match Pipeline::load(pipeline_config.clone()) {
            Ok(p) => PipelineSlot {
                current: Some(Arc::new(p)),
                last_error: None,
            },
            Err(e) => {
                warn!(error = %e, "starting without a classifier; prediction endpoints disabled");
                PipelineSlot {
                    current: None,
                    last_error: Some(e.to_string()),
                }
            }
        };

        Self {
            config,
            pipeline_config,
            pipeline: RwLock::new(slot),
            start_time: Instant::now(),
            rate_limiters: middleware::new_rate_limiter_cache(),
            usage,
        }
    }

    /// The pipeline requests should use. The lock is released on return, so
    /// a concurrent reload never blocks on a running prediction.
    pub fn current_pipeline(&self) -> Option<Arc<Pipeline>> {
        let slot = self.pipeline.read().unwrap_or_else(|e| e.into_inner());
        slot.current.clone()
    }

    /// Why no pipeline is loaded, if that is the case.
    pub fn load_error(&self) -> Option<String> {
        let slot = self.pipeline.read().unwrap_or_else(|e| e.into_inner());
        slot.last_error.clone()
    }

    /// Build a fresh pipeline from disk and swap it in.
    ///
    /// On failure the current pipeline stays in place.
    pub fn reload(&self) -> std::result::Result<Arc<Pipeline>, PipelineError> {
        let fresh = match Pipeline::load(self.pipeline_config.clone()) {
            Ok(p) => Arc::new(p),
            Err(e) => {
                let mut slot = self.pipeline.write().unwrap_or_else(|e| e.into_inner());
                if slot.current.is_none() {
                    slot.last_error = Some(e.to_string());
                }
                return Err(e);
            }
        };

        let mut slot = self.pipeline.write().unwrap_or_else(|e| e.into_inner());
        slot.current = Some(Arc::clone(&fresh));
        slot.last_error = None;
        Ok(fresh)
    }
}

// ---------------------------------------------------------------------------
// HTTP server
// ---------------------------------------------------------------------------

/// Assemble the router. Must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()` for rate limiting.
pub fn build_router(state: Arc<ServerState>) -> Router {
    let protected = Router::new()
        .route("/api/v1/reload", post(handlers::reload_handler))
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let api_routes = Router::new()
        .route("/api/v1/schema", get(handlers::schema_handler))
        .route("/api/v1/predict", post(handlers::predict_handler))
        .route("/api/v1/batch", post(handlers::batch_handler))
        .route("/api/v1/batch/export", post(handlers::export_handler))
        .route("/api/v1/reports", get(handlers::reports_handler))
        .route("/reports/{file}", get(handlers::report_file_handler))
        .merge(protected)
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::rate_limit_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(crate::ui::index_handler))
        .route("/health", get(handlers::health_handler))
        .route("/stats", get(handlers::stats_handler))
        .merge(api_routes)
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Run the HTTP server until SIGINT/SIGTERM.
pub async fn run_server(config: ServerConfig, pipeline_config: PipelineConfig) -> Result<()> {
    let rate_limit_rpm = config.rate_limit_rpm;
    let bind_addr = config.bind_addr;
    let access_log = config.access_log_path.clone();
    let auth_enabled = config.api_key.is_some();
    let state = Arc::new(ServerState::new(config, pipeline_config));
    let app = build_router(state.clone());

    // Spawn background task to persist metrics to disk periodically
    let metrics_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(
            METRICS_PERSIST_INTERVAL_SECS,
        ));
        loop {
            interval.tick().await;
            metrics_state.usage.persist_to_disk();
        }
    });

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .wrap_err_with(|| format!("failed to bind {bind_addr}"))?;
    info!(bind = %bind_addr, "wafer yield dashboard listening");
    info!("Endpoints: GET / (UI), GET /health, GET /stats, GET /api/v1/schema, POST /api/v1/predict, POST /api/v1/batch, POST /api/v1/batch/export, GET /api/v1/reports, GET /reports/{{file}}, POST /api/v1/reload");
    if rate_limit_rpm > 0 {
        info!(rate_limit_rpm, "rate limiting enabled");
    } else {
        info!("rate limiting disabled");
    }
    if !auth_enabled {
        warn!("no API key configured; /api/v1/reload is open");
    }
    info!(access_log = %access_log);

    // Graceful shutdown on SIGTERM/SIGINT
    let shutdown_state = state;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        // Persist metrics before exiting
        shutdown_state.usage.persist_to_disk();
    })
    .await
    .wrap_err("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down gracefully"),
        _ = sigterm => info!("received SIGTERM, shutting down gracefully"),
    }
}
