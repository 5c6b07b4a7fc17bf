//! HTTP endpoint handler functions.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::{JsonRejection, StringRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{info, warn};

use crate::align::SINGLE_RECORD_NOTICE;
use crate::error::PipelineError;
use crate::export::{FULL_EXPORT_FILE_NAME, RANKED_EXPORT_FILE_NAME};
use crate::pipeline::{BatchOutcome, Pipeline};
use crate::ranking::RankingConfig;
use crate::reports::ReportCatalog;
use crate::schema::load_schema;

use super::logging::RecordEvent;
use super::types::*;
use super::ServerState;

/// Maximum request body size in bytes (16 MB). Batch uploads are CSV text.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Error envelope
// ---------------------------------------------------------------------------

/// A failed request, rendered as [`ErrorResponse`].
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>, start: Instant) -> Self {
        Self {
            status,
            body: ErrorResponse {
                success: false,
                error: error.into(),
                missing_fields: Vec::new(),
                processing_time_ms: start.elapsed().as_millis() as u64,
            },
        }
    }

    fn from_pipeline(err: PipelineError, start: Instant) -> Self {
        let status = match &err {
            e if e.is_user_error() => StatusCode::BAD_REQUEST,
            PipelineError::ArtifactMissing { .. } | PipelineError::ArtifactInvalid { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(error = %err, "prediction failed");
        }
        let mut api = Self::new(status, err.to_string(), start);
        if let PipelineError::SchemaMismatch { missing } = err {
            api.body.missing_fields = missing;
        }
        api
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Fetch the active pipeline or explain why there is none.
fn require_pipeline(state: &ServerState, start: Instant) -> ApiResult<Arc<Pipeline>> {
    state.current_pipeline().ok_or_else(|| {
        state.usage.record_error();
        let reason = state
            .load_error()
            .unwrap_or_else(|| "classifier not loaded".to_string());
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Prediction unavailable: {reason}"),
            start,
        )
    })
}

fn ranking_for(pipeline: &Pipeline, top_n: Option<usize>) -> RankingConfig {
    let mut ranking = pipeline.config().ranking;
    if let Some(n) = top_n.filter(|n| *n > 0) {
        ranking.top_n = n;
    }
    ranking
}

/// Unwrap a CSV upload body, answering extractor failures with the JSON envelope.
fn csv_body(
    state: &ServerState,
    body: std::result::Result<String, StringRejection>,
    start: Instant,
) -> ApiResult<String> {
    body.map_err(|e| {
        state.usage.record_error();
        ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid CSV body: {e}"), start)
    })
}

/// Score an uploaded CSV on the blocking pool.
async fn run_batch(
    state: &ServerState,
    pipeline: Arc<Pipeline>,
    body: String,
    ranking: RankingConfig,
    start: Instant,
) -> ApiResult<BatchOutcome> {
    let joined = tokio::task::spawn_blocking(move || pipeline.predict_csv(&body, &ranking)).await;
    match joined {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(e)) => {
            state.usage.record_error();
            Err(ApiError::from_pipeline(e, start))
        }
        Err(e) => {
            state.usage.record_error();
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Batch task failed: {e}"),
                start,
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let pipeline = state.current_pipeline();
    Json(HealthResponse {
        status: if pipeline.is_some() { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model_loaded: pipeline.is_some(),
        model_hash: pipeline.as_ref().map(|p| p.model_hash().to_string()),
        load_error: state.load_error(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

pub async fn stats_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.usage.ep_stats.fetch_add(1, Ordering::Relaxed);
    let u = &state.usage;

    Json(StatsResponse {
        uptime_seconds: state.start_time.elapsed().as_secs(),
        model_hash: state.current_pipeline().map(|p| p.model_hash().to_string()),
        requests: RequestStats {
            total: u.total_requests.load(Ordering::Relaxed),
            errors: u.total_errors.load(Ordering::Relaxed),
        },
        predictions: PredictionStats {
            rows_scored: u.rows_scored.load(Ordering::Relaxed),
            pass: u.pass.load(Ordering::Relaxed),
            fail: u.fail.load(Ordering::Relaxed),
        },
        endpoints: EndpointStats {
            predict: u.ep_predict.load(Ordering::Relaxed),
            batch: u.ep_batch.load(Ordering::Relaxed),
            export: u.ep_export.load(Ordering::Relaxed),
            reports: u.ep_reports.load(Ordering::Relaxed),
            reload: u.ep_reload.load(Ordering::Relaxed),
            stats: u.ep_stats.load(Ordering::Relaxed),
        },
    })
}

/// Schema and manual-entry fields. Served even without a classifier so the
/// dashboard can still describe the expected upload.
pub async fn schema_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let response = match state.current_pipeline() {
        Some(p) => SchemaResponse {
            success: true,
            fields: p.schema().fields().to_vec(),
            field_count: p.schema().len(),
            source: p.schema_source().clone(),
            manual_fields: p.manual_fields().to_vec(),
            model_loaded: true,
            single_record_notice: SINGLE_RECORD_NOTICE,
        },
        None => {
            let load = load_schema(&state.pipeline_config.schema_candidates);
            let manual =
                crate::align::manual_fields(&load.schema, state.pipeline_config.manual_fields).to_vec();
            SchemaResponse {
                success: true,
                field_count: load.schema.len(),
                fields: load.schema.fields().to_vec(),
                source: load.source,
                manual_fields: manual,
                model_loaded: false,
                single_record_notice: SINGLE_RECORD_NOTICE,
            }
        }
    };
    Json(response)
}

pub async fn predict_handler(
    State(state): State<Arc<ServerState>>,
    body: std::result::Result<Json<PredictRequest>, JsonRejection>,
) -> ApiResult<Json<PredictResponse>> {
    let start = Instant::now();
    state.usage.ep_predict.fetch_add(1, Ordering::Relaxed);

    let Json(request) = body.map_err(|e| {
        state.usage.record_error();
        ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid JSON: {e}"), start)
    })?;
    let pipeline = require_pipeline(&state, start)?;

    let result = pipeline.predict_single(&request.values).map_err(|e| {
        state.usage.record_error();
        ApiError::from_pipeline(e, start)
    })?;

    let processing_time_ms = start.elapsed().as_millis() as u64;
    state.usage.record(&RecordEvent {
        endpoint: "predict",
        rows: 1,
        fail_count: usize::from(result.prediction.label.is_fail()),
        model_hash: pipeline.model_hash(),
        processing_time_ms,
    });

    Ok(Json(PredictResponse {
        success: true,
        result,
        model_hash: pipeline.model_hash().to_string(),
        processing_time_ms,
    }))
}

pub async fn batch_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<BatchQuery>,
    body: std::result::Result<String, StringRejection>,
) -> ApiResult<Json<BatchResponse>> {
    let start = Instant::now();
    state.usage.ep_batch.fetch_add(1, Ordering::Relaxed);

    let body = csv_body(&state, body, start)?;
    let pipeline = require_pipeline(&state, start)?;
    let ranking = ranking_for(&pipeline, query.top_n);
    let outcome = run_batch(&state, pipeline.clone(), body, ranking, start).await?;

    let processing_time_ms = start.elapsed().as_millis() as u64;
    state.usage.record(&RecordEvent {
        endpoint: "batch",
        rows: outcome.report.summary.total,
        fail_count: outcome.report.summary.fail_count,
        model_hash: pipeline.model_hash(),
        processing_time_ms,
    });

    let review_count = outcome.review_count();
    let BatchOutcome {
        predictions,
        report,
        extra_columns,
        ..
    } = outcome;

    Ok(Json(BatchResponse {
        success: true,
        summary: report.summary,
        view: report.view,
        notices: report.notices.into_iter().map(NoticeBody::from).collect(),
        predictions,
        review_count,
        extra_columns,
        model_hash: pipeline.model_hash().to_string(),
        processing_time_ms,
    }))
}

/// Score an upload and return it as a CSV download.
pub async fn export_handler(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ExportQuery>,
    body: std::result::Result<String, StringRejection>,
) -> ApiResult<Response> {
    let start = Instant::now();
    state.usage.ep_export.fetch_add(1, Ordering::Relaxed);

    let body = csv_body(&state, body, start)?;
    let pipeline = require_pipeline(&state, start)?;
    let ranking = ranking_for(&pipeline, query.top_n);
    let outcome = run_batch(&state, pipeline.clone(), body, ranking, start).await?;

    let (csv, file_name) = match query.view {
        ExportView::Full => (outcome.export_full(), FULL_EXPORT_FILE_NAME),
        ExportView::Ranked => (outcome.export_ranked(), RANKED_EXPORT_FILE_NAME),
    };

    state.usage.record(&RecordEvent {
        endpoint: "export",
        rows: outcome.report.summary.total,
        fail_count: outcome.report.summary.fail_count,
        model_hash: pipeline.model_hash(),
        processing_time_ms: start.elapsed().as_millis() as u64,
    });

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        csv,
    )
        .into_response())
}

pub async fn reports_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    state.usage.ep_reports.fetch_add(1, Ordering::Relaxed);
    let dir = state.pipeline_config.reports_dir.clone();
    let catalog = ReportCatalog::scan(&dir, state.pipeline_config.report_profile);
    Json(ReportsResponse {
        success: true,
        reports_dir: dir,
        catalog,
    })
}

/// Serve one report artifact. Only files listed in the catalog are reachable.
pub async fn report_file_handler(
    State(state): State<Arc<ServerState>>,
    Path(file_name): Path<String>,
) -> ApiResult<Response> {
    let start = Instant::now();
    let catalog = ReportCatalog::scan(
        &state.pipeline_config.reports_dir,
        state.pipeline_config.report_profile,
    );
    let (path, kind) = catalog.resolve(&file_name).ok_or_else(|| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            format!("Report '{file_name}' has not been generated"),
            start,
        )
    })?;

    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        warn!(path = %path.display(), error = %e, "failed to read report artifact");
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read report", start)
    })?;

    Ok(([(header::CONTENT_TYPE, kind.content_type())], bytes).into_response())
}

/// Rebuild the pipeline from disk and swap it in.
pub async fn reload_handler(State(state): State<Arc<ServerState>>) -> ApiResult<Json<ReloadResponse>> {
    let start = Instant::now();
    state.usage.ep_reload.fetch_add(1, Ordering::Relaxed);

    let previous = state.current_pipeline().map(|p| p.model_hash().to_string());
    let reload_state = state.clone();
    let pipeline = match tokio::task::spawn_blocking(move || reload_state.reload()).await {
        Ok(Ok(p)) => p,
        Ok(Err(e)) => {
            state.usage.record_error();
            return Err(ApiError::from_pipeline(e, start));
        }
        Err(e) => {
            state.usage.record_error();
            return Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Reload task failed: {e}"),
                start,
            ));
        }
    };

    info!(
        model_hash = %pipeline.model_hash(),
        previous = ?previous,
        "pipeline reloaded"
    );

    Ok(Json(ReloadResponse {
        success: true,
        model_hash: pipeline.model_hash().to_string(),
        previous_model_hash: previous,
        schema_fields: pipeline.schema().len(),
        processing_time_ms: start.elapsed().as_millis() as u64,
    }))
}
