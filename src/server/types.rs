//! Request/response types and configuration for the dashboard server.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::adapter::Prediction;
use crate::pipeline::SinglePrediction;
use crate::ranking::{BatchNotice, BatchSummary, RankingView};
use crate::reports::ReportCatalog;
use crate::schema::SchemaSource;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to (defaults to 127.0.0.1:8080; use 0.0.0.0 to expose externally)
    pub bind_addr: SocketAddr,
    /// Rate limit in requests per minute per IP (0 = no limit)
    pub rate_limit_rpm: u32,
    /// Path for JSONL access log
    pub access_log_path: String,
    /// Maximum access log file size in bytes before rotation (0 = no limit)
    pub max_access_log_bytes: u64,
    /// Bearer token required by `POST /api/v1/reload`. If None, reload is open.
    pub api_key: Option<String>,
    /// Directory for the persisted metrics snapshot.
    pub cache_dir: String,
}

/// Default directory for `metrics.json`.
pub const DEFAULT_CACHE_DIR: &str = ".waferyield";

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            rate_limit_rpm: 120,
            access_log_path: "waferyield-access.jsonl".to_string(),
            max_access_log_bytes: 50 * 1024 * 1024, // 50 MB
            api_key: None,
            cache_dir: DEFAULT_CACHE_DIR.to_string(),
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("access_log_path", &self.access_log_path)
            .field("max_access_log_bytes", &self.max_access_log_bytes)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("cache_dir", &self.cache_dir)
            .finish()
    }
}

/// How the request was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey,
    /// No API key configured.
    Open,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/predict`.
#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    #[serde(default)]
    pub values: BTreeMap<String, f64>,
}

/// Query string of `POST /api/v1/batch`.
#[derive(Debug, Default, Deserialize)]
pub struct BatchQuery {
    pub top_n: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportView {
    #[default]
    Full,
    Ranked,
}

/// Query string of `POST /api/v1/batch/export`.
#[derive(Debug, Default, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub view: ExportView,
    pub top_n: Option<usize>,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Failure envelope shared by every JSON endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    /// Full list of absent schema fields on a schema mismatch.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_fields: Vec<String>,
    pub processing_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct SchemaResponse {
    pub success: bool,
    pub fields: Vec<String>,
    pub field_count: usize,
    pub source: SchemaSource,
    /// Fields offered for manual entry in single-record mode.
    pub manual_fields: Vec<String>,
    pub model_loaded: bool,
    pub single_record_notice: &'static str,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub success: bool,
    pub result: SinglePrediction,
    pub model_hash: String,
    pub processing_time_ms: u64,
}

/// A [`BatchNotice`] with its operator-facing text.
#[derive(Debug, Serialize)]
pub struct NoticeBody {
    pub kind: BatchNotice,
    pub message: &'static str,
}

impl From<BatchNotice> for NoticeBody {
    fn from(kind: BatchNotice) -> Self {
        Self {
            kind,
            message: kind.message(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub success: bool,
    pub summary: BatchSummary,
    pub view: RankingView,
    pub notices: Vec<NoticeBody>,
    /// Every prediction, in upload order.
    pub predictions: Vec<Prediction>,
    pub review_count: usize,
    /// Upload columns the classifier ignored.
    pub extra_columns: Vec<String>,
    pub model_hash: String,
    pub processing_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct ReportsResponse {
    pub success: bool,
    pub reports_dir: PathBuf,
    #[serde(flatten)]
    pub catalog: ReportCatalog,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub success: bool,
    pub model_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_model_hash: Option<String>,
    pub schema_fields: usize,
    pub processing_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub uptime_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_hash: Option<String>,
    pub requests: RequestStats,
    pub predictions: PredictionStats,
    pub endpoints: EndpointStats,
}

#[derive(Debug, Serialize)]
pub struct RequestStats {
    pub total: u64,
    pub errors: u64,
}

#[derive(Debug, Serialize)]
pub struct PredictionStats {
    pub rows_scored: u64,
    pub pass: u64,
    pub fail: u64,
}

#[derive(Debug, Serialize)]
pub struct EndpointStats {
    pub predict: u64,
    pub batch: u64,
    pub export: u64,
    pub reports: u64,
    pub reload: u64,
    pub stats: u64,
}
