//! Usage metrics, access logging, and metrics persistence.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

/// Maximum number of rotated access log files to keep.
const MAX_ACCESS_LOG_ROTATIONS: usize = 5;

/// Interval in seconds between metrics persistence to disk.
pub const METRICS_PERSIST_INTERVAL_SECS: u64 = 60;

/// One completed prediction request.
#[derive(Debug)]
pub struct RecordEvent<'a> {
    pub endpoint: &'a str,
    pub rows: usize,
    pub fail_count: usize,
    pub model_hash: &'a str,
    pub processing_time_ms: u64,
}

pub struct UsageMetrics {
    pub total_requests: AtomicU64,
    pub total_errors: AtomicU64,

    pub rows_scored: AtomicU64,
    pub pass: AtomicU64,
    pub fail: AtomicU64,

    pub ep_predict: AtomicU64,
    pub ep_batch: AtomicU64,
    pub ep_export: AtomicU64,
    pub ep_reports: AtomicU64,
    pub ep_reload: AtomicU64,
    pub ep_stats: AtomicU64,

    pub access_log: std::sync::Mutex<Option<File>>,
    access_log_path: String,
    access_log_bytes: AtomicU64,
    max_access_log_bytes: u64,
    metrics_path: String,
}

impl UsageMetrics {
    pub fn new(access_log_path: &str, max_access_log_bytes: u64, cache_dir: &str) -> Self {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(access_log_path)
            .ok();
        if file.is_none() {
            warn!(path = access_log_path, "could not open access log");
        }
        let current_size = std::fs::metadata(access_log_path)
            .map(|m| m.len())
            .unwrap_or(0);

        if let Err(e) = std::fs::create_dir_all(cache_dir) {
            warn!(path = cache_dir, error = %e, "could not create metrics directory");
        }
        let metrics_path = Path::new(cache_dir).join("metrics.json");

        Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            rows_scored: AtomicU64::new(0),
            pass: AtomicU64::new(0),
            fail: AtomicU64::new(0),
            ep_predict: AtomicU64::new(0),
            ep_batch: AtomicU64::new(0),
            ep_export: AtomicU64::new(0),
            ep_reports: AtomicU64::new(0),
            ep_reload: AtomicU64::new(0),
            ep_stats: AtomicU64::new(0),
            access_log: std::sync::Mutex::new(file),
            access_log_path: access_log_path.to_string(),
            access_log_bytes: AtomicU64::new(current_size),
            max_access_log_bytes,
            metrics_path: metrics_path.to_string_lossy().to_string(),
        }
    }

    pub fn record(&self, event: &RecordEvent<'_>) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let rows = event.rows as u64;
        let fails = event.fail_count as u64;
        self.rows_scored.fetch_add(rows, Ordering::Relaxed);
        self.fail.fetch_add(fails, Ordering::Relaxed);
        self.pass.fetch_add(rows.saturating_sub(fails), Ordering::Relaxed);

        if let Ok(mut guard) = self.access_log.try_lock() {
            if let Some(ref mut file) = *guard {
                let entry = serde_json::json!({
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                    "endpoint": event.endpoint,
                    "rows": event.rows,
                    "fail_count": event.fail_count,
                    "model_hash": event.model_hash,
                    "processing_time_ms": event.processing_time_ms,
                });
                let mut line = entry.to_string();
                line.push('\n');
                let line_len = line.len() as u64;
                if let Err(e) = file.write_all(line.as_bytes()) {
                    warn!(error = %e, "failed to write access log entry");
                }
                let new_size =
                    self.access_log_bytes.fetch_add(line_len, Ordering::Relaxed) + line_len;

                // Rotate if over size limit (0 = no limit)
                if self.max_access_log_bytes > 0 && new_size >= self.max_access_log_bytes {
                    self.rotate(file);
                }
            }
        }
    }

    fn rotate(&self, file: &mut File) {
        for i in (1..MAX_ACCESS_LOG_ROTATIONS).rev() {
            let from = format!("{}.{}", self.access_log_path, i);
            let to = format!("{}.{}", self.access_log_path, i + 1);
            if Path::new(&from).exists() {
                if let Err(e) = std::fs::rename(&from, &to) {
                    warn!(from = %from, to = %to, error = %e, "log rotation rename failed");
                }
            }
        }
        let rotated = format!("{}.1", self.access_log_path);
        if let Err(e) = std::fs::rename(&self.access_log_path, &rotated) {
            warn!(from = %self.access_log_path, to = %rotated, error = %e, "log rotation rename failed");
        }
        if let Ok(new_file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.access_log_path)
        {
            *file = new_file;
            self.access_log_bytes.store(0, Ordering::Relaxed);
        }
    }

    pub fn record_error(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Persist current metrics snapshot to disk so they survive restarts.
    pub fn persist_to_disk(&self) {
        let snapshot = serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "total_requests": self.total_requests.load(Ordering::Relaxed),
            "total_errors": self.total_errors.load(Ordering::Relaxed),
            "rows_scored": self.rows_scored.load(Ordering::Relaxed),
            "pass": self.pass.load(Ordering::Relaxed),
            "fail": self.fail.load(Ordering::Relaxed),
            "ep_predict": self.ep_predict.load(Ordering::Relaxed),
            "ep_batch": self.ep_batch.load(Ordering::Relaxed),
            "ep_export": self.ep_export.load(Ordering::Relaxed),
            "ep_reports": self.ep_reports.load(Ordering::Relaxed),
            "ep_reload": self.ep_reload.load(Ordering::Relaxed),
            "ep_stats": self.ep_stats.load(Ordering::Relaxed),
        });
        match serde_json::to_vec_pretty(&snapshot) {
            Ok(data) => {
                if let Err(e) = std::fs::write(&self.metrics_path, &data) {
                    warn!(path = %self.metrics_path, error = %e, "failed to persist metrics");
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to serialize metrics snapshot");
            }
        }
    }
}
