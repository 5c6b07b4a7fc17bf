//! Pipeline configuration.
//!
//! Defaults match the layout the training scripts leave behind. Each path,
//! the ranking sizes, the manual-entry width and the report profile can be
//! overridden through `WAFERYIELD_*` environment variables; the CLI applies
//! its own flags on top.

use std::path::PathBuf;

use tracing::warn;

use crate::align::DEFAULT_MANUAL_FIELDS;
use crate::model::default_model_candidates;
use crate::ranking::RankingConfig;
use crate::reports::{ReportProfile, DEFAULT_REPORTS_DIR};
use crate::schema::default_schema_candidates;

pub const ENV_SCHEMA: &str = "WAFERYIELD_SCHEMA";
pub const ENV_MODEL: &str = "WAFERYIELD_MODEL";
pub const ENV_REPORTS_DIR: &str = "WAFERYIELD_REPORTS_DIR";
pub const ENV_TOP_N: &str = "WAFERYIELD_TOP_N";
pub const ENV_WATCH_LIST_SIZE: &str = "WAFERYIELD_WATCH_LIST_SIZE";
pub const ENV_MANUAL_FIELDS: &str = "WAFERYIELD_MANUAL_FIELDS";
pub const ENV_REPORT_PROFILE: &str = "WAFERYIELD_REPORT_PROFILE";
pub const ENV_API_KEY: &str = "WAFERYIELD_API_KEY";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Feature schema locations, tried in order.
    pub schema_candidates: Vec<PathBuf>,
    /// Classifier artifact locations, tried in order.
    pub model_candidates: Vec<PathBuf>,
    pub reports_dir: PathBuf,
    pub ranking: RankingConfig,
    /// Schema prefix offered for manual entry in single-record mode.
    pub manual_fields: usize,
    pub report_profile: ReportProfile,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schema_candidates: default_schema_candidates(),
            model_candidates: default_model_candidates(),
            reports_dir: PathBuf::from(DEFAULT_REPORTS_DIR),
            ranking: RankingConfig::default(),
            manual_fields: DEFAULT_MANUAL_FIELDS,
            report_profile: ReportProfile::Full,
        }
    }
}

impl PipelineConfig {
    /// Defaults with environment overrides applied.
    ///
    /// A path override replaces the whole candidate list. Unparsable sizes
    /// or profile names are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(path) = env_path(ENV_SCHEMA) {
            config.schema_candidates = vec![path];
        }
        if let Some(path) = env_path(ENV_MODEL) {
            config.model_candidates = vec![path];
        }
        if let Some(path) = env_path(ENV_REPORTS_DIR) {
            config.reports_dir = path;
        }
        if let Some(n) = env_size(ENV_TOP_N) {
            config.ranking.top_n = n;
        }
        if let Some(n) = env_size(ENV_WATCH_LIST_SIZE) {
            config.ranking.watch_list_size = n;
        }
        if let Some(n) = env_size(ENV_MANUAL_FIELDS) {
            config.manual_fields = n;
        }
        if let Ok(raw) = std::env::var(ENV_REPORT_PROFILE) {
            match raw.trim().parse::<ReportProfile>() {
                Ok(profile) => config.report_profile = profile,
                Err(e) => warn!(var = ENV_REPORT_PROFILE, error = %e, "ignoring invalid report profile"),
            }
        }

        config
    }
}

/// A positive size from `var`, if set. Zero and garbage are logged and ignored.
fn env_size(var: &str) -> Option<usize> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            warn!(var, value = %raw, "ignoring invalid size");
            None
        }
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// API key for protected endpoints, if one is configured.
pub fn api_key_from_env() -> Option<String> {
    std::env::var(ENV_API_KEY)
        .ok()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
}
