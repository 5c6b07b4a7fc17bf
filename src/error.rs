//! Error conditions raised by the prediction pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// How many missing field names a [`PipelineError::SchemaMismatch`] message
/// spells out before summarizing the rest.
pub const MISSING_FIELDS_SAMPLE: usize = 10;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{artifact} not found (searched: {})", display_paths(.searched))]
    ArtifactMissing {
        artifact: &'static str,
        searched: Vec<PathBuf>,
    },

    #[error("invalid artifact {path}: {reason}")]
    ArtifactInvalid { path: PathBuf, reason: String },

    #[error("uploaded data is missing {} required field(s): {}", .missing.len(), sample_missing(.missing))]
    SchemaMismatch { missing: Vec<String> },

    #[error("row {row}, column '{column}': '{value}' is not a number")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },

    #[error("'{field}' is not a field of the feature schema")]
    UnknownField { field: String },

    #[error("malformed CSV at line {line}: {reason}")]
    MalformedTable { line: usize, reason: String },

    #[error("classifier output has no known label/score columns (saw: {})", .columns.join(", "))]
    UnrecognizedOutputSchema { columns: Vec<String> },

    #[error("classifier output row {row}: {reason}")]
    MalformedPrediction { row: usize, reason: String },
}

impl PipelineError {
    /// True for conditions caused by the operator's input rather than by the
    /// artifacts or the classifier contract.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::SchemaMismatch { .. }
                | Self::InvalidValue { .. }
                | Self::UnknownField { .. }
                | Self::MalformedTable { .. }
        )
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn sample_missing(missing: &[String]) -> String {
    if missing.len() <= MISSING_FIELDS_SAMPLE {
        missing.join(", ")
    } else {
        format!(
            "{} ... and {} more",
            missing[..MISSING_FIELDS_SAMPLE].join(", "),
            missing.len() - MISSING_FIELDS_SAMPLE
        )
    }
}
