//! Yield classifier: imputation -> standardization -> logistic link.
//!
//! The offline AutoML run exports its winning pipeline as a JSON artifact
//! (`final_yield_prediction_model.json`). Scoring mirrors what the library's
//! `predict_model` does for a binary classifier:
//!
//! - missing sensor readings take the training mean
//! - each feature is standardized with the training mean/std
//! - `p_fail = sigmoid(w . x + b)`; the label is fail when `p_fail >= threshold`
//! - the reported score is the probability of the reported label
//!
//! The raw output is a column table whose names and label encoding depend on
//! the library version that produced the artifact (see [`OutputConvention`]).
//! Callers must go through [`crate::adapter`] to get canonical predictions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::align::FeatureMatrix;
use crate::error::{PipelineError, Result};
use crate::scores::BinaryScores;

/// File name the training pipeline saves the classifier under.
pub const MODEL_FILE_NAME: &str = "final_yield_prediction_model.json";

/// Version prefix for model hashes. Bump when the artifact format changes.
const MODEL_HASH_VERSION: &str = "v1";

/// Decimal places kept on emitted scores, as the AutoML library does.
const SCORE_DECIMALS: i32 = 4;

/// Default search order for the classifier artifact.
pub fn default_model_candidates() -> Vec<PathBuf> {
    vec![
        Path::new("output").join(MODEL_FILE_NAME),
        Path::new("..").join("output").join(MODEL_FILE_NAME),
        PathBuf::from(MODEL_FILE_NAME),
        Path::new("reports").join(MODEL_FILE_NAME),
    ]
}

// ---------------------------------------------------------------------------
// Raw classifier output
// ---------------------------------------------------------------------------

/// Column-oriented classifier output, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPredictionTable {
    columns: Vec<(String, Vec<Value>)>,
}

impl RawPredictionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.columns.push((name.into(), values));
        self
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(n, _)| n.clone()).collect()
    }
}

/// The narrow contract the dashboard needs from any classifier.
pub trait Classifier: Send + Sync {
    /// Feature names the classifier reads, in its own order.
    fn features(&self) -> &[String];

    /// Score every row of `matrix`, whose columns are named by `columns`.
    fn predict(&self, columns: &[String], matrix: &FeatureMatrix) -> Result<RawPredictionTable>;

    /// Stable identifier of the loaded artifact.
    fn model_hash(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Artifact format
// ---------------------------------------------------------------------------

/// Output column naming, which changed between AutoML library releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputConvention {
    /// `prediction_label` / `prediction_score`
    Current,
    /// `Label` / `Score`
    Legacy,
}

impl OutputConvention {
    pub fn columns(&self) -> (&'static str, &'static str) {
        match self {
            Self::Current => ("prediction_label", "prediction_score"),
            Self::Legacy => ("Label", "Score"),
        }
    }
}

/// How the label column is typed in the raw output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LabelEncoding {
    #[default]
    Integer,
    String,
}

fn default_threshold() -> f64 {
    0.5
}

/// Serialized form of the trained pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub name: String,
    #[serde(default)]
    pub version: String,
    pub features: Vec<String>,
    pub impute_means: Vec<f64>,
    pub scale_means: Vec<f64>,
    pub scale_stds: Vec<f64>,
    pub weights: Vec<f64>,
    pub intercept: f64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    pub output_convention: OutputConvention,
    #[serde(default)]
    pub label_encoding: LabelEncoding,
}

impl ModelArtifact {
    fn validate(&self) -> std::result::Result<(), String> {
        let n = self.features.len();
        if n == 0 {
            return Err("artifact declares no features".to_string());
        }
        for (what, len) in [
            ("impute_means", self.impute_means.len()),
            ("scale_means", self.scale_means.len()),
            ("scale_stds", self.scale_stds.len()),
            ("weights", self.weights.len()),
        ] {
            if len != n {
                return Err(format!("{what} has {len} entries, expected {n}"));
            }
        }
        let all_finite = self
            .impute_means
            .iter()
            .chain(&self.scale_means)
            .chain(&self.weights)
            .chain(std::iter::once(&self.intercept))
            .all(|v| v.is_finite());
        if !all_finite {
            return Err("artifact contains non-finite parameters".to_string());
        }
        if let Some(i) = self.scale_stds.iter().position(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(format!(
                "scale_stds[{i}] for '{}' must be positive",
                self.features[i]
            ));
        }
        if !(self.threshold > 0.0 && self.threshold < 1.0) {
            return Err(format!("threshold {} outside (0, 1)", self.threshold));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Logistic pipeline
// ---------------------------------------------------------------------------

/// A loaded, validated classifier. Immutable after construction.
#[derive(Debug, Clone)]
pub struct LogisticPipeline {
    artifact: ModelArtifact,
    hash: String,
}

impl LogisticPipeline {
    pub fn from_artifact(artifact: ModelArtifact) -> std::result::Result<Self, String> {
        artifact.validate()?;
        let hash = hash_artifact(&artifact);
        Ok(Self { artifact, hash })
    }

    pub fn name(&self) -> &str {
        &self.artifact.name
    }

    /// Class probabilities for one row already in model feature order.
    pub fn scores(&self, row: &[f64]) -> BinaryScores {
        let a = &self.artifact;
        let mut margin = a.intercept;
        for i in 0..a.features.len() {
            let raw = if row[i].is_nan() { a.impute_means[i] } else { row[i] };
            let z = (raw - a.scale_means[i]) / a.scale_stds[i];
            margin += a.weights[i] * z;
        }
        BinaryScores::from_margin(margin)
    }
}

impl Classifier for LogisticPipeline {
    fn features(&self) -> &[String] {
        &self.artifact.features
    }

    fn predict(&self, columns: &[String], matrix: &FeatureMatrix) -> Result<RawPredictionTable> {
        let by_name: HashMap<&str, usize> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        let mut missing = Vec::new();
        let mut index = Vec::with_capacity(self.artifact.features.len());
        for f in &self.artifact.features {
            match by_name.get(f.as_str()) {
                Some(&i) => index.push(i),
                None => missing.push(f.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(PipelineError::SchemaMismatch { missing });
        }

        let threshold = self.artifact.threshold;
        let mut labels = Vec::with_capacity(matrix.len());
        let mut scores = Vec::with_capacity(matrix.len());
        let mut ordered = vec![0.0; index.len()];

        for row in matrix.rows() {
            for (slot, &i) in ordered.iter_mut().zip(&index) {
                *slot = row[i];
            }
            let s = self.scores(&ordered);
            let is_fail = s.is_fail(threshold);
            labels.push(match (self.artifact.label_encoding, is_fail) {
                (LabelEncoding::Integer, true) => Value::from(1),
                (LabelEncoding::Integer, false) => Value::from(0),
                (LabelEncoding::String, true) => Value::from("1"),
                (LabelEncoding::String, false) => Value::from("0"),
            });
            scores.push(Value::from(round_score(s.confidence(threshold))));
        }

        debug!(rows = matrix.len(), model = %self.artifact.name, "scored batch");

        let (label_col, score_col) = self.artifact.output_convention.columns();
        Ok(RawPredictionTable::new()
            .with_column(label_col, labels)
            .with_column(score_col, scores))
    }

    fn model_hash(&self) -> &str {
        &self.hash
    }
}

fn round_score(p: f64) -> f64 {
    let scale = 10f64.powi(SCORE_DECIMALS);
    (p * scale).round() / scale
}

fn hash_artifact(artifact: &ModelArtifact) -> String {
    let serialized =
        serde_json::to_vec(artifact).unwrap_or_else(|_| format!("{:?}", artifact).into_bytes());
    let mut hasher = Sha256::new();
    hasher.update(MODEL_HASH_VERSION.as_bytes());
    hasher.update(&serialized);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// A classifier together with the file it was read from.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub model: LogisticPipeline,
    pub path: PathBuf,
}

/// Load the first classifier artifact that exists among `candidates`.
///
/// A missing artifact is fatal for prediction; there is no fallback model.
pub fn load_model(candidates: &[PathBuf]) -> Result<LoadedModel> {
    let path = candidates
        .iter()
        .find(|p| p.exists())
        .ok_or_else(|| PipelineError::ArtifactMissing {
            artifact: "classifier",
            searched: candidates.to_vec(),
        })?;

    let invalid = |reason: String| PipelineError::ArtifactInvalid {
        path: path.clone(),
        reason,
    };

    let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    let artifact: ModelArtifact = serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
    let model = LogisticPipeline::from_artifact(artifact).map_err(invalid)?;

    info!(
        path = %path.display(),
        name = %model.name(),
        features = model.features().len(),
        model_hash = %model.model_hash(),
        "loaded yield classifier"
    );

    Ok(LoadedModel {
        model,
        path: path.clone(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two-feature model where a high `s1` drives failure.
    pub(crate) fn toy_artifact(convention: OutputConvention, encoding: LabelEncoding) -> ModelArtifact {
        ModelArtifact {
            name: "toy".into(),
            version: "1".into(),
            features: vec!["s1".into(), "s2".into()],
            impute_means: vec![4.0, 0.2],
            scale_means: vec![4.0, 0.2],
            scale_stds: vec![2.0, 0.1],
            weights: vec![3.0, 0.5],
            intercept: 0.0,
            threshold: 0.5,
            output_convention: convention,
            label_encoding: encoding,
        }
    }

    fn columns() -> Vec<String> {
        vec!["s1".into(), "s2".into()]
    }

    #[test]
    fn test_current_convention_integer_labels() {
        let m = LogisticPipeline::from_artifact(toy_artifact(OutputConvention::Current, LabelEncoding::Integer))
            .unwrap();
        let matrix = FeatureMatrix::new(2, vec![vec![1.0, 0.1], vec![9.0, 0.3]]);
        let out = m.predict(&columns(), &matrix).unwrap();

        assert_eq!(out.column_names(), vec!["prediction_label", "prediction_score"]);
        let labels = out.column("prediction_label").unwrap();
        assert_eq!(labels, &[Value::from(0), Value::from(1)]);
        for s in out.column("prediction_score").unwrap() {
            let s = s.as_f64().unwrap();
            assert!((0.5..=1.0).contains(&s));
        }
    }

    #[test]
    fn test_legacy_convention_string_labels() {
        let m = LogisticPipeline::from_artifact(toy_artifact(OutputConvention::Legacy, LabelEncoding::String))
            .unwrap();
        let matrix = FeatureMatrix::new(2, vec![vec![9.0, 0.3]]);
        let out = m.predict(&columns(), &matrix).unwrap();
        assert_eq!(out.column("Label").unwrap(), &[Value::from("1")]);
        assert!(out.column("prediction_label").is_none());
    }

    #[test]
    fn test_columns_are_matched_by_name() {
        let m = LogisticPipeline::from_artifact(toy_artifact(OutputConvention::Current, LabelEncoding::Integer))
            .unwrap();
        let swapped = vec!["s2".to_string(), "extra".to_string(), "s1".to_string()];
        let matrix = FeatureMatrix::new(3, vec![vec![0.3, 42.0, 9.0]]);
        let out = m.predict(&swapped, &matrix).unwrap();
        assert_eq!(out.column("prediction_label").unwrap(), &[Value::from(1)]);
    }

    #[test]
    fn test_missing_values_are_imputed_with_training_mean() {
        let m = LogisticPipeline::from_artifact(toy_artifact(OutputConvention::Current, LabelEncoding::Integer))
            .unwrap();
        // Both features at their means gives a zero margin.
        let s = m.scores(&[f64::NAN, f64::NAN]);
        assert!((s.fail - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_model_needs_its_features() {
        let m = LogisticPipeline::from_artifact(toy_artifact(OutputConvention::Current, LabelEncoding::Integer))
            .unwrap();
        let matrix = FeatureMatrix::new(1, vec![vec![1.0]]);
        let err = m.predict(&["s1".to_string()], &matrix).unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { ref missing } if missing == &["s2"]));
    }

    #[test]
    fn test_invalid_artifacts_rejected() {
        let mut a = toy_artifact(OutputConvention::Current, LabelEncoding::Integer);
        a.weights.pop();
        assert!(LogisticPipeline::from_artifact(a).unwrap_err().contains("weights"));

        let mut a = toy_artifact(OutputConvention::Current, LabelEncoding::Integer);
        a.scale_stds[1] = 0.0;
        assert!(LogisticPipeline::from_artifact(a).is_err());

        let mut a = toy_artifact(OutputConvention::Current, LabelEncoding::Integer);
        a.threshold = 1.0;
        assert!(LogisticPipeline::from_artifact(a).is_err());
    }

    #[test]
    fn test_model_hash_deterministic() {
        let a = toy_artifact(OutputConvention::Current, LabelEncoding::Integer);
        let h1 = LogisticPipeline::from_artifact(a.clone()).unwrap().hash;
        let h2 = LogisticPipeline::from_artifact(a).unwrap().hash;
        assert_eq!(h1, h2);
        assert!(h1.starts_with("sha256:"));
    }

    #[test]
    fn test_load_model_search_order() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("none.json");
        let err = load_model(&[missing.clone()]).unwrap_err();
        assert!(matches!(err, PipelineError::ArtifactMissing { ref searched, .. } if searched == &[missing.clone()]));

        let good = tmp.path().join("model.json");
        let artifact = toy_artifact(OutputConvention::Legacy, LabelEncoding::Integer);
        std::fs::write(&good, serde_json::to_string(&artifact).unwrap()).unwrap();
        let loaded = load_model(&[missing, good.clone()]).unwrap();
        assert_eq!(loaded.path, good);
        assert_eq!(loaded.model.features().len(), 2);
    }

    #[test]
    fn test_load_model_reports_corrupt_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let bad = tmp.path().join("model.json");
        std::fs::write(&bad, "{\"name\": \"x\"}").unwrap();
        assert!(matches!(
            load_model(&[bad]),
            Err(PipelineError::ArtifactInvalid { .. })
        ));
    }
}
