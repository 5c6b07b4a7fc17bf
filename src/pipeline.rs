//! The assembled prediction pipeline.
//!
//! A [`Pipeline`] is built once from its artifacts and never mutated, so it
//! can be shared behind an `Arc` by any number of concurrent requests.
//! Replacing the model means building a new `Pipeline`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::adapter::{self, Prediction};
use crate::align::{self, FeatureMatrix, SingleRecord, SINGLE_RECORD_NOTICE};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::export;
use crate::model::{load_model, Classifier};
use crate::ranking::{rank, RankingConfig, RiskReport};
use crate::schema::{load_schema, FeatureSchema, SchemaLoad, SchemaSource};
use crate::table::Table;

pub struct Pipeline {
    schema: SchemaLoad,
    classifier: Arc<dyn Classifier>,
    model_path: PathBuf,
    config: PipelineConfig,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("schema_fields", &self.schema.schema.len())
            .field("schema_source", &self.schema.source)
            .field("model_path", &self.model_path)
            .field("model_hash", &self.classifier.model_hash())
            .finish()
    }
}

/// Result of a single-record prediction.
#[derive(Debug, Clone, Serialize)]
pub struct SinglePrediction {
    #[serde(flatten)]
    pub prediction: Prediction,
    pub needs_review: bool,
    pub record: SingleRecord,
    pub notice: &'static str,
}

/// Everything produced by one batch run.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub table: Table,
    pub predictions: Vec<Prediction>,
    pub report: RiskReport,
    /// Upload columns ignored by the classifier.
    pub extra_columns: Vec<String>,
}

impl BatchOutcome {
    /// CSV of every record with its prediction.
    pub fn export_full(&self) -> String {
        export::write_results(&self.table, &self.predictions)
    }

    /// CSV of the ranking view only.
    pub fn export_ranked(&self) -> String {
        export::write_view(&self.table, &self.predictions, &self.report.view)
    }

    /// Number of predictions close to the decision boundary.
    pub fn review_count(&self) -> usize {
        self.predictions.iter().filter(|p| p.needs_review()).count()
    }
}

impl Pipeline {
    /// Load the schema and classifier named by `config`.
    ///
    /// The schema degrades to its fallback; a missing or broken classifier
    /// artifact is an error.
    pub fn load(config: PipelineConfig) -> Result<Self> {
        let schema = load_schema(&config.schema_candidates);
        let loaded = load_model(&config.model_candidates)?;
        Self::from_parts(schema, Arc::new(loaded.model), loaded.path, config)
    }

    /// Assemble a pipeline from an already-loaded schema and classifier.
    ///
    /// Every feature the classifier reads must be part of the schema,
    /// otherwise no upload that passes validation could ever be scored.
    pub fn from_parts(
        schema: SchemaLoad,
        classifier: Arc<dyn Classifier>,
        model_path: PathBuf,
        config: PipelineConfig,
    ) -> Result<Self> {
        let unknown: Vec<&str> = classifier
            .features()
            .iter()
            .filter(|f| !schema.schema.contains(f))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(PipelineError::ArtifactInvalid {
                path: model_path,
                reason: format!(
                    "classifier reads {} feature(s) outside the schema: {}",
                    unknown.len(),
                    unknown.iter().take(10).copied().collect::<Vec<_>>().join(", ")
                ),
            });
        }

        info!(
            schema_fields = schema.schema.len(),
            fallback_schema = schema.is_fallback(),
            model_features = classifier.features().len(),
            model_hash = %classifier.model_hash(),
            "prediction pipeline ready"
        );

        Ok(Self {
            schema,
            classifier,
            model_path,
            config,
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema.schema
    }

    pub fn schema_source(&self) -> &SchemaSource {
        &self.schema.source
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn model_hash(&self) -> &str {
        self.classifier.model_hash()
    }

    /// Schema fields offered for manual entry.
    pub fn manual_fields(&self) -> &[String] {
        align::manual_fields(self.schema(), self.config.manual_fields)
    }

    fn infer(&self, matrix: &FeatureMatrix) -> Result<Vec<Prediction>> {
        if matrix.is_empty() {
            return Ok(Vec::new());
        }
        adapter::predict(self.classifier.as_ref(), self.schema().fields(), matrix)
    }

    /// Score one record built from partial manual input.
    pub fn predict_single(&self, values: &BTreeMap<String, f64>) -> Result<SinglePrediction> {
        let record = align::align_single(self.schema(), values)?;
        let matrix = FeatureMatrix::new(self.schema().len(), vec![record.values.clone()]);
        let prediction = self
            .infer(&matrix)?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::MalformedPrediction {
                row: 1,
                reason: "classifier returned no rows".to_string(),
            })?;

        debug!(
            provided = record.provided.len(),
            defaulted = record.defaulted_fields,
            label = prediction.label.as_str(),
            score = prediction.score,
            "single-record prediction"
        );

        Ok(SinglePrediction {
            needs_review: prediction.needs_review(),
            prediction,
            record,
            notice: SINGLE_RECORD_NOTICE,
        })
    }

    /// Validate, score and rank an uploaded batch.
    pub fn predict_batch_with(&self, table: Table, ranking: &RankingConfig) -> Result<BatchOutcome> {
        let aligned = align::align_batch(table, self.schema())?;
        let predictions = self.infer(&aligned.matrix)?;
        let report = rank(&predictions, ranking);

        info!(
            rows = report.summary.total,
            fails = report.summary.fail_count,
            view = ?report.view.kind,
            ignored_columns = aligned.extra_columns.len(),
            "scored batch"
        );

        Ok(BatchOutcome {
            table: aligned.table,
            predictions,
            report,
            extra_columns: aligned.extra_columns,
        })
    }

    /// Parse CSV text and run [`Pipeline::predict_batch_with`] on it.
    pub fn predict_csv(&self, text: &str, ranking: &RankingConfig) -> Result<BatchOutcome> {
        let table = Table::parse_csv(text)?;
        self.predict_batch_with(table, ranking)
    }
}
