//! Feature schema loading.
//!
//! The schema is the ordered list of sensor field names the classifier was
//! trained on. It is written once by the offline training pipeline as a JSON
//! array and read here at startup. When no artifact can be found the loader
//! degrades to a synthetic `feature_1..feature_590` schema so the dashboard
//! stays usable for demonstration.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

/// File name the training pipeline writes the schema to.
pub const SCHEMA_FILE_NAME: &str = "required_features.json";

/// Raw sensor channel count of the SECOM dataset the model was trained on.
pub const FALLBACK_FEATURE_COUNT: usize = 590;

/// Default search order: working directory, reports directory, parent.
pub fn default_schema_candidates() -> Vec<PathBuf> {
    vec![
        PathBuf::from(SCHEMA_FILE_NAME),
        Path::new("reports").join(SCHEMA_FILE_NAME),
        Path::new("..").join(SCHEMA_FILE_NAME),
    ]
}

/// Ordered, duplicate-free feature names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FeatureSchema {
    fields: Vec<String>,
}

impl FeatureSchema {
    /// Build a schema, rejecting empty lists and duplicate names.
    pub fn new(fields: Vec<String>) -> Result<Self, String> {
        if fields.is_empty() {
            return Err("schema has no fields".to_string());
        }
        let mut seen = HashSet::with_capacity(fields.len());
        for f in &fields {
            if f.trim().is_empty() {
                return Err("schema contains an empty field name".to_string());
            }
            if !seen.insert(f.as_str()) {
                return Err(format!("duplicate field name '{f}'"));
            }
        }
        Ok(Self { fields })
    }

    /// `feature_1..feature_{count}`.
    pub fn synthetic(count: usize) -> Self {
        Self {
            fields: (1..=count).map(|i| format!("feature_{i}")).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }
}

/// Where the active schema came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaSource {
    Artifact { path: PathBuf },
    Fallback,
}

/// Result of [`load_schema`].
#[derive(Debug, Clone)]
pub struct SchemaLoad {
    pub schema: FeatureSchema,
    pub source: SchemaSource,
}

impl SchemaLoad {
    pub fn is_fallback(&self) -> bool {
        self.source == SchemaSource::Fallback
    }
}

/// Try each candidate in order and return the first schema that parses.
///
/// Never fails: on total failure the synthetic fallback schema is returned
/// and a warning is logged.
pub fn load_schema(candidates: &[PathBuf]) -> SchemaLoad {
    for path in candidates {
        if !path.exists() {
            continue;
        }
        match read_schema_file(path) {
            Ok(schema) => {
                info!(path = %path.display(), fields = schema.len(), "loaded feature schema");
                return SchemaLoad {
                    schema,
                    source: SchemaSource::Artifact { path: path.clone() },
                };
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unusable feature schema artifact, trying next");
            }
        }
    }

    warn!(
        fields = FALLBACK_FEATURE_COUNT,
        "{} not found, using synthetic feature_N schema", SCHEMA_FILE_NAME
    );
    SchemaLoad {
        schema: FeatureSchema::synthetic(FALLBACK_FEATURE_COUNT),
        source: SchemaSource::Fallback,
    }
}

fn read_schema_file(path: &Path) -> Result<FeatureSchema, String> {
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let fields: Vec<String> = serde_json::from_str(&content).map_err(|e| e.to_string())?;
    FeatureSchema::new(fields)
}
