//! Input alignment against the feature schema.
//!
//! Two modes:
//! - **Strict batch** ([`align_batch`]): an uploaded table must carry every
//!   schema field. Missing fields are reported by name before any inference
//!   runs; extra columns are dropped by projecting onto schema order.
//! - **Lenient single record** ([`align_single`]): only a short prefix of the
//!   schema is offered for manual entry and everything else defaults to
//!   `0.0`. This is a demonstration path, not a precision path.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::schema::FeatureSchema;
use crate::table::Table;

/// Number of schema fields offered for manual entry by default.
pub const DEFAULT_MANUAL_FIELDS: usize = 6;

/// Operator-facing caveat attached to every single-record prediction.
pub const SINGLE_RECORD_NOTICE: &str = "Single-record mode only exposes the first few sensor fields; \
     every other field is set to 0.0. Treat the result as a demonstration, not a precise prediction.";

/// Feature values in schema order, one row per record. `NaN` marks a missing
/// cell for the classifier to impute.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    width: usize,
    rows: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    pub fn new(width: usize, rows: Vec<Vec<f64>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == width));
        Self { width, rows }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A validated upload: the original table for echoing on export plus the
/// numeric projection handed to the classifier.
#[derive(Debug, Clone)]
pub struct AlignedBatch {
    pub table: Table,
    pub matrix: FeatureMatrix,
    /// Upload columns that are not part of the schema.
    pub extra_columns: Vec<String>,
}

/// Schema fields absent from `columns`, in schema order.
pub fn missing_fields(schema: &FeatureSchema, columns: &[String]) -> Vec<String> {
    schema
        .fields()
        .iter()
        .filter(|f| !columns.iter().any(|c| c == *f))
        .cloned()
        .collect()
}

/// Validate an uploaded table and project it onto the schema.
pub fn align_batch(table: Table, schema: &FeatureSchema) -> Result<AlignedBatch> {
    let missing = missing_fields(schema, table.columns());
    if !missing.is_empty() {
        return Err(PipelineError::SchemaMismatch { missing });
    }

    // Every schema field is present, so each lookup succeeds.
    let indices: Vec<usize> = schema
        .fields()
        .iter()
        .filter_map(|f| table.column_index(f))
        .collect();

    let mut rows = Vec::with_capacity(table.len());
    for (row_idx, row) in table.rows().iter().enumerate() {
        let mut values = Vec::with_capacity(indices.len());
        for &col in &indices {
            let cell = &row[col];
            let value = parse_cell(cell).ok_or_else(|| PipelineError::InvalidValue {
                row: row_idx + 1,
                column: table.columns()[col].clone(),
                value: cell.clone(),
            })?;
            values.push(value);
        }
        rows.push(values);
    }

    let extra_columns = table
        .columns()
        .iter()
        .filter(|c| !schema.contains(c))
        .cloned()
        .collect();

    Ok(AlignedBatch {
        matrix: FeatureMatrix::new(schema.len(), rows),
        table,
        extra_columns,
    })
}

/// Parse a cell as `f64`. Blank and `NaN`/`NA`/`null` cells are missing
/// values and come back as `NaN`.
fn parse_cell(cell: &str) -> Option<f64> {
    let s = cell.trim();
    if s.is_empty()
        || s.eq_ignore_ascii_case("nan")
        || s.eq_ignore_ascii_case("na")
        || s.eq_ignore_ascii_case("null")
    {
        return Some(f64::NAN);
    }
    s.parse::<f64>().ok().filter(|v| !v.is_infinite())
}

/// The schema prefix offered for manual entry.
pub fn manual_fields(schema: &FeatureSchema, count: usize) -> &[String] {
    let n = count.min(schema.len());
    &schema.fields()[..n]
}

/// A full-width single record built from partial manual input.
#[derive(Debug, Clone, Serialize)]
pub struct SingleRecord {
    /// Values in schema order.
    #[serde(skip)]
    pub values: Vec<f64>,
    /// Fields the operator supplied.
    pub provided: BTreeMap<String, f64>,
    /// How many schema fields were filled with `0.0`.
    pub defaulted_fields: usize,
}

impl SingleRecord {
    pub fn into_matrix(self) -> FeatureMatrix {
        let width = self.values.len();
        FeatureMatrix::new(width, vec![self.values])
    }
}

/// Build a single record, defaulting every unspecified schema field to `0.0`.
///
/// Names outside the schema are rejected so that typos do not silently fall
/// back to the default.
pub fn align_single(schema: &FeatureSchema, provided: &BTreeMap<String, f64>) -> Result<SingleRecord> {
    let mut values = vec![0.0; schema.len()];
    for (name, &value) in provided {
        let idx = schema
            .position(name)
            .ok_or_else(|| PipelineError::UnknownField { field: name.clone() })?;
        if !value.is_finite() {
            return Err(PipelineError::InvalidValue {
                row: 1,
                column: name.clone(),
                value: value.to_string(),
            });
        }
        values[idx] = value;
    }

    Ok(SingleRecord {
        values,
        defaulted_fields: schema.len() - provided.len(),
        provided: provided.clone(),
    })
}
