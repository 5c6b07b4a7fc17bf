//! CSV export of batch results.
//!
//! Each output line echoes one uploaded record with the canonical
//! `prediction_label,prediction_score` columns placed first for scanability.
//! The full result set and a ranking view share the same shape so either can
//! be downloaded on its own.

use crate::adapter::{Prediction, YieldLabel};
use crate::error::{PipelineError, Result};
use crate::ranking::RankingView;
use crate::table::{write_record, Table};

pub const LABEL_COLUMN: &str = "prediction_label";
pub const SCORE_COLUMN: &str = "prediction_score";

/// File names offered for download.
pub const FULL_EXPORT_FILE_NAME: &str = "yield_prediction_results.csv";
pub const RANKED_EXPORT_FILE_NAME: &str = "yield_risk_ranking.csv";

/// Input columns that are echoed, skipping any stale prediction columns from
/// a re-uploaded export.
fn echoed_columns(table: &Table) -> Vec<usize> {
    table
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.as_str() != LABEL_COLUMN && c.as_str() != SCORE_COLUMN)
        .map(|(i, _)| i)
        .collect()
}

fn write_rows(table: &Table, predictions: &[Prediction], order: impl Iterator<Item = usize>) -> String {
    let echoed = echoed_columns(table);
    let mut out = String::new();

    let mut header = vec![LABEL_COLUMN.to_string(), SCORE_COLUMN.to_string()];
    header.extend(echoed.iter().map(|&i| table.columns()[i].clone()));
    write_record(&mut out, &header);

    for idx in order {
        let (Some(row), Some(pred)) = (table.rows().get(idx), predictions.get(idx)) else {
            continue;
        };
        let mut cells = Vec::with_capacity(header.len());
        cells.push(pred.label.as_int().to_string());
        cells.push(pred.score.to_string());
        cells.extend(echoed.iter().map(|&i| row[i].clone()));
        write_record(&mut out, &cells);
    }
    out
}

/// Every record in upload order.
pub fn write_results(table: &Table, predictions: &[Prediction]) -> String {
    write_rows(table, predictions, 0..predictions.len())
}

/// Only the records in `view`, in ranking order.
pub fn write_view(table: &Table, predictions: &[Prediction], view: &RankingView) -> String {
    write_rows(table, predictions, view.rows.iter().map(|r| r.index))
}

/// Parse an exported file back into its predictions.
pub fn read_results(text: &str) -> Result<Vec<Prediction>> {
    let table = Table::parse_csv(text)?;
    let missing: Vec<String> = [LABEL_COLUMN, SCORE_COLUMN]
        .iter()
        .filter(|c| table.column_index(c).is_none())
        .map(|c| c.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::SchemaMismatch { missing });
    }
    let (li, si) = (
        table.column_index(LABEL_COLUMN).unwrap_or_default(),
        table.column_index(SCORE_COLUMN).unwrap_or_default(),
    );

    table
        .rows()
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let label = YieldLabel::from_value(&serde_json::Value::from(row[li].as_str()))
                .ok_or_else(|| PipelineError::InvalidValue {
                    row: i + 1,
                    column: LABEL_COLUMN.to_string(),
                    value: row[li].clone(),
                })?;
            let score = row[si]
                .trim()
                .parse::<f64>()
                .map_err(|_| PipelineError::InvalidValue {
                    row: i + 1,
                    column: SCORE_COLUMN.to_string(),
                    value: row[si].clone(),
                })?;
            Ok(Prediction { label, score })
        })
        .collect()
}
