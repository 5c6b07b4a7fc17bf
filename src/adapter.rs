//! Inference adapter: run a classifier and normalize its output.
//!
//! Classifier libraries have named the label/score columns differently
//! across releases. Each known naming is an [`OutputShape`]; shapes are tried
//! in [`KNOWN_SHAPES`] order against the raw output and the first one whose
//! columns are both present wins. If none match, the library contract has
//! changed and that is reported as [`PipelineError::UnrecognizedOutputSchema`].
//!
//! Labels arrive as integers, floats, or strings depending on the release.
//! All are folded into [`YieldLabel`], which serializes as `0`/`1`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::align::FeatureMatrix;
use crate::error::{PipelineError, Result};
use crate::model::{Classifier, RawPredictionTable};
use crate::scores::BinaryScores;

/// Canonical binary outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum YieldLabel {
    Pass,
    Fail,
}

impl YieldLabel {
    pub fn as_int(&self) -> u8 {
        match self {
            Self::Pass => 0,
            Self::Fail => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
        }
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, Self::Fail)
    }

    /// Accept `1`, `1.0`, `"1"`, `"1.0"`, `true` (and the `0` equivalents).
    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Number(n) => match n.as_f64() {
                Some(x) if x == 1.0 => Some(Self::Fail),
                Some(x) if x == 0.0 => Some(Self::Pass),
                _ => None,
            },
            Value::String(s) => match s.trim() {
                "1" | "1.0" => Some(Self::Fail),
                "0" | "0.0" => Some(Self::Pass),
                _ => None,
            },
            Value::Bool(b) => Some(if *b { Self::Fail } else { Self::Pass }),
            _ => None,
        }
    }
}

impl Serialize for YieldLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_int())
    }
}

impl<'de> Deserialize<'de> for YieldLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let v = Value::deserialize(deserializer)?;
        Self::from_value(&v)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid yield label: {v}")))
    }
}

/// One normalized prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: YieldLabel,
    /// Confidence in `label`.
    pub score: f64,
}

impl Prediction {
    /// Both class probabilities, recovered from the label and its score.
    pub fn scores(&self) -> BinaryScores {
        match self.label {
            YieldLabel::Fail => BinaryScores::from_fail_probability(self.score),
            YieldLabel::Pass => BinaryScores::from_fail_probability(1.0 - self.score),
        }
    }

    /// Close enough to the decision boundary that an engineer should look.
    pub fn needs_review(&self) -> bool {
        self.scores().needs_review()
    }
}

/// A known raw output naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputShape {
    /// `prediction_label` / `prediction_score`
    Current,
    /// `Label` / `Score`
    Legacy,
}

/// Shapes in the order they are tried.
pub const KNOWN_SHAPES: [OutputShape; 2] = [OutputShape::Current, OutputShape::Legacy];

impl OutputShape {
    pub fn label_column(&self) -> &'static str {
        match self {
            Self::Current => "prediction_label",
            Self::Legacy => "Label",
        }
    }

    pub fn score_column(&self) -> &'static str {
        match self {
            Self::Current => "prediction_score",
            Self::Legacy => "Score",
        }
    }

    /// Borrow this shape's columns from `raw`, if both are present.
    fn extract<'a>(&self, raw: &'a RawPredictionTable) -> Option<(&'a [Value], &'a [Value])> {
        Some((
            raw.column(self.label_column())?,
            raw.column(self.score_column())?,
        ))
    }
}

/// Detect the output shape and convert every row to a [`Prediction`].
///
/// `expected_rows` guards against a classifier dropping or duplicating rows.
pub fn normalize(raw: &RawPredictionTable, expected_rows: usize) -> Result<(OutputShape, Vec<Prediction>)> {
    let (shape, labels, scores) = KNOWN_SHAPES
        .iter()
        .find_map(|shape| shape.extract(raw).map(|(l, s)| (*shape, l, s)))
        .ok_or_else(|| PipelineError::UnrecognizedOutputSchema {
            columns: raw.column_names(),
        })?;

    if labels.len() != expected_rows || scores.len() != expected_rows {
        return Err(PipelineError::MalformedPrediction {
            row: labels.len().min(scores.len()),
            reason: format!(
                "expected {expected_rows} rows, got {} labels and {} scores",
                labels.len(),
                scores.len()
            ),
        });
    }

    let predictions = labels
        .iter()
        .zip(scores)
        .enumerate()
        .map(|(i, (l, s))| normalize_row(i + 1, l, s))
        .collect::<Result<Vec<_>>>()?;

    Ok((shape, predictions))
}

fn normalize_row(row: usize, label: &Value, score: &Value) -> Result<Prediction> {
    let label = YieldLabel::from_value(label).ok_or_else(|| PipelineError::MalformedPrediction {
        row,
        reason: format!("unrecognized label {label}"),
    })?;

    let score = match score {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| PipelineError::MalformedPrediction {
        row,
        reason: format!("non-numeric score {score}"),
    })?;

    if !(0.0..=1.0).contains(&score) {
        return Err(PipelineError::MalformedPrediction {
            row,
            reason: format!("score {score} outside [0, 1]"),
        });
    }

    Ok(Prediction { label, score })
}

/// Run `classifier` on `matrix` and return canonical predictions.
pub fn predict(
    classifier: &dyn Classifier,
    columns: &[String],
    matrix: &FeatureMatrix,
) -> Result<Vec<Prediction>> {
    let raw = classifier.predict(columns, matrix)?;
    let (shape, predictions) = normalize(&raw, matrix.len())?;
    tracing::debug!(
        rows = predictions.len(),
        shape = ?shape,
        "normalized classifier output"
    );
    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(vs: &[Value]) -> Vec<Value> {
        vs.to_vec()
    }

    #[test]
    fn test_current_shape_detected() {
        let raw = RawPredictionTable::new()
            .with_column("prediction_label", values(&[json!(1), json!(0)]))
            .with_column("prediction_score", values(&[json!(0.91), json!(0.6)]));
        let (shape, preds) = normalize(&raw, 2).unwrap();
        assert_eq!(shape, OutputShape::Current);
        assert_eq!(preds[0], Prediction { label: YieldLabel::Fail, score: 0.91 });
        assert_eq!(preds[1].label, YieldLabel::Pass);
    }

    #[test]
    fn test_legacy_shape_with_string_labels() {
        let raw = RawPredictionTable::new()
            .with_column("Label", values(&[json!("1"), json!("0")]))
            .with_column("Score", values(&[json!(0.8), json!("0.75")]));
        let (shape, preds) = normalize(&raw, 2).unwrap();
        assert_eq!(shape, OutputShape::Legacy);
        assert_eq!(preds[0].label, YieldLabel::Fail);
        assert_eq!(preds[1].score, 0.75);
    }

    #[test]
    fn test_current_shape_preferred_when_both_present() {
        let raw = RawPredictionTable::new()
            .with_column("Label", values(&[json!(0)]))
            .with_column("Score", values(&[json!(0.1)]))
            .with_column("prediction_label", values(&[json!(1)]))
            .with_column("prediction_score", values(&[json!(0.9)]));
        let (shape, preds) = normalize(&raw, 1).unwrap();
        assert_eq!(shape, OutputShape::Current);
        assert_eq!(preds[0].label, YieldLabel::Fail);
    }

    #[test]
    fn test_half_a_shape_is_not_a_match() {
        let raw = RawPredictionTable::new()
            .with_column("prediction_label", values(&[json!(1)]))
            .with_column("Score", values(&[json!(0.9)]));
        match normalize(&raw, 1).unwrap_err() {
            PipelineError::UnrecognizedOutputSchema { columns } => {
                assert_eq!(columns, vec!["prediction_label", "Score"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_score_rejected() {
        let raw = RawPredictionTable::new()
            .with_column("Label", values(&[json!(1)]))
            .with_column("Score", values(&[json!(1.2)]));
        assert!(matches!(
            normalize(&raw, 1),
            Err(PipelineError::MalformedPrediction { row: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_label_and_row_mismatch_rejected() {
        let raw = RawPredictionTable::new()
            .with_column("Label", values(&[json!("maybe")]))
            .with_column("Score", values(&[json!(0.5)]));
        assert!(normalize(&raw, 1).is_err());
        assert!(normalize(&raw, 2).is_err());
    }

    #[test]
    fn test_label_equivalences() {
        for v in [json!(1), json!(1.0), json!("1"), json!(" 1 "), json!(true)] {
            assert_eq!(YieldLabel::from_value(&v), Some(YieldLabel::Fail), "{v}");
        }
        for v in [json!(0), json!("0"), json!(0.0)] {
            assert_eq!(YieldLabel::from_value(&v), Some(YieldLabel::Pass), "{v}");
        }
        assert_eq!(YieldLabel::from_value(&json!(2)), None);
        assert_eq!(YieldLabel::from_value(&json!(null)), None);
    }

    #[test]
    fn test_review_flag_follows_score() {
        let weak = Prediction { label: YieldLabel::Pass, score: 0.55 };
        let strong = Prediction { label: YieldLabel::Fail, score: 0.99 };
        assert!(weak.needs_review());
        assert!(!strong.needs_review());
        assert!((weak.scores().fail - 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_label_serializes_as_integer() {
        let p = Prediction { label: YieldLabel::Fail, score: 0.5 };
        assert_eq!(serde_json::to_value(p).unwrap(), json!({"label": 1, "score": 0.5}));
        let back: Prediction = serde_json::from_value(json!({"label": "0", "score": 0.7})).unwrap();
        assert_eq!(back.label, YieldLabel::Pass);
    }
}
