//! Batch summary and risk ranking.
//!
//! Predicted fails are ranked by descending confidence so the most certain
//! failures are inspected first. When a batch has no predicted fails, the
//! least confident passes are surfaced instead as a watch list: in a yield
//! context those are the likeliest false negatives.
//!
//! Both sorts are stable, so ties keep upload order and ranking the same
//! results twice gives the same view.

use serde::{Deserialize, Serialize};

use crate::adapter::{Prediction, YieldLabel};

/// Default size of the fail ranking.
pub const DEFAULT_TOP_N: usize = 10;

/// Default size of the no-fail watch list.
pub const DEFAULT_WATCH_LIST_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingConfig {
    pub top_n: usize,
    pub watch_list_size: usize,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_TOP_N,
            watch_list_size: DEFAULT_WATCH_LIST_SIZE,
        }
    }
}

/// Conditions worth telling the operator about that are not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchNotice {
    /// Zero rows: rates are reported as 0 rather than undefined.
    EmptyBatch,
    /// No predicted fails: the view is a watch list of weak passes.
    NoFailsFound,
}

impl BatchNotice {
    pub fn message(&self) -> &'static str {
        match self {
            Self::EmptyBatch => "The batch contains no rows; rates are reported as 0.",
            Self::NoFailsFound => {
                "No failures predicted. Listed below are the least confident passes, \
                 the units most likely to be missed failures."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub fail_count: usize,
    pub pass_count: usize,
    pub fail_rate: f64,
    pub yield_rate: f64,
}

impl BatchSummary {
    pub fn from_predictions(predictions: &[Prediction]) -> Self {
        let total = predictions.len();
        let fail_count = predictions.iter().filter(|p| p.label.is_fail()).count();
        let pass_count = total - fail_count;
        let (fail_rate, yield_rate) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                fail_count as f64 / total as f64,
                pass_count as f64 / total as f64,
            )
        };
        Self {
            total,
            fail_count,
            pass_count,
            fail_rate,
            yield_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    /// Predicted fails, most confident first.
    FailRanking,
    /// Predicted passes, least confident first.
    WatchList,
}

/// One row of a ranking view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankedRow {
    /// 0-based position in the uploaded batch.
    pub index: usize,
    pub label: YieldLabel,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingView {
    pub kind: ViewKind,
    pub rows: Vec<RankedRow>,
}

impl RankingView {
    pub fn indices(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.index).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub summary: BatchSummary,
    pub view: RankingView,
    pub notices: Vec<BatchNotice>,
}

/// Summarize a batch and build its ranking view.
pub fn rank(predictions: &[Prediction], config: &RankingConfig) -> RiskReport {
    let summary = BatchSummary::from_predictions(predictions);
    let mut notices = Vec::new();
    if summary.total == 0 {
        notices.push(BatchNotice::EmptyBatch);
    }

    let subset = |label: YieldLabel| -> Vec<RankedRow> {
        predictions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.label == label)
            .map(|(index, p)| RankedRow {
                index,
                label: p.label,
                score: p.score,
            })
            .collect()
    };

    let view = if summary.fail_count > 0 {
        let mut fails = subset(YieldLabel::Fail);
        fails.sort_by(|a, b| b.score.total_cmp(&a.score));
        fails.truncate(config.top_n);
        RankingView {
            kind: ViewKind::FailRanking,
            rows: fails,
        }
    } else {
        if summary.total > 0 {
            notices.push(BatchNotice::NoFailsFound);
        }
        let mut passes = subset(YieldLabel::Pass);
        passes.sort_by(|a, b| a.score.total_cmp(&b.score));
        passes.truncate(config.watch_list_size);
        RankingView {
            kind: ViewKind::WatchList,
            rows: passes,
        }
    };

    RiskReport {
        summary,
        view,
        notices,
    }
}
