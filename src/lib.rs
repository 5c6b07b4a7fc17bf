//! Wafer yield dashboard: pass/fail prediction for semiconductor test data.
//!
//! Scores wafers or dies from their sensor readings with a pre-trained binary
//! classifier:
//! - **PASS** (`0`): the unit is expected to yield
//! - **FAIL** (`1`): the unit is expected to fail final test
//!
//! Uploads are validated against a feature schema before any inference runs.
//! Batch results are summarized, the riskiest units are ranked for review, and
//! everything can be exported as CSV. Pre-generated model reports (SHAP,
//! ROC, confusion matrix) are listed and served alongside.
//!
//! The flow is `schema -> align -> model -> adapter -> ranking -> export`,
//! assembled by [`pipeline::Pipeline`].
//!
//! Uses structured logging via [`tracing`]. Set the `RUST_LOG` environment
//! variable to control log verbosity (e.g., `RUST_LOG=waferyield=debug`).

pub mod adapter;
pub mod align;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod pipeline;
pub mod ranking;
pub mod reports;
pub mod schema;
pub mod scores;
pub mod server;
pub mod table;
pub mod ui;

pub use adapter::{Prediction, YieldLabel};
pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{BatchOutcome, Pipeline, SinglePrediction};
pub use ranking::{BatchNotice, BatchSummary, RankingConfig, RiskReport};
