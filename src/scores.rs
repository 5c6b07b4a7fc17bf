//! BinaryScores: logistic normalization of the classifier margin.

use serde::{Deserialize, Serialize};

/// Probability of each outcome for one unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinaryScores {
    pub pass: f64,
    pub fail: f64,
}

/// Normalized entropy above which a prediction is considered too uncertain to
/// act on without manual review. At 0.9 the top class holds less than ~68%.
pub const ENTROPY_REVIEW_THRESHOLD: f64 = 0.9;

impl BinaryScores {
    /// Apply the logistic function to a raw margin (log-odds of failure).
    pub fn from_margin(margin: f64) -> Self {
        if !margin.is_finite() {
            // Saturate rather than propagate NaN into downstream comparisons.
            let fail = if margin == f64::INFINITY {
                1.0
            } else if margin == f64::NEG_INFINITY {
                0.0
            } else {
                0.5
            };
            return Self {
                pass: 1.0 - fail,
                fail,
            };
        }
        // Split on sign to keep exp() from overflowing.
        let fail = if margin >= 0.0 {
            1.0 / (1.0 + (-margin).exp())
        } else {
            let e = margin.exp();
            e / (1.0 + e)
        };
        Self {
            pass: 1.0 - fail,
            fail,
        }
    }

    /// Scores from an already-computed probability of failure.
    pub fn from_fail_probability(fail: f64) -> Self {
        let fail = fail.clamp(0.0, 1.0);
        Self {
            pass: 1.0 - fail,
            fail,
        }
    }

    /// Probability of the class picked at `threshold`, i.e. the score an
    /// AutoML `predict_model` call reports next to its label.
    pub fn confidence(&self, threshold: f64) -> f64 {
        if self.is_fail(threshold) {
            self.fail
        } else {
            self.pass
        }
    }

    pub fn is_fail(&self, threshold: f64) -> bool {
        self.fail >= threshold
    }

    /// Shannon entropy normalized to [0, 1].
    ///
    /// - 0.0 = certain
    /// - 1.0 = coin flip
    pub fn entropy(&self) -> f64 {
        let mut h = 0.0;
        for p in [self.pass, self.fail] {
            if p > 1e-15 {
                h -= p * p.ln();
            }
        }
        h / std::f64::consts::LN_2
    }

    pub fn needs_review(&self) -> bool {
        self.entropy() > ENTROPY_REVIEW_THRESHOLD
    }
}
