//! # Score Vector Utilities
//! Softmax plus the statistics the validity heuristics are built on.
//! Pure functions, no I/O.

use serde::Serialize;

use crate::error::ScoreError;
use crate::labels::{Maturity, CLASS_COUNT};

/// Guards `ln(0)` and division by zero without moving non-zero results.
pub const EPSILON: f64 = 1e-10;

/// Allowed drift of a probability vector's sum from 1.
const SUM_TOLERANCE: f64 = 1e-4;

/// Probability distribution over `Maturity::ALL`, validated on construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ScoreVector(Vec<f64>);

impl ScoreVector {
    pub fn new(scores: Vec<f64>) -> Result<Self, ScoreError> {
        if scores.is_empty() {
            return Err(ScoreError::Empty);
        }
        if scores.len() != CLASS_COUNT {
            return Err(ScoreError::WrongLength {
                expected: CLASS_COUNT,
                got: scores.len(),
            });
        }
        for (index, &value) in scores.iter().enumerate() {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ScoreError::OutOfRange { index, value });
            }
        }
        let sum: f64 = scores.iter().sum();
        if (sum - 1.0).abs() > SUM_TOLERANCE {
            return Err(ScoreError::NotNormalized { sum });
        }
        Ok(Self(scores))
    }

    /// Softmax over raw logits, validated as a `ScoreVector`.
    pub fn from_logits(logits: &[f64]) -> Result<Self, ScoreError> {
        Self::new(softmax(logits)?)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Index of the top class (first one wins ties).
    pub fn argmax(&self) -> usize {
        argmax(&self.0)
    }

    pub fn top_class(&self) -> Maturity {
        // Length is fixed to CLASS_COUNT by the constructor.
        Maturity::from_index(self.argmax()).unwrap_or(Maturity::Defect)
    }

    pub fn statistics(&self) -> ScoreStatistics {
        ScoreStatistics::from_validated(&self.0)
    }

    /// `(label name, percentage)` pairs for display.
    pub fn percentages(&self) -> Vec<(Maturity, f64)> {
        Maturity::ALL
            .iter()
            .zip(self.0.iter())
            .map(|(m, p)| (*m, p * 100.0))
            .collect()
    }
}

/// Derived, immutable statistics over one score vector.
/// Percent-valued fields are in 0–100, entropy is in nats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreStatistics {
    pub max_confidence: f64,
    pub confidence_diff: f64,
    pub entropy: f64,
    pub max_entropy: f64,
    pub confidence_ratio: f64,
}

impl ScoreStatistics {
    /// Compute statistics over any non-empty slice. Does not require the
    /// slice to be normalized, so degenerate inputs (K=1, all zeros) still
    /// produce defined values.
    pub fn from_scores(v: &[f64]) -> Result<Self, ScoreError> {
        if v.is_empty() {
            return Err(ScoreError::Empty);
        }
        Ok(Self::from_validated(v))
    }

    fn from_validated(v: &[f64]) -> Self {
        let k = v.len();
        let top = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let max_confidence = top * 100.0;

        let confidence_diff = if k > 1 {
            let mut sorted = v.to_vec();
            sorted.sort_by(|a, b| b.total_cmp(a));
            (sorted[0] - sorted[1]) * 100.0
        } else {
            100.0
        };

        // A certain vector gives -p*ln(p+eps) slightly below zero; clamp it.
        let entropy = (-v.iter().map(|p| p * (p + EPSILON).ln()).sum::<f64>()).max(0.0);
        let max_entropy = (k as f64).ln();

        let mean_pct = v.iter().sum::<f64>() / k as f64 * 100.0;
        let confidence_ratio = max_confidence / (mean_pct + EPSILON);

        Self {
            max_confidence,
            confidence_diff,
            entropy,
            max_entropy,
            confidence_ratio,
        }
    }

    /// `entropy > fraction × max_entropy`.
    pub fn entropy_above(&self, fraction: f64) -> bool {
        self.entropy > self.max_entropy * fraction
    }
}

/// Numerically stable softmax (shifts by the max logit before exponentiating).
pub fn softmax(logits: &[f64]) -> Result<Vec<f64>, ScoreError> {
    if logits.is_empty() {
        return Err(ScoreError::Empty);
    }
    if let Some(index) = logits.iter().position(|x| !x.is_finite()) {
        return Err(ScoreError::NonFiniteLogit { index });
    }
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    Ok(exps.into_iter().map(|e| e / sum).collect())
}

fn argmax(v: &[f64]) -> usize {
    let mut best = 0;
    for (i, x) in v.iter().enumerate() {
        if *x > v[best] {
            best = i;
        }
    }
    best
}
