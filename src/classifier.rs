//! # Maturity Classifier Wrapper
//! Thin deterministic wrapper around a CNN backend: logits → softmax →
//! arg-max label. The wrapper never assigns the sentinel label; gating
//! happens in detection/reconciliation.
//!
//! Demo mode inflates the *displayed* confidence for live presentations.
//! It is not production behavior: the label and the statistics used for
//! gating always come from the true scores.

use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::pipeline::PipelineConfig;
use crate::error::ClassifyError;
use crate::labels::{Label, Maturity, CLASS_COUNT};
use crate::scores::{ScoreStatistics, ScoreVector};

/// Lower/upper bound of the demo-mode confidence draw (percent).
const DEMO_CONFIDENCE_RANGE: std::ops::Range<f64> = 85.0..95.0;

/// Raw encoded image handed to model backends and the vision service.
/// Backends decode and resize it into their own fixed-size RGB tensor.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    /// e.g. "image/jpeg"
    pub mime_type: String,
}

impl ImageInput {
    pub fn new(bytes: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Opaque CNN backend. `predict` returns raw logits in `Maturity::ALL` order
/// and is expected to be deterministic for a given input.
pub trait ModelBackend: Send + Sync {
    /// Display name, e.g. "VGG16".
    fn name(&self) -> &str;
    fn predict(&self, image: &ImageInput) -> anyhow::Result<Vec<f64>>;
}

/// Classifier output for one backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub label: Maturity,
    /// Displayed confidence, percent (inflated in demo mode).
    pub confidence: f64,
    /// Displayed distribution (inflated in demo mode).
    pub scores: ScoreVector,
    /// Statistics of the true softmax output, used for gating.
    pub statistics: ScoreStatistics,
    pub demo: bool,
}

impl ClassificationResult {
    /// Build from a true score vector without any inflation.
    pub fn from_scores(scores: ScoreVector) -> Self {
        let statistics = scores.statistics();
        Self {
            label: scores.top_class(),
            confidence: statistics.max_confidence,
            scores,
            statistics,
            demo: false,
        }
    }

    pub fn as_label(&self) -> Label {
        Label::Class(self.label)
    }
}

/// Run `model` on `image` and return the arg-max class with its distribution.
pub fn classify<R: Rng>(
    model: &dyn ModelBackend,
    image: &ImageInput,
    config: &PipelineConfig,
    rng: &mut R,
) -> Result<ClassificationResult, ClassifyError> {
    let logits = model.predict(image).map_err(ClassifyError::Inference)?;
    let scores = ScoreVector::from_logits(&logits)?;
    let mut result = ClassificationResult::from_scores(scores);

    debug!(
        target: "dragonfruit::classifier",
        model = model.name(),
        label = %result.label,
        confidence = result.confidence,
        "classified"
    );

    if config.demo_mode {
        warn!(
            target: "dragonfruit::classifier",
            model = model.name(),
            "demo mode active: displayed confidence is inflated (not for production)"
        );
        let (confidence, scores) = inflate_scores(&result.scores, rng)?;
        result.confidence = confidence;
        result.scores = scores;
        result.demo = true;
    }
    Ok(result)
}

/// Demo-mode score inflation: the top class gets `max(U[85,95), true)`
/// percent, the rest is split evenly, then renormalized. Never changes the
/// arg-max class.
pub fn inflate_scores<R: Rng>(
    scores: &ScoreVector,
    rng: &mut R,
) -> Result<(f64, ScoreVector), ClassifyError> {
    let top = scores.argmax();
    let true_confidence = scores.as_slice()[top] * 100.0;
    let confidence = rng.random_range(DEMO_CONFIDENCE_RANGE).max(true_confidence);

    let others = (CLASS_COUNT - 1).max(1) as f64;
    let rest = (100.0 - confidence) / others;
    let mut fake: Vec<f64> = (0..CLASS_COUNT)
        .map(|i| if i == top { confidence } else { rest })
        .collect();
    let total: f64 = fake.iter().sum();
    for p in fake.iter_mut() {
        *p /= total;
    }
    Ok((confidence, ScoreVector::new(fake)?))
}
