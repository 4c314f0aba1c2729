//! # Prediction Pipeline
//! Per-request orchestration: one vision-gate answer per image, the
//! detection chain per backend, the classifier wrapper and, on the dual
//! route, cross-model reconciliation.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::anon_hash;
use crate::classifier::{classify, ClassificationResult, ImageInput, ModelBackend};
use crate::config::pipeline::PipelineConfig;
use crate::detection::{DetectionChain, DetectionResult, DetectionSource};
use crate::error::{ClassifyError, PipelineError, Result};
use crate::labels::Label;
use crate::reconcile::{reconcile, BackendOutcome};
use crate::vision::{self, DynVisionClient};

pub const PRIMARY_KEY: &str = "vgg16";
pub const SECONDARY_KEY: &str = "mobilenetv2";

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "dragonfruit_detection_total",
            "Detection chain answers by source and outcome."
        );
        describe_counter!(
            "dragonfruit_reconcile_override_total",
            "Dual predictions overridden to invalid."
        );
        describe_counter!(
            "dragonfruit_classify_failures_total",
            "Model backends that failed to produce scores."
        );
        describe_counter!(
            "dragonfruit_vision_calls_total",
            "Vision gate calls by outcome."
        );
        describe_histogram!(
            "dragonfruit_predict_duration_ms",
            "End-to-end prediction time in milliseconds."
        );
    });
}

/// A named model position; `model` is `None` when it failed to load.
#[derive(Clone)]
pub struct ModelSlot {
    pub key: String,
    pub model: Option<Arc<dyn ModelBackend>>,
}

impl ModelSlot {
    pub fn empty(key: impl Into<String>) -> Self {
        Self {
            key: key.into().to_ascii_lowercase(),
            model: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    fn display_name(&self) -> String {
        self.model
            .as_ref()
            .map(|m| m.name().to_string())
            .unwrap_or_else(|| self.key.clone())
    }
}

/// Final answer for one backend.
#[derive(Debug, Clone, Serialize)]
pub struct Prediction {
    pub model: String,
    pub label: Label,
    pub detection: DetectionResult,
    /// `None` when inference was skipped or unavailable.
    pub classification: Option<ClassificationResult>,
}

impl Prediction {
    pub fn is_valid(&self) -> bool {
        !self.label.is_invalid()
    }
}

/// Result of the dual route after reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct DualPrediction {
    pub primary: Option<Prediction>,
    pub secondary: Option<Prediction>,
    pub message: String,
}

pub struct Pipeline {
    config: PipelineConfig,
    vision: DynVisionClient,
    primary: ModelSlot,
    secondary: ModelSlot,
    rng: Mutex<StdRng>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, vision: DynVisionClient) -> Self {
        ensure_metrics_described();
        let rng = match config.demo_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            config,
            vision,
            primary: ModelSlot::empty(PRIMARY_KEY),
            secondary: ModelSlot::empty(SECONDARY_KEY),
            rng: Mutex::new(rng),
        }
    }

    pub fn with_primary(mut self, model: Arc<dyn ModelBackend>) -> Self {
        self.primary.model = Some(model);
        self
    }

    pub fn with_secondary(mut self, model: Arc<dyn ModelBackend>) -> Self {
        self.secondary.model = Some(model);
        self
    }

    pub fn vision_provider(&self) -> &'static str {
        self.vision.provider_name()
    }

    pub fn slots(&self) -> [&ModelSlot; 2] {
        [&self.primary, &self.secondary]
    }

    fn slot(&self, key: &str) -> Option<&ModelSlot> {
        let key = key.to_ascii_lowercase();
        self.slots().into_iter().find(|s| s.key == key)
    }

    /// Single-model route. Classification failure is an error here.
    pub async fn predict_one(&self, key: &str, image: &ImageInput) -> Result<Prediction> {
        let slot = self
            .slot(key)
            .ok_or_else(|| PipelineError::BackendMissing(key.to_string()))?;
        let model = slot
            .model
            .as_ref()
            .ok_or_else(|| PipelineError::BackendMissing(key.to_string()))?;

        let started = Instant::now();
        let image_id = anon_hash(&image.bytes);
        let chain = DetectionChain::from_config(&self.config);
        let vision = self.vision_answer(&chain, image).await;

        let prediction = if chain.short_circuits(&vision) {
            info!(target: "dragonfruit::pipeline", %image_id, model = %slot.key, "vision gate rejected image, inference skipped");
            record_detection(&vision);
            Prediction {
                model: model.name().to_string(),
                label: Label::Invalid,
                detection: vision,
                classification: None,
            }
        } else {
            let classification = self.classify_with(model.as_ref(), image).map_err(|e| {
                counter!("dragonfruit_classify_failures_total").increment(1);
                warn!(target: "dragonfruit::pipeline", %image_id, model = %slot.key, error = %e, "classification unavailable");
                PipelineError::Unavailable(e)
            })?;
            let detection = chain.resolve(&vision, Some(&classification));
            record_detection(&detection);
            let label = if detection.is_rejection() {
                Label::Invalid
            } else {
                classification.as_label()
            };
            Prediction {
                model: model.name().to_string(),
                label,
                detection,
                classification: Some(classification),
            }
        };

        observe_duration(started);
        info!(
            target: "dragonfruit::pipeline",
            %image_id,
            model = %slot.key,
            label = %prediction.label,
            source = prediction.detection.source.as_str(),
            "prediction done"
        );
        Ok(prediction)
    }

    /// Dual route: both backends, then reconciliation. Unavailable backends
    /// become `None` slots; only "nothing at all" is an error.
    pub async fn predict_both(&self, image: &ImageInput) -> Result<DualPrediction> {
        if !self.primary.is_loaded() && !self.secondary.is_loaded() {
            return Err(PipelineError::NoBackends);
        }

        let started = Instant::now();
        let image_id = anon_hash(&image.bytes);
        let chain = DetectionChain::from_config(&self.config);
        let vision = self.vision_answer(&chain, image).await;

        if chain.short_circuits(&vision) {
            info!(target: "dragonfruit::pipeline", %image_id, "vision gate rejected image, inference skipped");
            record_detection(&vision);
            let rejected = |slot: &ModelSlot| {
                slot.is_loaded().then(|| Prediction {
                    model: slot.display_name(),
                    label: Label::Invalid,
                    detection: vision.clone(),
                    classification: None,
                })
            };
            observe_duration(started);
            return Ok(DualPrediction {
                primary: rejected(&self.primary),
                secondary: rejected(&self.secondary),
                message: "Image is not a dragon fruit".to_string(),
            });
        }

        let a = self.outcome_for(&self.primary, &chain, &vision, image, &image_id);
        let b = self.outcome_for(&self.secondary, &chain, &vision, image, &image_id);
        let (la, lb) = reconcile(&a, &b);

        let primary = finish(&self.primary, a, la);
        let secondary = finish(&self.secondary, b, lb);
        observe_duration(started);

        let message = match (&primary, &secondary) {
            (None, None) => return Err(PipelineError::NoPrediction),
            (Some(p), Some(s)) if !p.is_valid() && !s.is_valid() => "Image is not a dragon fruit",
            (Some(_), Some(_)) => "Prediction from both models complete",
            _ => "Prediction from one model only",
        };
        info!(
            target: "dragonfruit::pipeline",
            %image_id,
            primary = ?primary.as_ref().map(|p| p.label),
            secondary = ?secondary.as_ref().map(|p| p.label),
            "dual prediction done"
        );
        Ok(DualPrediction {
            primary,
            secondary,
            message: message.to_string(),
        })
    }

    async fn vision_answer(&self, chain: &DetectionChain<'_>, image: &ImageInput) -> DetectionResult {
        if !chain.uses_vision() {
            return DetectionResult::indeterminate(DetectionSource::Vision, "vision gate not configured");
        }
        vision::detect(image, self.vision.as_ref()).await
    }

    fn classify_with(
        &self,
        model: &dyn ModelBackend,
        image: &ImageInput,
    ) -> std::result::Result<ClassificationResult, ClassifyError> {
        let mut rng = self.rng.lock().expect("demo rng mutex poisoned");
        classify(model, image, &self.config, &mut *rng)
    }

    fn outcome_for(
        &self,
        slot: &ModelSlot,
        chain: &DetectionChain<'_>,
        vision: &DetectionResult,
        image: &ImageInput,
        image_id: &str,
    ) -> BackendOutcome {
        let Some(model) = slot.model.as_ref() else {
            return BackendOutcome {
                detection: DetectionResult::indeterminate(DetectionSource::Default, "model not loaded"),
                classification: None,
            };
        };

        let classification = match self.classify_with(model.as_ref(), image) {
            Ok(c) => Some(c),
            Err(e) => {
                counter!("dragonfruit_classify_failures_total").increment(1);
                warn!(target: "dragonfruit::pipeline", %image_id, model = %slot.key, error = %e, "classification unavailable");
                None
            }
        };
        let detection = chain.resolve(vision, classification.as_ref());
        record_detection(&detection);
        debug!(target: "dragonfruit::pipeline", %image_id, model = %slot.key, outcome = detection.outcome(), "detection resolved");
        BackendOutcome {
            detection,
            classification,
        }
    }
}

fn finish(slot: &ModelSlot, outcome: BackendOutcome, label: Option<Label>) -> Option<Prediction> {
    if !slot.is_loaded() {
        return None;
    }
    Some(Prediction {
        model: slot.display_name(),
        label: label?,
        detection: outcome.detection,
        classification: outcome.classification,
    })
}

fn record_detection(d: &DetectionResult) {
    counter!(
        "dragonfruit_detection_total",
        "source" => d.source.as_str(),
        "outcome" => d.outcome()
    )
    .increment(1);
}

fn observe_duration(started: Instant) {
    histogram!("dragonfruit_predict_duration_ms").record(started.elapsed().as_secs_f64() * 1000.0);
}
