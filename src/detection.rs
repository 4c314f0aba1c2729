//! # Detection Chain
//! Ordered domain checks ("is this a dragon fruit at all?"). Each strategy
//! answers yes, no, or indeterminate; indeterminate falls through to the next.
//! A weak vision answer is only tentative: the chain keeps looking for a
//! decisive one and falls back to the last tentative answer.

use serde::{Deserialize, Serialize};

use crate::classifier::ClassificationResult;
use crate::config::pipeline::PipelineConfig;
use crate::heuristic::{self, RuleSet, Verdict};
use crate::scores::ScoreStatistics;

/// Which strategy produced a `DetectionResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    Vision,
    Heuristic,
    Default,
}

impl DetectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionSource::Vision => "vision",
            DetectionSource::Heuristic => "heuristic",
            DetectionSource::Default => "default",
        }
    }
}

/// Answer of one domain check. `is_in_domain == None` means indeterminate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub is_in_domain: Option<bool>,
    /// 0–100
    pub confidence: f64,
    pub reason: String,
    pub source: DetectionSource,
}

impl DetectionResult {
    pub fn new(
        source: DetectionSource,
        is_in_domain: bool,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            is_in_domain: Some(is_in_domain),
            confidence: clamp_percent(confidence),
            reason: reason.into(),
            source,
        }
    }

    pub fn indeterminate(source: DetectionSource, reason: impl Into<String>) -> Self {
        Self {
            is_in_domain: None,
            confidence: 0.0,
            reason: reason.into(),
            source,
        }
    }

    /// Default accept used when no detector is available.
    pub fn accept_default() -> Self {
        Self::new(DetectionSource::Default, true, 0.0, "no detector available")
    }

    /// Heuristic answer: in domain unless a rule rejected the prediction.
    /// Confidence is the model's top-class confidence.
    pub fn from_verdict(verdict: &Verdict, stats: &ScoreStatistics) -> Self {
        Self::new(
            DetectionSource::Heuristic,
            !verdict.is_invalid(),
            stats.max_confidence,
            verdict.reason(stats),
        )
    }

    pub fn is_indeterminate(&self) -> bool {
        self.is_in_domain.is_none()
    }

    pub fn is_rejection(&self) -> bool {
        self.is_in_domain == Some(false)
    }

    /// Vision answers below `threshold` are tentative; other sources are
    /// decisive whenever they are determinate.
    pub fn is_decisive(&self, threshold: f64) -> bool {
        match (self.is_in_domain, self.source) {
            (None, _) => false,
            (Some(_), DetectionSource::Vision) => self.confidence >= threshold,
            (Some(_), _) => true,
        }
    }

    pub fn outcome(&self) -> &'static str {
        match self.is_in_domain {
            Some(true) => "in_domain",
            Some(false) => "rejected",
            None => "indeterminate",
        }
    }
}

fn clamp_percent(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// One entry of the configured chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Vision,
    Heuristic,
    Accept,
}

impl Strategy {
    pub fn default_chain() -> Vec<Strategy> {
        vec![Strategy::Vision, Strategy::Heuristic, Strategy::Accept]
    }
}

/// Borrowed view over the chain settings of a `PipelineConfig`.
#[derive(Debug, Clone, Copy)]
pub struct DetectionChain<'a> {
    strategies: &'a [Strategy],
    threshold: f64,
    rules: RuleSet,
}

impl<'a> DetectionChain<'a> {
    pub fn new(strategies: &'a [Strategy], threshold: f64, rules: RuleSet) -> Self {
        Self {
            strategies,
            threshold,
            rules,
        }
    }

    pub fn from_config(config: &'a PipelineConfig) -> Self {
        Self::new(
            &config.detection_chain,
            config.confidence_threshold,
            config.rule_set,
        )
    }

    pub fn uses_vision(&self) -> bool {
        self.strategies.contains(&Strategy::Vision)
    }

    /// True when the vision gate runs first and its answer is a decisive
    /// "no", so model inference can be skipped.
    pub fn short_circuits(&self, vision: &DetectionResult) -> bool {
        self.strategies.first() == Some(&Strategy::Vision)
            && vision.is_rejection()
            && vision.is_decisive(self.threshold)
    }

    /// Walk the chain for one backend. `vision` is the shared per-image
    /// answer; `classification` is `None` when the backend was unavailable.
    pub fn resolve(
        &self,
        vision: &DetectionResult,
        classification: Option<&ClassificationResult>,
    ) -> DetectionResult {
        let mut tentative: Option<DetectionResult> = None;

        for strategy in self.strategies {
            let answer = match strategy {
                Strategy::Vision => vision.clone(),
                Strategy::Heuristic => match classification {
                    Some(c) => {
                        let verdict = heuristic::evaluate(&c.statistics, self.rules);
                        DetectionResult::from_verdict(&verdict, &c.statistics)
                    }
                    None => DetectionResult::indeterminate(
                        DetectionSource::Heuristic,
                        "classification unavailable",
                    ),
                },
                Strategy::Accept => DetectionResult::accept_default(),
            };

            if answer.is_decisive(self.threshold) {
                return answer;
            }
            if !answer.is_indeterminate() {
                tentative = Some(answer);
            }
        }

        tentative.unwrap_or_else(|| {
            DetectionResult::indeterminate(DetectionSource::Default, "no strategy produced an answer")
        })
    }
}
