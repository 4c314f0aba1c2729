//! # Dual-Model Reconciliation
//! Combines two backends' outputs for the same image. Two independent models
//! that are both unsure, or that disagree without a clear margin, are read
//! as an out-of-domain input and both are overridden to the sentinel label.

use metrics::counter;
use tracing::info;

use crate::classifier::ClassificationResult;
use crate::detection::DetectionResult;
use crate::labels::Label;
use crate::scores::ScoreStatistics;

// both confident but flat
const CONFIDENT_MIN: f64 = 85.0;
const CONFIDENT_MAX_DIFF: f64 = 55.0;
const CONFIDENT_ENTROPY_FRACTION: f64 = 0.35;
const CONFIDENT_MAX_RATIO: f64 = 5.0;

// disagreement
const DISAGREE_MAX_DIFF: f64 = 40.0;

// both in the mid band and flat
const MID_LOW: f64 = 75.0;
const MID_HIGH: f64 = 85.0;
const MID_MAX_DIFF: f64 = 30.0;
const MID_ENTROPY_FRACTION: f64 = 0.40;

/// Everything reconciliation needs to know about one backend.
#[derive(Debug, Clone)]
pub struct BackendOutcome {
    pub detection: DetectionResult,
    /// `None` when the backend was unavailable or skipped.
    pub classification: Option<ClassificationResult>,
}

impl BackendOutcome {
    /// Label before cross-model checks.
    pub fn own_label(&self) -> Option<Label> {
        if self.detection.is_rejection() {
            return Some(Label::Invalid);
        }
        self.classification.as_ref().map(ClassificationResult::as_label)
    }
}

/// Which cross-model condition forced the override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideReason {
    ConfidentButFlat,
    Disagreement,
    MidBandFlat,
}

/// Final labels for `(a, b)`. `None` means "unavailable".
pub fn reconcile(a: &BackendOutcome, b: &BackendOutcome) -> (Option<Label>, Option<Label>) {
    let (la, lb) = (a.own_label(), b.own_label());

    let (Some(Label::Class(_)), Some(Label::Class(_))) = (la, lb) else {
        return (la, lb);
    };
    let (Some(ca), Some(cb)) = (&a.classification, &b.classification) else {
        return (la, lb);
    };

    match should_override(ca, cb) {
        Some(reason) => {
            counter!("dragonfruit_reconcile_override_total").increment(1);
            info!(target: "dragonfruit::reconcile", ?reason, "both predictions overridden to invalid");
            (Some(Label::Invalid), Some(Label::Invalid))
        }
        None => (la, lb),
    }
}

/// Cross-model checks over the true statistics of both backends.
pub fn should_override(a: &ClassificationResult, b: &ClassificationResult) -> Option<OverrideReason> {
    let (sa, sb) = (&a.statistics, &b.statistics);
    let both = |f: fn(&ScoreStatistics) -> bool| f(sa) && f(sb);

    if both(|s| {
        s.max_confidence >= CONFIDENT_MIN
            && s.confidence_diff < CONFIDENT_MAX_DIFF
            && s.entropy_above(CONFIDENT_ENTROPY_FRACTION)
            && s.confidence_ratio < CONFIDENT_MAX_RATIO
    }) {
        return Some(OverrideReason::ConfidentButFlat);
    }

    if a.label != b.label && both(|s| s.confidence_diff < DISAGREE_MAX_DIFF) {
        return Some(OverrideReason::Disagreement);
    }

    if both(|s| {
        (MID_LOW..MID_HIGH).contains(&s.max_confidence)
            && s.confidence_diff < MID_MAX_DIFF
            && s.entropy_above(MID_ENTROPY_FRACTION)
    }) {
        return Some(OverrideReason::MidBandFlat);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::DetectionSource;
    use crate::labels::Maturity;
    use crate::scores::ScoreVector;

    fn accepted() -> DetectionResult {
        DetectionResult::new(DetectionSource::Heuristic, true, 90.0, "ok")
    }

    fn outcome(v: [f64; 3]) -> BackendOutcome {
        BackendOutcome {
            detection: accepted(),
            classification: Some(ClassificationResult::from_scores(
                ScoreVector::new(v.to_vec()).unwrap(),
            )),
        }
    }

    #[test]
    fn confident_distinct_predictions_survive() {
        let a = outcome([0.97, 0.02, 0.01]);
        let b = outcome([0.95, 0.03, 0.02]);
        assert_eq!(
            reconcile(&a, &b),
            (Some(Label::Class(Maturity::Defect)), Some(Label::Class(Maturity::Defect)))
        );
    }

    #[test]
    fn disagreement_with_thin_margins_overrides_both() {
        let a = outcome([0.60, 0.30, 0.10]);
        let b = outcome([0.25, 0.15, 0.60]);
        assert_eq!(
            should_override(
                a.classification.as_ref().unwrap(),
                b.classification.as_ref().unwrap()
            ),
            Some(OverrideReason::Disagreement)
        );
        assert_eq!(reconcile(&a, &b), (Some(Label::Invalid), Some(Label::Invalid)));
    }

    #[test]
    fn disagreement_with_one_clear_margin_is_kept() {
        let a = outcome([0.97, 0.02, 0.01]);
        let b = outcome([0.25, 0.15, 0.60]);
        assert_eq!(
            reconcile(&a, &b),
            (Some(Label::Class(Maturity::Defect)), Some(Label::Class(Maturity::Mature)))
        );
    }

    // With three classes a top score of 75%+ leaves at most 25pp for the
    // runner-up, so the flat-distribution rules only fire on statistics
    // coming from wider heads. Build those directly.
    fn constructed(label: Maturity, max: f64, diff: f64, entropy: f64, ratio: f64) -> BackendOutcome {
        let mut c = ClassificationResult::from_scores(ScoreVector::new(vec![0.4, 0.3, 0.3]).unwrap());
        c.label = label;
        c.confidence = max;
        c.statistics = ScoreStatistics {
            max_confidence: max,
            confidence_diff: diff,
            entropy,
            max_entropy: 3f64.ln(),
            confidence_ratio: ratio,
        };
        BackendOutcome {
            detection: accepted(),
            classification: Some(c),
        }
    }

    #[test]
    fn both_confident_but_flat_overrides_both() {
        // >= 85%, 40pp gap, entropy above 0.35*ln3 (~0.385), ratio < 5
        let a = constructed(Maturity::Mature, 88.0, 40.0, 0.6, 2.6);
        let b = constructed(Maturity::Mature, 86.0, 40.0, 0.5, 2.6);
        assert_eq!(
            should_override(
                a.classification.as_ref().unwrap(),
                b.classification.as_ref().unwrap()
            ),
            Some(OverrideReason::ConfidentButFlat)
        );
        assert_eq!(reconcile(&a, &b), (Some(Label::Invalid), Some(Label::Invalid)));

        let sharp = constructed(Maturity::Mature, 88.0, 40.0, 0.2, 2.6);
        assert_eq!(reconcile(&a, &sharp).1, Some(Label::Class(Maturity::Mature)));
    }

    #[test]
    fn mid_band_flat_overrides_both() {
        let a = constructed(Maturity::Immature, 78.0, 25.0, 0.7, 2.3);
        let b = constructed(Maturity::Immature, 80.0, 20.0, 0.6, 2.4);
        assert_eq!(
            should_override(
                a.classification.as_ref().unwrap(),
                b.classification.as_ref().unwrap()
            ),
            Some(OverrideReason::MidBandFlat)
        );

        let high = constructed(Maturity::Immature, 85.0, 20.0, 0.3, 2.5);
        assert_eq!(
            should_override(
                a.classification.as_ref().unwrap(),
                high.classification.as_ref().unwrap()
            ),
            None
        );
    }

    #[test]
    fn rejected_backend_gets_sentinel_and_missing_one_stays_none() {
        let mut a = outcome([0.97, 0.02, 0.01]);
        a.detection = DetectionResult::new(DetectionSource::Vision, false, 90.0, "an apple");
        let b = BackendOutcome {
            detection: accepted(),
            classification: None,
        };
        assert_eq!(reconcile(&a, &b), (Some(Label::Invalid), None));
    }
}
