//! # Validity Heuristic Engine
//! Decides from score statistics alone whether the arg-max class is a
//! trustworthy in-domain prediction or should be rejected as "not a dragon
//! fruit". Pure, no I/O, no state between calls.
//!
//! A closed 3-class model projects high confidence onto out-of-domain inputs
//! too, so the required margin tightens as raw confidence rises into the
//! 85–98% band instead of loosening.
//!
//! Two rule sets exist and are never mixed:
//! - `margin` (canonical): confidence floor + margin/entropy per band.
//! - `banded`: adds a graduated required-gap table for the 70–75% band and
//!   confidence-ratio signals in the upper bands.

use serde::{Deserialize, Serialize};

use crate::scores::ScoreStatistics;

/// Below this max confidence (percent) the model is simply not sure enough.
pub const CONFIDENCE_FLOOR: f64 = 70.0;
const MID_BAND_START: f64 = 75.0;
const HIGH_BAND_START: f64 = 85.0;
const SATURATED_START: f64 = 98.0;

// Mid band [75, 85)
const MID_MIN_DIFF: f64 = 30.0;
const MID_ENTROPY_FRACTION: f64 = 0.50;
const MID_ENTROPY_DIFF: f64 = 40.0;
const MID_MIN_RATIO: f64 = 3.0;

// High band [85, 98)
const HIGH_MIN_DIFF: f64 = 50.0;
const HIGH_ENTROPY_FRACTION: f64 = 0.45;
const HIGH_ENTROPY_DIFF: f64 = 60.0;
const HIGH_MIN_RATIO: f64 = 4.0;

// Banded rule set, gap band [70, 75)
const GAP_ENTROPY_FRACTION: f64 = 0.55;
const GAP_MIN_RATIO: f64 = 3.0;

/// Required confidence gap (pp) per confidence band, banded rule set.
const REQUIRED_GAP_TABLE: [(f64, f64, f64); 5] = [
    (70.0, 80.0, 35.0),
    (80.0, 85.0, 45.0),
    (85.0, 90.0, 70.0),
    (90.0, 95.0, 75.0),
    (95.0, 98.0, 80.0),
];
const REQUIRED_GAP_DEFAULT: f64 = 85.0;

/// Which rule set `evaluate` applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSet {
    #[default]
    Margin,
    Banded,
}

impl RuleSet {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "margin" => Some(RuleSet::Margin),
            "banded" => Some(RuleSet::Banded),
            _ => None,
        }
    }
}

/// Confidence band of the top class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
    /// < 70
    BelowFloor,
    /// [70, 75)
    Gap,
    /// [75, 85)
    Mid,
    /// [85, 98)
    High,
    /// >= 98
    Saturated,
}

impl Band {
    pub fn of(max_confidence: f64) -> Self {
        if max_confidence < CONFIDENCE_FLOOR {
            Band::BelowFloor
        } else if max_confidence < MID_BAND_START {
            Band::Gap
        } else if max_confidence < HIGH_BAND_START {
            Band::Mid
        } else if max_confidence < SATURATED_START {
            Band::High
        } else {
            Band::Saturated
        }
    }
}

/// The rule that rejected a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectRule {
    /// max confidence under the absolute floor
    ConfidenceFloor,
    /// top-two gap under the band minimum
    NarrowMargin,
    /// high entropy together with a modest gap
    DiffuseDistribution,
    /// low top-to-mean ratio together with a modest gap
    LowRatio,
    /// gap under the banded table's requirement
    RequiredGap,
}

/// Outcome of one evaluation: accepted, or rejected by a named rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Verdict {
    pub band: Band,
    pub rejected_by: Option<RejectRule>,
}

impl Verdict {
    fn accept(band: Band) -> Self {
        Self {
            band,
            rejected_by: None,
        }
    }

    fn reject(band: Band, rule: RejectRule) -> Self {
        Self {
            band,
            rejected_by: Some(rule),
        }
    }

    pub fn is_invalid(&self) -> bool {
        self.rejected_by.is_some()
    }

    /// Short, ASCII, human-readable explanation.
    pub fn reason(&self, stats: &ScoreStatistics) -> String {
        let detail = format!(
            "max {:.1}%, gap {:.1}pp, entropy {:.3}/{:.3}, ratio {:.2}",
            stats.max_confidence,
            stats.confidence_diff,
            stats.entropy,
            stats.max_entropy,
            stats.confidence_ratio
        );
        match self.rejected_by {
            None => format!("accepted ({:?} band): {detail}", self.band),
            Some(rule) => format!("rejected by {rule:?} ({:?} band): {detail}", self.band),
        }
    }
}

/// Evaluate `stats` under the chosen rule set.
pub fn evaluate(stats: &ScoreStatistics, rules: RuleSet) -> Verdict {
    match rules {
        RuleSet::Margin => evaluate_margin(stats),
        RuleSet::Banded => evaluate_banded(stats),
    }
}

/// Canonical rule set. `[70, 75)` and `[98, 100]` fall through to accept.
pub fn evaluate_margin(stats: &ScoreStatistics) -> Verdict {
    let band = Band::of(stats.max_confidence);
    let diff = stats.confidence_diff;

    match band {
        Band::BelowFloor => Verdict::reject(band, RejectRule::ConfidenceFloor),
        Band::Mid => {
            if diff < MID_MIN_DIFF {
                Verdict::reject(band, RejectRule::NarrowMargin)
            } else if stats.entropy_above(MID_ENTROPY_FRACTION) && diff < MID_ENTROPY_DIFF {
                Verdict::reject(band, RejectRule::DiffuseDistribution)
            } else {
                Verdict::accept(band)
            }
        }
        Band::High => {
            if diff < HIGH_MIN_DIFF {
                Verdict::reject(band, RejectRule::NarrowMargin)
            } else if stats.entropy_above(HIGH_ENTROPY_FRACTION) && diff < HIGH_ENTROPY_DIFF {
                Verdict::reject(band, RejectRule::DiffuseDistribution)
            } else {
                Verdict::accept(band)
            }
        }
        Band::Gap | Band::Saturated => Verdict::accept(band),
    }
}

/// Alternative rule set with ratio signals and the required-gap table.
pub fn evaluate_banded(stats: &ScoreStatistics) -> Verdict {
    let band = Band::of(stats.max_confidence);
    let diff = stats.confidence_diff;
    let ratio = stats.confidence_ratio;

    match band {
        Band::BelowFloor => Verdict::reject(band, RejectRule::ConfidenceFloor),
        Band::Gap => {
            if diff < required_gap(stats.max_confidence) {
                Verdict::reject(band, RejectRule::RequiredGap)
            } else if stats.entropy_above(GAP_ENTROPY_FRACTION) {
                Verdict::reject(band, RejectRule::DiffuseDistribution)
            } else if ratio < GAP_MIN_RATIO {
                Verdict::reject(band, RejectRule::LowRatio)
            } else {
                Verdict::accept(band)
            }
        }
        Band::Mid => match evaluate_margin(stats).rejected_by {
            Some(rule) => Verdict::reject(band, rule),
            None if ratio < MID_MIN_RATIO && diff < MID_ENTROPY_DIFF => {
                Verdict::reject(band, RejectRule::LowRatio)
            }
            None => Verdict::accept(band),
        },
        Band::High => match evaluate_margin(stats).rejected_by {
            Some(rule) => Verdict::reject(band, rule),
            None if ratio < HIGH_MIN_RATIO && diff < HIGH_ENTROPY_DIFF => {
                Verdict::reject(band, RejectRule::LowRatio)
            }
            None => Verdict::accept(band),
        },
        Band::Saturated => Verdict::accept(band),
    }
}

/// Gap (pp) the banded table requires at `max_confidence`.
pub fn required_gap(max_confidence: f64) -> f64 {
    REQUIRED_GAP_TABLE
        .iter()
        .find(|(low, high, _)| (*low..*high).contains(&max_confidence))
        .map(|(_, _, gap)| *gap)
        .unwrap_or(REQUIRED_GAP_DEFAULT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(max_confidence: f64, confidence_diff: f64, entropy: f64, ratio: f64) -> ScoreStatistics {
        ScoreStatistics {
            max_confidence,
            confidence_diff,
            entropy,
            max_entropy: 3f64.ln(),
            confidence_ratio: ratio,
        }
    }

    #[test]
    fn floor_rejects_below_seventy() {
        let v = evaluate_margin(&stats(60.0, 40.0, 0.8, 1.8));
        assert_eq!(v.rejected_by, Some(RejectRule::ConfidenceFloor));
        assert_eq!(v.band, Band::BelowFloor);
    }

    #[test]
    fn mid_band_requires_margin() {
        assert_eq!(
            evaluate_margin(&stats(80.0, 25.0, 0.3, 2.4)).rejected_by,
            Some(RejectRule::NarrowMargin)
        );
        // entropy > 0.5*ln3 (~0.549) and diff < 40
        assert_eq!(
            evaluate_margin(&stats(80.0, 35.0, 0.6, 2.4)).rejected_by,
            Some(RejectRule::DiffuseDistribution)
        );
        assert!(!evaluate_margin(&stats(80.0, 35.0, 0.5, 2.4)).is_invalid());
        assert!(!evaluate_margin(&stats(80.0, 65.0, 0.6, 2.4)).is_invalid());
    }

    #[test]
    fn high_band_is_stricter_than_mid_band() {
        // 45pp passes the mid band but not the high band.
        assert!(!evaluate_margin(&stats(84.9, 45.0, 0.3, 2.5)).is_invalid());
        assert_eq!(
            evaluate_margin(&stats(85.0, 45.0, 0.3, 2.5)).rejected_by,
            Some(RejectRule::NarrowMargin)
        );
        assert_eq!(
            evaluate_margin(&stats(90.0, 55.0, 0.6, 2.7)).rejected_by,
            Some(RejectRule::DiffuseDistribution)
        );
    }

    #[test]
    fn gap_and_saturated_bands_fall_through() {
        assert!(!evaluate_margin(&stats(72.0, 5.0, 1.0, 2.2)).is_invalid());
        assert!(!evaluate_margin(&stats(98.0, 5.0, 1.0, 2.9)).is_invalid());
        assert!(!evaluate_margin(&stats(100.0, 100.0, 0.0, 3.0)).is_invalid());
    }

    #[test]
    fn required_gap_table_lookup() {
        assert_eq!(required_gap(70.0), 35.0);
        assert_eq!(required_gap(79.99), 35.0);
        assert_eq!(required_gap(80.0), 45.0);
        assert_eq!(required_gap(87.0), 70.0);
        assert_eq!(required_gap(92.0), 75.0);
        assert_eq!(required_gap(97.0), 80.0);
        assert_eq!(required_gap(98.0), 85.0);
        assert_eq!(required_gap(50.0), 85.0);
    }

    #[test]
    fn banded_closes_the_seventy_to_seventy_five_gap() {
        let s = stats(72.0, 30.0, 0.4, 3.5);
        assert!(!evaluate_margin(&s).is_invalid());
        assert_eq!(evaluate_banded(&s).rejected_by, Some(RejectRule::RequiredGap));

        let diffuse = stats(72.0, 50.0, 0.7, 3.5);
        assert_eq!(
            evaluate_banded(&diffuse).rejected_by,
            Some(RejectRule::DiffuseDistribution)
        );

        let low_ratio = stats(72.0, 50.0, 0.4, 2.16);
        assert_eq!(evaluate_banded(&low_ratio).rejected_by, Some(RejectRule::LowRatio));
    }

    #[test]
    fn banded_adds_ratio_signal_in_upper_bands() {
        // Passes margin rules in the high band (diff >= 50, low entropy) but
        // the ratio is low and the gap under 60.
        let s = stats(90.0, 55.0, 0.3, 2.7);
        assert!(!evaluate_margin(&s).is_invalid());
        assert_eq!(evaluate_banded(&s).rejected_by, Some(RejectRule::LowRatio));

        let wide = stats(90.0, 82.0, 0.3, 2.7);
        assert!(!evaluate_banded(&wide).is_invalid());
    }

    #[test]
    fn rule_set_parses_case_insensitively() {
        assert_eq!(RuleSet::parse(" Banded "), Some(RuleSet::Banded));
        assert_eq!(RuleSet::parse("margin"), Some(RuleSet::Margin));
        assert_eq!(RuleSet::parse("other"), None);
    }
}
