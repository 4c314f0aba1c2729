// src/config/pipeline.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, io, path::Path};
use tracing::info;

use crate::detection::Strategy;
use crate::heuristic::RuleSet;

// --- env defaults & names ---
pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 75.0;

pub const ENV_PIPELINE_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";
pub const ENV_CONFIDENCE_THRESHOLD: &str = "CONFIDENCE_THRESHOLD";
pub const ENV_DEMO_MODE: &str = "DEMO_MODE";
pub const ENV_RULE_SET: &str = "HEURISTIC_RULE_SET";

/// Explicit per-call configuration of the decision pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum vision-gate confidence (percent) for its answer to be decisive.
    pub confidence_threshold: f64,
    /// Inflate displayed confidence for live demos. Never for production.
    pub demo_mode: bool,
    /// Seed for the demo-mode RNG; entropy-seeded when absent.
    pub demo_seed: Option<u64>,
    pub rule_set: RuleSet,
    pub detection_chain: Vec<Strategy>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            demo_mode: false,
            demo_seed: None,
            rule_set: RuleSet::Margin,
            detection_chain: Strategy::default_chain(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PipelineFile {
    #[serde(default)]
    pipeline: PipelineConfig,
}

impl PipelineConfig {
    /// Load from `PIPELINE_CONFIG_PATH` (or `config/pipeline.toml`), then
    /// apply env overrides. A missing file means defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = env::var(ENV_PIPELINE_CONFIG_PATH)
            .unwrap_or_else(|_| DEFAULT_PIPELINE_CONFIG_PATH.to_string());
        let mut cfg = match Self::load_from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) if is_not_found(&e) => {
                info!(target: "dragonfruit::config", %path, "pipeline config not found, using defaults");
                Self::default()
            }
            Err(e) => return Err(e),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_toml_str(&data)
    }

    /// Parse the `[pipeline]` table of a TOML document.
    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let file: PipelineFile = toml::from_str(toml_str)?;
        Ok(file.pipeline.sanitized())
    }

    /// `CONFIDENCE_THRESHOLD`, `DEMO_MODE`, `HEURISTIC_RULE_SET`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(t) = parse_threshold_env(env::var(ENV_CONFIDENCE_THRESHOLD).ok()) {
            self.confidence_threshold = t;
        }
        if let Ok(raw) = env::var(ENV_DEMO_MODE) {
            self.demo_mode = matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on");
        }
        if let Some(rules) = env::var(ENV_RULE_SET).ok().as_deref().and_then(RuleSet::parse) {
            self.rule_set = rules;
        }
    }

    fn sanitized(mut self) -> Self {
        if !self.confidence_threshold.is_finite() {
            self.confidence_threshold = DEFAULT_CONFIDENCE_THRESHOLD;
        }
        self.confidence_threshold = self.confidence_threshold.clamp(0.0, 100.0);
        if self.detection_chain.is_empty() {
            self.detection_chain = Strategy::default_chain();
        }
        self
    }
}

// parse optional float env and clamp to <0.0..=100.0>
fn parse_threshold_env(raw: Option<String>) -> Option<f64> {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 100.0))
}

fn is_not_found(e: &anyhow::Error) -> bool {
    e.downcast_ref::<io::Error>()
        .is_some_and(|io| io.kind() == io::ErrorKind::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_table() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            [pipeline]
            confidence_threshold = 80.0
            demo_mode = true
            demo_seed = 9
            rule_set = "banded"
            detection_chain = ["heuristic", "accept"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.confidence_threshold, 80.0);
        assert!(cfg.demo_mode);
        assert_eq!(cfg.demo_seed, Some(9));
        assert_eq!(cfg.rule_set, RuleSet::Banded);
        assert_eq!(cfg.detection_chain, vec![Strategy::Heuristic, Strategy::Accept]);
    }

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let cfg = PipelineConfig::from_toml_str("[pipeline]\n").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        let cfg = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
    }

    #[test]
    fn threshold_is_clamped_and_chain_never_empty() {
        let cfg = PipelineConfig::from_toml_str(
            "[pipeline]\nconfidence_threshold = 250.0\ndetection_chain = []\n",
        )
        .unwrap();
        assert_eq!(cfg.confidence_threshold, 100.0);
        assert_eq!(cfg.detection_chain, Strategy::default_chain());
    }

    #[test]
    fn threshold_env_parsing() {
        assert_eq!(parse_threshold_env(Some(" 60 ".into())), Some(60.0));
        assert_eq!(parse_threshold_env(Some("-5".into())), Some(0.0));
        assert_eq!(parse_threshold_env(Some("NaN".into())), None);
        assert_eq!(parse_threshold_env(Some("abc".into())), None);
        assert_eq!(parse_threshold_env(None), None);
    }

    #[test]
    fn unknown_strategy_is_an_error() {
        assert!(PipelineConfig::from_toml_str("[pipeline]\ndetection_chain = [\"oracle\"]\n").is_err());
    }
}
