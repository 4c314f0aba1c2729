// tests/config_env.rs
//
// Config loading with env overrides. Env-mutating tests run serially.

mod common;

use std::fs;
use std::path::PathBuf;

use common::EnvSnapshot;
use dragonfruit_gate::config::pipeline::{
    ENV_CONFIDENCE_THRESHOLD, ENV_DEMO_MODE, ENV_PIPELINE_CONFIG_PATH, ENV_RULE_SET,
};
use dragonfruit_gate::{PipelineConfig, RuleSet, Strategy, VisionConfig};

fn write_temp(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("dragonfruit_{}_{}", std::process::id(), name));
    fs::write(&path, contents).expect("write temp config");
    path
}

fn clear_overrides() -> [(&'static str, Option<&'static str>); 3] {
    [
        (ENV_CONFIDENCE_THRESHOLD, None),
        (ENV_DEMO_MODE, None),
        (ENV_RULE_SET, None),
    ]
}

#[test]
#[serial_test::serial]
fn missing_file_gives_defaults() {
    let mut pairs = clear_overrides().to_vec();
    pairs.push((ENV_PIPELINE_CONFIG_PATH, Some("does/not/exist.toml")));
    let _env = EnvSnapshot::set(&pairs);

    let cfg = PipelineConfig::load().expect("defaults");
    assert_eq!(cfg, PipelineConfig::default());
    assert_eq!(cfg.confidence_threshold, 75.0);
    assert!(!cfg.demo_mode);
}

#[test]
#[serial_test::serial]
fn file_values_then_env_overrides() {
    let path = write_temp(
        "pipeline.toml",
        r#"
        [pipeline]
        confidence_threshold = 60.0
        rule_set = "margin"
        detection_chain = ["heuristic", "vision", "accept"]
        "#,
    );
    let path_str = path.to_string_lossy().to_string();

    let mut pairs = clear_overrides().to_vec();
    pairs.push((ENV_PIPELINE_CONFIG_PATH, Some(path_str.as_str())));
    let _env = EnvSnapshot::set(&pairs);

    let cfg = PipelineConfig::load().unwrap();
    assert_eq!(cfg.confidence_threshold, 60.0);
    assert_eq!(cfg.detection_chain[0], Strategy::Heuristic);

    let _over = EnvSnapshot::set(&[
        (ENV_CONFIDENCE_THRESHOLD, Some("150")),
        (ENV_DEMO_MODE, Some("true")),
        (ENV_RULE_SET, Some("BANDED")),
    ]);
    let cfg = PipelineConfig::load().unwrap();
    assert_eq!(cfg.confidence_threshold, 100.0);
    assert!(cfg.demo_mode);
    assert_eq!(cfg.rule_set, RuleSet::Banded);

    let _ = fs::remove_file(path);
}

#[test]
#[serial_test::serial]
fn garbage_env_values_are_ignored() {
    let mut pairs = clear_overrides().to_vec();
    pairs.push((ENV_PIPELINE_CONFIG_PATH, Some("does/not/exist.toml")));
    let _env = EnvSnapshot::set(&pairs);
    let _bad = EnvSnapshot::set(&[
        (ENV_CONFIDENCE_THRESHOLD, Some("high")),
        (ENV_RULE_SET, Some("strict")),
        (ENV_DEMO_MODE, Some("0")),
    ]);

    let cfg = PipelineConfig::load().unwrap();
    assert_eq!(cfg.confidence_threshold, 75.0);
    assert_eq!(cfg.rule_set, RuleSet::Margin);
    assert!(!cfg.demo_mode);
}

#[test]
#[serial_test::serial]
fn malformed_file_is_an_error() {
    let path = write_temp("broken.toml", "[pipeline\nconfidence_threshold = ");
    let path_str = path.to_string_lossy().to_string();
    let _env = EnvSnapshot::set(&[(ENV_PIPELINE_CONFIG_PATH, Some(path_str.as_str()))]);

    assert!(PipelineConfig::load().is_err());
    let _ = fs::remove_file(path);
}

#[test]
#[serial_test::serial]
fn vision_key_from_env() {
    let json = r#"{"enabled": true, "provider": "gemini", "api_key": "ENV"}"#;

    let _env = EnvSnapshot::set(&[("GEMINI_API_KEY", Some("k-123"))]);
    let cfg = VisionConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.api_key, "k-123");
    drop(_env);

    let _env = EnvSnapshot::set(&[("GEMINI_API_KEY", None)]);
    let err = VisionConfig::from_json_str(json).unwrap_err();
    assert!(err.to_string().contains("GEMINI_API_KEY"));
}

#[test]
fn shipped_configs_parse() {
    let pipeline = PipelineConfig::load_from_file("config/pipeline.toml").expect("pipeline.toml");
    assert_eq!(pipeline, PipelineConfig::default());

    let raw = fs::read_to_string("config/vision.json").expect("vision.json");
    let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(v["provider"], "gemini");
    assert_eq!(v["model"], "gemini-2.0-flash");
}
