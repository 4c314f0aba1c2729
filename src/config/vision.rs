// src/config/vision.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

pub const DEFAULT_VISION_CONFIG_PATH: &str = "config/vision.json";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

fn default_model() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}
fn default_timeout_secs() -> u64 {
    15
}
fn default_max_retries() -> u32 {
    1
}

/// Build-time config loaded from `config/vision.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionConfig {
    pub enabled: bool,
    /// "gemini" | "mock" | "disabled" (case-insensitive)
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from GEMINI_API_KEY
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra attempts for transient failures (timeouts, 429, 5xx).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "disabled".to_string(),
            model: default_model(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl VisionConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn from_json_str(data: &str) -> anyhow::Result<Self> {
        let mut cfg: VisionConfig = serde_json::from_str(data)?;

        // Normalize provider
        cfg.provider = cfg.provider.trim().to_lowercase();

        // Resolve api key if "ENV"
        if cfg.api_key.trim().eq_ignore_ascii_case("env") {
            cfg.api_key = match cfg.provider.as_str() {
                "gemini" => env::var("GEMINI_API_KEY")
                    .map_err(|_| anyhow::anyhow!("Missing GEMINI_API_KEY env var"))?,
                "mock" | "disabled" => String::new(),
                other => anyhow::bail!("Unsupported provider in config: {other}"),
            };
        }

        if cfg.timeout_secs == 0 {
            cfg.timeout_secs = default_timeout_secs();
        }
        if cfg.model.trim().is_empty() {
            cfg.model = default_model();
        }

        Ok(cfg)
    }

}
