// src/vision_bootstrap.rs
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::{info, warn};

use crate::classifier::ImageInput;
use crate::config::vision::VisionConfig;
use crate::detection::DetectionResult;
use crate::vision::{build_vision_client, detect, DynVisionClient};

/// 1x1 PNG used by `quick_probe`; enough to exercise auth and parsing.
const PROBE_PNG_B64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

pub struct VisionRuntime {
    pub cfg: VisionConfig,
    pub client: DynVisionClient,
}

impl VisionRuntime {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let cfg = VisionConfig::load_from_file(path)?;
        Ok(Self::from_config(cfg))
    }

    pub fn from_config(cfg: VisionConfig) -> Self {
        // Safe diagnostics: only provider + enabled + key length
        info!(
            target: "dragonfruit::vision",
            "vision cfg loaded: provider={}, model={}, enabled={}, key_len={}",
            cfg.provider,
            cfg.model,
            cfg.enabled,
            cfg.api_key.len()
        );
        let client = build_vision_client(&cfg);
        Self { cfg, client }
    }

    pub async fn probe_image(&self, image: &ImageInput) -> DetectionResult {
        detect(image, self.client.as_ref()).await
    }

    /// Send a tiny built-in image. `None` when the gate is disabled.
    pub async fn quick_probe(&self) -> anyhow::Result<Option<DetectionResult>> {
        if !self.cfg.enabled && self.client.provider_name() == "disabled" {
            warn!(target: "dragonfruit::vision", "vision quick_probe skipped: disabled in config");
            return Ok(None);
        }
        let bytes = BASE64.decode(PROBE_PNG_B64)?;
        let out = self.probe_image(&ImageInput::new(bytes, "image/png")).await;
        info!(target: "dragonfruit::vision", "vision quick_probe => {:?}", out);
        Ok(Some(out))
    }
}
