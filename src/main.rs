//! # Dragon Fruit Gate binary
//! Boots the Axum HTTP server with the configured pipeline and vision gate.
//! Model backends are registered by embedding applications through
//! `Pipeline::with_primary` / `with_secondary`; this binary serves the API
//! with whatever is registered (none by default, so predictions answer 503).

use anyhow::Context;
use tracing::{info, warn};

use dragonfruit_gate::config::vision::DEFAULT_VISION_CONFIG_PATH;
use dragonfruit_gate::metrics::Metrics;
use dragonfruit_gate::vision_bootstrap::VisionRuntime;
use dragonfruit_gate::{router, AppState, Pipeline, PipelineConfig, VisionConfig};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";
/// Set to `1` to send a tiny test image to the vision gate at startup.
const ENV_VISION_QUICK_PROBE: &str = "VISION_QUICK_PROBE";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    dragonfruit_gate::init_tracing();

    let config = PipelineConfig::load().context("loading pipeline config")?;
    if config.demo_mode {
        warn!("DEMO MODE is on: displayed confidence is inflated, not for production");
    }

    let vision_cfg = match VisionConfig::load_from_file(DEFAULT_VISION_CONFIG_PATH) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(error = %e, "vision config unavailable, vision gate disabled");
            VisionConfig::default()
        }
    };
    let runtime = VisionRuntime::from_config(vision_cfg);
    if std::env::var(ENV_VISION_QUICK_PROBE).ok().as_deref() == Some("1") {
        match runtime.quick_probe().await {
            Ok(Some(d)) => info!(outcome = d.outcome(), reason = %d.reason, "vision quick probe finished"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "vision quick probe didn't run"),
        }
    }
    let provider = runtime.cfg.provider.clone();
    let vision = runtime.client;

    let metrics = Metrics::init(config.confidence_threshold)?;
    let pipeline = Pipeline::new(config, vision);
    if pipeline.slots().iter().all(|s| !s.is_loaded()) {
        warn!("no model backends registered; prediction routes will answer 503");
    }

    let app = router(AppState::new(pipeline).with_metrics(metrics.handle.clone()));

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, vision = %provider, "dragonfruit gate listening");
    axum::serve(listener, app).await?;
    Ok(())
}
