//! Runs the vision gate on one image file and prints the detection as JSON.
//!
//! Usage: `vision-probe <image> [config/vision.json]`

use std::path::Path;

use anyhow::Context;
use dragonfruit_gate::config::vision::DEFAULT_VISION_CONFIG_PATH;
use dragonfruit_gate::vision_bootstrap::VisionRuntime;
use dragonfruit_gate::ImageInput;

fn mime_for(path: &Path) -> anyhow::Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "png" => Ok("image/png"),
        "webp" => Ok("image/webp"),
        "gif" => Ok("image/gif"),
        other => anyhow::bail!("unsupported image extension: {other:?}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    dragonfruit_gate::init_tracing();

    let mut args = std::env::args().skip(1);
    let image_path = args
        .next()
        .context("usage: vision-probe <image> [config/vision.json]")?;
    let config_path = args
        .next()
        .unwrap_or_else(|| DEFAULT_VISION_CONFIG_PATH.to_string());

    let path = Path::new(&image_path);
    let mime = mime_for(path)?;
    let bytes = std::fs::read(path).with_context(|| format!("reading {image_path}"))?;

    let rt = VisionRuntime::from_path(&config_path)
        .with_context(|| format!("loading {config_path}"))?;
    let result = rt.probe_image(&ImageInput::new(bytes, mime)).await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
