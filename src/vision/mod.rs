//! Vision gate: provider abstraction + response parsing.
//! The external multimodal model is asked whether the image shows a dragon
//! fruit at all. Every failure becomes an indeterminate detection; the gate
//! never turns "could not ask" into "no".

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::classifier::ImageInput;
use crate::config::vision::VisionConfig;
use crate::detection::{DetectionResult, DetectionSource};
use crate::error::VisionError;

pub mod gemini;

pub use gemini::GeminiProvider;

/// Instruction sent with every image.
pub const DETECTION_PROMPT: &str = r#"You are an expert at identifying dragon fruit (pitaya).

Analyze this image carefully and answer with JSON only, no markdown:
{
    "is_dragon_fruit": true or false,
    "confidence": number 0-100,
    "reason": "short reason"
}

A DRAGON FRUIT is:
- a fruit with pink/red/purple skin and prominent green scales
- round or oval with the characteristic scaly texture
- white or red flesh with small black seeds (if cut)
- not an apple, orange, banana, mango or any other fruit
- not a document, text, certificate or other non-fruit object
- not the dragon fruit plant or tree (the fruit only)

Answer ONLY with the JSON object, no markdown, no extra explanation."#;

/// Confidence assigned by the keyword fallback.
const MANUAL_PARSE_YES: f64 = 75.0;
const MANUAL_PARSE_NO: f64 = 50.0;

/// Trait object used by the pipeline and the probe binary.
pub trait VisionClient: Send + Sync {
    /// Send `prompt` plus the image; return the model's raw text answer.
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        image: &'a ImageInput,
    ) -> Pin<Box<dyn Future<Output = Result<String, VisionError>> + Send + 'a>>;
    /// Provider name for diagnostics/logs.
    fn provider_name(&self) -> &'static str;
}

/// Convenient alias used by callers.
pub type DynVisionClient = Arc<dyn VisionClient>;

/// Factory: build a client according to config and environment variables.
///
/// * If `VISION_TEST_MODE=mock`, returns a deterministic mock client.
/// * Else if `config.enabled==false`, returns a disabled client.
/// * Else builds the configured provider. A provider that cannot be built
///   (no key) degrades to disabled with a warning.
pub fn build_vision_client(config: &VisionConfig) -> DynVisionClient {
    if std::env::var("VISION_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(MockVisionClient::dragon_fruit());
    }

    if !config.enabled {
        return Arc::new(DisabledVisionClient);
    }

    match config.provider.as_str() {
        "gemini" => match GeminiProvider::from_config(config) {
            Ok(provider) => Arc::new(provider),
            Err(e) => {
                warn!(target: "dragonfruit::vision", error = %e, "gemini provider unavailable, vision gate disabled");
                Arc::new(DisabledVisionClient)
            }
        },
        "mock" => Arc::new(MockVisionClient::dragon_fruit()),
        other => {
            warn!(target: "dragonfruit::vision", provider = other, "unknown vision provider, vision gate disabled");
            Arc::new(DisabledVisionClient)
        }
    }
}

/// Always fails with `VisionError::Disabled`; used when the gate is off.
pub struct DisabledVisionClient;

impl VisionClient for DisabledVisionClient {
    fn generate<'a>(
        &'a self,
        _prompt: &'a str,
        _image: &'a ImageInput,
    ) -> Pin<Box<dyn Future<Output = Result<String, VisionError>> + Send + 'a>> {
        Box::pin(async { Err(VisionError::Disabled) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Returns a fixed answer for tests/local runs.
#[derive(Clone)]
pub struct MockVisionClient {
    pub fixed: String,
}

impl MockVisionClient {
    pub fn new(fixed: impl Into<String>) -> Self {
        Self {
            fixed: fixed.into(),
        }
    }

    pub fn dragon_fruit() -> Self {
        Self::new(r#"{"is_dragon_fruit": true, "confidence": 95, "reason": "mock answer"}"#)
    }
}

impl VisionClient for MockVisionClient {
    fn generate<'a>(
        &'a self,
        _prompt: &'a str,
        _image: &'a ImageInput,
    ) -> Pin<Box<dyn Future<Output = Result<String, VisionError>> + Send + 'a>> {
        let out = self.fixed.clone();
        Box::pin(async move { Ok(out) })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

/// Ask the vision service whether `image` shows a dragon fruit.
pub async fn detect(image: &ImageInput, client: &dyn VisionClient) -> DetectionResult {
    let provider = client.provider_name();
    match client.generate(DETECTION_PROMPT, image).await {
        Ok(text) => {
            let result = parse_detection_response(&text);
            counter!("dragonfruit_vision_calls_total", "outcome" => result.outcome()).increment(1);
            info!(
                target: "dragonfruit::vision",
                provider,
                outcome = result.outcome(),
                confidence = result.confidence,
                "vision gate answered"
            );
            result
        }
        Err(VisionError::Disabled) => {
            counter!("dragonfruit_vision_calls_total", "outcome" => "disabled").increment(1);
            debug!(target: "dragonfruit::vision", "vision gate disabled");
            DetectionResult::indeterminate(DetectionSource::Vision, "vision gate disabled")
        }
        Err(e) => {
            counter!("dragonfruit_vision_calls_total", "outcome" => "error").increment(1);
            warn!(target: "dragonfruit::vision", provider, error = %e, "vision gate failed");
            DetectionResult::indeterminate(DetectionSource::Vision, format!("vision error: {e}"))
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawAnswer {
    is_dragon_fruit: bool,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
}

static FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*(.*?)\s*```$").expect("fence regex"));
static ANSWER_FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"is_dragon_fruit"\s*:\s*(true|false)"#).expect("answer field regex")
});
static CONFIDENCE_FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"confidence"\s*:\s*(-?\d+(?:\.\d+)?)"#).expect("confidence field regex")
});
// A negation earlier in the same sentence as the domain keyword.
static NEGATED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:not|no|isn't|isnt|never|neither|nor|bukan)\b[^.!?\n]*?(?:dragon\s*-?\s*fruit|pitaya|pitahaya|buah\s+naga)",
    )
    .expect("negation regex")
});
static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:dragon\s*-?\s*fruit|pitaya|pitahaya|buah\s+naga)").expect("domain regex")
});
static LEADING_ANSWER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\W*(yes|no)\b").expect("leading answer regex"));

/// Turn the service's free text into a `DetectionResult`.
///
/// Order: strip code fences, parse JSON, retry on the outermost `{...}`,
/// then fall back to keyword matching.
pub fn parse_detection_response(text: &str) -> DetectionResult {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return DetectionResult::indeterminate(DetectionSource::Vision, "empty vision response");
    }

    let body = strip_fences(trimmed);
    if let Some(answer) = parse_json(body).or_else(|| outermost_object(body).and_then(parse_json)) {
        return answer;
    }

    manual_parse(body)
}

/// Fallback for answers that are not valid JSON. An explicit
/// `"is_dragon_fruit"` field wins, then negated domain keywords, then a
/// leading yes/no, then plain domain keywords.
fn manual_parse(body: &str) -> DetectionResult {
    let snippet: String = body.chars().take(80).collect();
    let reason = format!("manual parse: {snippet}");

    if let Some(field) = ANSWER_FIELD_RE.captures(body).and_then(|c| c.get(1)) {
        let yes = field.as_str().eq_ignore_ascii_case("true");
        let confidence = CONFIDENCE_FIELD_RE
            .captures(body)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(if yes { MANUAL_PARSE_YES } else { MANUAL_PARSE_NO });
        return DetectionResult::new(DetectionSource::Vision, yes, confidence, reason);
    }

    let leading = LEADING_ANSWER_RE
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase());
    let yes = if NEGATED_RE.is_match(body) || leading.as_deref() == Some("no") {
        false
    } else {
        leading.as_deref() == Some("yes") || DOMAIN_RE.is_match(body)
    };

    let confidence = if yes { MANUAL_PARSE_YES } else { MANUAL_PARSE_NO };
    DetectionResult::new(DetectionSource::Vision, yes, confidence, reason)
}

fn strip_fences(text: &str) -> &str {
    FENCE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn parse_json(text: &str) -> Option<DetectionResult> {
    let raw: RawAnswer = serde_json::from_str(text).ok()?;
    Some(DetectionResult::new(
        DetectionSource::Vision,
        raw.is_dragon_fruit,
        raw.confidence.unwrap_or(0.0),
        raw.reason.unwrap_or_default(),
    ))
}
