//! Gemini provider (generateContent API). Requires an API key, resolved by
//! `VisionConfig` from `GEMINI_API_KEY` when configured as "ENV".

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::VisionClient;
use crate::classifier::ImageInput;
use crate::config::vision::VisionConfig;
use crate::error::VisionError;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const TEMPERATURE: f32 = 0.1;
/// Linear backoff step between attempts.
const RETRY_STEP: Duration = Duration::from_millis(500);

pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl GeminiProvider {
    pub fn from_config(config: &VisionConfig) -> Result<Self, VisionError> {
        if config.api_key.trim().is_empty() {
            return Err(VisionError::MissingApiKey { provider: "gemini" });
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("dragonfruit-gate/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    fn endpoint(&self) -> String {
        format!("{API_BASE}/{}:generateContent", self.model)
    }

    async fn generate_impl(&self, prompt: &str, image: &ImageInput) -> Result<String, VisionError> {
        let data = BASE64.encode(&image.bytes);
        let req = Req {
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: prompt },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: &image.mime_type,
                            data: &data,
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: TEMPERATURE,
            },
        };

        let mut attempt = 0;
        loop {
            match self.send_once(&req).await {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(target: "dragonfruit::vision", attempt, error = %e, "gemini call failed, retrying");
                    tokio::time::sleep(RETRY_STEP * attempt).await;
                }
                other => return other,
            }
        }
    }

    async fn send_once(&self, req: &Req<'_>) -> Result<String, VisionError> {
        let resp = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(VisionError::Status {
                status: status.as_u16(),
            });
        }
        let body: Resp = resp.json().await?;
        extract_text(&body).ok_or(VisionError::EmptyResponse)
    }
}

impl VisionClient for GeminiProvider {
    fn generate<'a>(
        &'a self,
        prompt: &'a str,
        image: &'a ImageInput,
    ) -> Pin<Box<dyn Future<Output = Result<String, VisionError>> + Send + 'a>> {
        Box::pin(self.generate_impl(prompt, image))
    }
    fn provider_name(&self) -> &'static str {
        "gemini"
    }
}

// ---- wire types ----

#[derive(Serialize)]
struct Req<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    Text { text: &'a str },
    InlineData { inline_data: InlineData<'a> },
}

#[derive(Serialize)]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<RespPart>,
}

#[derive(Deserialize)]
struct RespPart {
    #[serde(default)]
    text: Option<String>,
}

/// Concatenated text parts of the first candidate, `None` when blank.
fn extract_text(body: &Resp) -> Option<String> {
    let content = body.candidates.first()?.content.as_ref()?;
    let text: String = content
        .parts
        .iter()
        .filter_map(|p| p.text.as_deref())
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let req = Req {
            contents: vec![Content {
                parts: vec![
                    Part::Text { text: "hi" },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: "image/png",
                            data: "AAEC",
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig { temperature: 0.1 },
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(v["contents"][0]["parts"][1]["inline_data"]["mime_type"], "image/png");
        assert_eq!(v["contents"][0]["parts"][1]["inline_data"]["data"], "AAEC");
        assert!(v["generationConfig"]["temperature"].is_number());
    }

    #[test]
    fn extracts_first_candidate_text() {
        let body: Resp = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"is_dragon_fruit\":"},{"text":" true}"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_text(&body).as_deref(), Some("{\"is_dragon_fruit\": true}"));

        let empty: Resp = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert_eq!(extract_text(&empty), None);
        let blocked: Resp = serde_json::from_str(r#"{"candidates":[{"finishReason":"SAFETY"}]}"#).unwrap();
        assert_eq!(extract_text(&blocked), None);
    }

    #[test]
    fn missing_key_is_an_error() {
        let cfg = VisionConfig {
            enabled: true,
            provider: "gemini".into(),
            ..VisionConfig::default()
        };
        assert!(matches!(
            GeminiProvider::from_config(&cfg),
            Err(VisionError::MissingApiKey { provider: "gemini" })
        ));
    }
}
