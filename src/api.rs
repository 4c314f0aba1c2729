use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::classifier::ImageInput;
use crate::detection::DetectionResult;
use crate::error::PipelineError;
use crate::metrics::metrics_router;
use crate::pipeline::{DualPrediction, Pipeline, Prediction};

/// Upload size cap for image bodies.
pub const BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Present when a Prometheus recorder is installed; adds `/metrics`.
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/predict/both", post(predict_both))
        .route("/api/predict/{model}", post(predict_one));

    if let Some(handle) = state.metrics.clone() {
        app = app.merge(metrics_router(handle));
    }

    app.layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

// ---- errors ----

pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let status = match e {
            PipelineError::BackendMissing(_) | PipelineError::NoBackends => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            PipelineError::Unavailable(_) | PipelineError::NoPrediction => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            detail: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

// ---- response shapes ----

#[derive(Serialize)]
pub struct StatisticsOut {
    pub confidence_diff: f64,
    pub entropy: f64,
    pub max_entropy: f64,
    pub confidence_ratio: f64,
    pub is_valid: bool,
}

#[derive(Serialize)]
pub struct PredictionResponse {
    pub model: String,
    pub prediction: String,
    pub confidence: f64,
    /// Per-label percentages; `null` for invalid results.
    pub scores: Option<BTreeMap<String, f64>>,
    /// `null` when inference was skipped.
    pub statistics: Option<StatisticsOut>,
    pub detection: DetectionResult,
    pub demo: bool,
}

impl From<Prediction> for PredictionResponse {
    fn from(p: Prediction) -> Self {
        let is_valid = p.is_valid();
        // Invalid results show the true top-class confidence, never the demo one.
        let confidence = match &p.classification {
            Some(c) if is_valid => c.confidence,
            Some(c) => c.statistics.max_confidence,
            None => p.detection.confidence,
        };
        let scores = p.classification.as_ref().filter(|_| is_valid).map(|c| {
            c.scores
                .percentages()
                .into_iter()
                .map(|(m, pct)| (m.name().to_string(), pct))
                .collect()
        });
        let statistics = p.classification.as_ref().map(|c| StatisticsOut {
            confidence_diff: c.statistics.confidence_diff,
            entropy: c.statistics.entropy,
            max_entropy: c.statistics.max_entropy,
            confidence_ratio: c.statistics.confidence_ratio,
            is_valid,
        });
        Self {
            model: p.model,
            prediction: p.label.as_str().to_string(),
            confidence,
            scores,
            statistics,
            demo: is_valid && p.classification.as_ref().is_some_and(|c| c.demo),
            detection: p.detection,
        }
    }
}

#[derive(Serialize)]
pub struct CombinedPredictionResponse {
    pub primary: Option<PredictionResponse>,
    pub secondary: Option<PredictionResponse>,
    pub message: String,
}

impl From<DualPrediction> for CombinedPredictionResponse {
    fn from(d: DualPrediction) -> Self {
        Self {
            primary: d.primary.map(Into::into),
            secondary: d.secondary.map(Into::into),
            message: d.message,
        }
    }
}

// ---- handlers ----

async fn root(State(state): State<AppState>) -> Json<Value> {
    let mut loaded = Map::new();
    let mut endpoints = Map::new();
    for slot in state.pipeline.slots() {
        loaded.insert(slot.key.clone(), Value::Bool(slot.is_loaded()));
        endpoints.insert(
            format!("predict_{}", slot.key),
            Value::String(format!("/api/predict/{}", slot.key)),
        );
    }
    endpoints.insert("predict_both".into(), "/api/predict/both".into());
    endpoints.insert("health".into(), "/api/health".into());

    Json(json!({
        "message": "Dragon Fruit Classification API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "models_loaded": loaded,
        "vision_provider": state.pipeline.vision_provider(),
        "endpoints": endpoints,
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let mut out = Map::new();
    out.insert("status".into(), "healthy".into());
    for slot in state.pipeline.slots() {
        out.insert(format!("{}_loaded", slot.key), Value::Bool(slot.is_loaded()));
    }
    Json(Value::Object(out))
}

async fn predict_one(
    State(state): State<AppState>,
    Path(model): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PredictionResponse>, ApiError> {
    let image = image_from_request(&headers, body)?;
    let prediction = state.pipeline.predict_one(&model, &image).await.map_err(|e| {
        warn!(target: "dragonfruit::api", %model, error = %e, "prediction failed");
        ApiError::from(e)
    })?;
    Ok(Json(prediction.into()))
}

async fn predict_both(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CombinedPredictionResponse>, ApiError> {
    let image = image_from_request(&headers, body)?;
    let dual = state.pipeline.predict_both(&image).await.map_err(|e| {
        warn!(target: "dragonfruit::api", error = %e, "dual prediction failed");
        ApiError::from(e)
    })?;
    Ok(Json(dual.into()))
}

fn image_from_request(headers: &HeaderMap, body: Bytes) -> Result<ImageInput, ApiError> {
    let mime = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if !mime.starts_with("image/") {
        return Err(ApiError::bad_request("File must be an image"));
    }
    if body.is_empty() {
        return Err(ApiError::bad_request("Empty image body"));
    }
    let mime = mime.split(';').next().unwrap_or("").trim().to_string();
    Ok(ImageInput::new(body.to_vec(), mime))
}
