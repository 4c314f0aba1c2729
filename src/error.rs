//! Typed errors for the gate. Config and bootstrap code uses `anyhow` instead.

use thiserror::Error;

/// Score vector / statistics precondition failures.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoreError {
    #[error("score vector is empty")]
    Empty,

    #[error("expected {expected} scores, got {got}")]
    WrongLength { expected: usize, got: usize },

    #[error("score at index {index} is not a probability: {value}")]
    OutOfRange { index: usize, value: f64 },

    #[error("scores do not sum to 1 (sum = {sum})")]
    NotNormalized { sum: f64 },

    #[error("logit at index {index} is not finite")]
    NonFiniteLogit { index: usize },
}

/// Why the classifier wrapper could not produce a result.
/// Means "prediction unavailable", never "not a dragon fruit".
#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("model inference failed: {0:#}")]
    Inference(anyhow::Error),

    #[error("model returned unusable output: {0}")]
    Scores(#[from] ScoreError),
}

/// Failures talking to the external vision service. All of them are
/// non-fatal: the gate turns them into an indeterminate detection.
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("vision service is disabled")]
    Disabled,

    #[error("missing API key for provider {provider}")]
    MissingApiKey { provider: &'static str },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("vision service returned HTTP {status}")]
    Status { status: u16 },

    #[error("vision service returned no text")]
    EmptyResponse,
}

impl VisionError {
    /// Transient failures worth another attempt at the provider layer.
    pub fn is_retryable(&self) -> bool {
        match self {
            VisionError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            VisionError::Status { status } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Request-level failures surfaced by the pipeline/API.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("model {0} is not loaded")]
    BackendMissing(String),

    #[error("no model is loaded")]
    NoBackends,

    #[error("no model produced a prediction")]
    NoPrediction,

    #[error("prediction unavailable: {0}")]
    Unavailable(#[from] ClassifyError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
