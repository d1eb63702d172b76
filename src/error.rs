use thiserror::Error;

/// Errors raised by the scoring core.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("invalid value {value} for {field}: {reason}")]
    InvalidFeature {
        field: &'static str,
        value: f64,
        reason: String,
    },

    #[error("missing required field {0}")]
    MissingField(&'static str),

    #[error("model artifact for {model} is unusable: {reason}")]
    ModelArtifact { model: String, reason: String },

    #[error("{model} prediction failed: {reason}")]
    Predictor { model: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, ScoringError>;
