use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::model::ModelVariant;

/// One or more contract fields were absent, null or blank.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Missing required inputs: {missing:?}")]
pub struct ValidationError {
    pub missing: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("No JSON body provided")]
    EmptyBody,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Invalid dteday format: {0}")]
    DateParse(String),
    #[error("{0}")]
    Format(String),
    #[error("Missing required features for {mode} prediction: {missing:?}")]
    MissingFeatures { mode: &'static str, missing: Vec<String> },
    #[error("Invalid mode. Must be auto, hour, or day")]
    InvalidMode(String),
    #[error("Feature alignment error: prepared {prepared} features, expected {expected}")]
    FeatureAlignment { prepared: usize, expected: usize },
    #[error("{} model not loaded", .0.label())]
    ModelUnavailable(ModelVariant),
    #[error("Prediction failed: {0}")]
    Prediction(String),
}

impl PipelineError {
    /// True for errors the caller can fix by changing the request.
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            PipelineError::FeatureAlignment { .. }
                | PipelineError::ModelUnavailable(_)
                | PipelineError::Prediction(_)
        )
    }
}

/// HTTP-facing error; renders as `{ "error": <message> }`.
#[derive(Debug)]
pub enum ApiError {
    /// 400
    BadRequest(String),
    /// 429
    TooManyRequests(String),
    /// 500, message is safe to show
    Internal(String),
    /// 503
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::FeatureAlignment { prepared, expected } => {
                tracing::error!(prepared, expected, "feature vector does not match model schema");
                ApiError::Internal("Feature alignment error".into())
            }
            PipelineError::ModelUnavailable(_) => ApiError::Unavailable(err.to_string()),
            PipelineError::Prediction(detail) => {
                tracing::error!(error = %detail, "model inference failed");
                ApiError::Internal("Prediction failed".into())
            }
            user => ApiError::BadRequest(user.to_string()),
        }
    }
}
