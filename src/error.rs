use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

use crate::config::UNHANDLED_CONTEXT_CHARS;
use crate::types::{SortVariant, Stage};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// Failure reported by a single collaborator (merge, weighting, prediction).
#[derive(Debug, Error)]
pub enum StageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Scoring service error: {0}")]
    Scoring(String),

    #[error("{0}")]
    Other(String),
}

/// Collector call failure: process, automation, parse or empty-result.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("collector could not be started: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("collector exited with {status}: {detail}")]
    Exit { status: String, detail: String },

    #[error("collector reported failure: {0}")]
    Reported(String),

    #[error("collector output was not valid JSON: {0}")]
    Output(String),

    #[error("dataset {path} unreadable: {detail}")]
    Dataset { path: String, detail: String },

    #[error("collector returned no listings")]
    Empty,
}

/// Everything a run can end with besides a prediction.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Credential(String),

    #[error("collection failed for sort variant {variant}: {message}")]
    Collector { variant: SortVariant, message: String },

    #[error("{message}")]
    NoData { message: String },

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: Stage, secs: u64 },

    #[error("unexpected error: {0}")]
    Unhandled(String),
}

impl RunError {
    /// Stable tag for API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::Validation(_) => "validation_error",
            RunError::Credential(_) => "credential_error",
            RunError::Collector { .. } => "collector_error",
            RunError::NoData { .. } => "prediction_data_error",
            RunError::Timeout { .. } => "timeout",
            RunError::Unhandled(_) => "unhandled_error",
        }
    }

    /// Wrap any unexpected failure, keeping only a bounded slice of its text.
    pub fn unhandled(context: impl std::fmt::Display) -> Self {
        let text = context.to_string();
        let cut: String = text.chars().take(UNHANDLED_CONTEXT_CHARS).collect();
        if cut.len() < text.len() {
            RunError::Unhandled(format!("{cut}…"))
        } else {
            RunError::Unhandled(cut)
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            RunError::Validation(_) | RunError::Credential(_) => StatusCode::BAD_REQUEST,
            RunError::Collector { .. } => StatusCode::BAD_GATEWAY,
            RunError::NoData { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RunError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            RunError::Unhandled(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StageError> for RunError {
    fn from(e: StageError) -> Self {
        RunError::unhandled(e)
    }
}

impl IntoResponse for RunError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "ok": false,
            "kind": self.kind(),
            "error": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}
