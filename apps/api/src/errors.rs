use std::path::PathBuf;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::llm_client::{LlmError, ProviderId};
use crate::models::run::Stage;
use crate::pipeline::schemas::SchemaError;

/// Run-level error taxonomy.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
///
/// Patch-level failures are `patch::PatchError` and never surface here.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid run config: {0}")]
    InvalidConfig(String),

    #[error("Missing base document: {}", .0.display())]
    MissingBaseDocument(PathBuf),

    #[error("Provider '{provider}' for stage {stage} is not registered")]
    UnknownProvider { stage: Stage, provider: ProviderId },

    #[error("Provider call for stage {stage} failed: {source}")]
    ProviderFailure { stage: Stage, source: LlmError },

    #[error("Stage {stage} returned malformed JSON: {message}")]
    MalformedOutput { stage: Stage, message: String },

    #[error("Stage {stage} output violates its schema: {error}")]
    SchemaViolation { stage: Stage, error: SchemaError },

    #[error("Build failed: {0}")]
    BuildFailure(String),

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::InvalidConfig(_) => {
                (StatusCode::BAD_REQUEST, "INVALID_CONFIG", self.to_string())
            }
            AppError::MissingBaseDocument(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "MISSING_BASE_DOCUMENT",
                self.to_string(),
            ),
            AppError::UnknownProvider { .. } => {
                (StatusCode::BAD_REQUEST, "UNKNOWN_PROVIDER", self.to_string())
            }
            AppError::ProviderFailure { source, .. } => {
                tracing::error!("Provider failure (status {:?}): {source}", source.status());
                (StatusCode::BAD_GATEWAY, "PROVIDER_FAILURE", self.to_string())
            }
            AppError::MalformedOutput { .. } => {
                (StatusCode::BAD_GATEWAY, "MALFORMED_OUTPUT", self.to_string())
            }
            AppError::SchemaViolation { .. } => {
                (StatusCode::BAD_GATEWAY, "SCHEMA_VIOLATION", self.to_string())
            }
            AppError::BuildFailure(msg) => {
                tracing::error!("Build failure: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "BUILD_FAILURE",
                    self.to_string(),
                )
            }
            AppError::Storage(e) => {
                tracing::error!("Storage error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Serialization(e) => {
                tracing::error!("Serialization error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "SERIALIZATION_ERROR",
                    "A serialization error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
