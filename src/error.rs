use std::{io, path::PathBuf};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures of the record store. Malformed file content is not an error, it
/// reads as an empty history.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to serialize records: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Client-facing text for store failures. The full error, which names
/// server paths, only goes to the log.
pub const STORAGE_UNAVAILABLE: &str = "Webhook storage is unavailable, see the server log";

/// Errors surfaced to HTTP clients, always rendered as a JSON body.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found")]
    NotFound { path: String, method: String },

    #[error("Access denied")]
    Forbidden,

    #[error("Invalid JSON body")]
    BadRequest(String),

    #[error("Payload too large")]
    PayloadTooLarge(String),

    #[error("Failed to store webhook")]
    Persist(#[source] StoreError),

    #[error("Failed to load data")]
    Load(#[source] StoreError),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Persist(_) | AppError::Load(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = ErrorBody {
            success: false,
            error: self.to_string(),
            message: None,
            path: None,
            method: None,
        };

        match self {
            AppError::NotFound { path, method } => {
                body.path = Some(path);
                body.method = Some(method);
            }
            AppError::Forbidden => {}
            AppError::BadRequest(message) | AppError::PayloadTooLarge(message) => {
                body.message = Some(message);
            }
            AppError::Persist(err) | AppError::Load(err) => {
                tracing::error!("{}: {}", body.error, err);
                body.message = Some(STORAGE_UNAVAILABLE.to_string());
            }
        }

        (status, Json(body)).into_response()
    }
}
