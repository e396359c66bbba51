use axum::{extract::OriginalUri, http::Method};

use crate::error::AppError;

pub async fn handler(method: Method, OriginalUri(uri): OriginalUri) -> AppError {
    tracing::warn!("Not found: {} {}", method, uri);
    AppError::NotFound {
        path: uri.path().to_string(),
        method: method.to_string(),
    }
}
