use axum::{
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;

/// URL prefix that mirrors the on-disk storage directory. Nothing under it is
/// ever served, whatever the method.
pub const STORAGE_URL_PREFIX: &str = "/data";

pub fn is_storage_path(path: &str) -> bool {
    match path.strip_prefix(STORAGE_URL_PREFIX) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

pub async fn deny_storage_paths<B>(request: Request<B>, next: Next<B>) -> Response {
    if is_storage_path(request.uri().path()) {
        tracing::warn!("Blocked access to {}", request.uri().path());
        return AppError::Forbidden.into_response();
    }

    next.run(request).await
}
