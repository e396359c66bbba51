use axum::{extract::State, Json};

use crate::error::AppError;
use crate::record_store::WebhookRecord;
use crate::AppState;

/// Full history, oldest first.
pub async fn handler(State(state): State<AppState>) -> Result<Json<Vec<WebhookRecord>>, AppError> {
    let records = state.store.read_all().await.map_err(AppError::Load)?;
    tracing::debug!("Serving {} records", records.len());
    Ok(Json(records))
}
