use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::Value;

use crate::error::AppError;
use crate::record_store::{receipt_time, WebhookRecord};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    success: bool,
    message: &'static str,
    timestamp: String,
}

pub async fn handler(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<WebhookAck>, AppError> {
    let body = body.map_err(|rejection| {
        let message = rejection.body_text();
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(message)
        } else {
            AppError::BadRequest(message)
        }
    })?;
    let payload = parse_payload(&body)?;
    tracing::debug!("Webhook payload: {}", payload);

    let record = WebhookRecord::received_now(payload);
    let timestamp = receipt_time::format(&record.timestamp);
    let total = state.store.append(record).await.map_err(AppError::Persist)?;

    tracing::info!("Webhook received at {}, {} stored", timestamp, total);

    Ok(Json(WebhookAck {
        success: true,
        message: "Webhook received and stored",
        timestamp,
    }))
}

/// Any JSON value is accepted as-is; an empty body counts as `{}`.
fn parse_payload(body: &[u8]) -> Result<Value, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }

    serde_json::from_slice(body).map_err(|err| AppError::BadRequest(err.to_string()))
}
