use axum::Json;
use serde::Serialize;

use crate::record_store::receipt_time;

#[derive(Debug, Serialize)]
pub struct ApiStatus {
    status: &'static str,
    message: &'static str,
    timestamp: String,
}

pub async fn api_test_handler() -> Json<ApiStatus> {
    Json(ApiStatus {
        status: "ok",
        message: "API is up",
        timestamp: receipt_time::format(&receipt_time::now()),
    })
}

pub async fn healthcheck_handler() -> &'static str {
    "Ok"
}
