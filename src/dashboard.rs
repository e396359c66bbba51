use chrono::{DateTime, Local, Utc};
use serde_json::Value;

use crate::record_store::WebhookRecord;

/// Milliseconds between polls while auto-refresh is enabled.
pub const AUTO_REFRESH_INTERVAL_MS: u64 = 5_000;

/// The history table as the dashboard shows it: newest first, rows numbered
/// from the total count down to 1.
#[derive(Debug, Default)]
pub struct DashboardView {
    pub total: usize,
    pub rows: Vec<DashboardRow>,
}

#[derive(Debug, PartialEq)]
pub struct DashboardRow {
    pub number: usize,
    pub received_at: String,
    pub payload: String,
}

impl DashboardView {
    pub fn from_records(records: &[WebhookRecord]) -> Self {
        let total = records.len();
        let rows = records
            .iter()
            .rev()
            .enumerate()
            .map(|(index, record)| DashboardRow {
                number: total - index,
                received_at: format_received_at(&record.timestamp),
                payload: pretty_payload(&record.data),
            })
            .collect();

        DashboardView { total, rows }
    }
}

fn format_received_at(timestamp: &DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%d.%m.%Y, %H:%M:%S")
        .to_string()
}

fn pretty_payload(data: &Value) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string())
}
