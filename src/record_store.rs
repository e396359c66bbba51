use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{fs, sync::Mutex};

use crate::error::StoreError;

pub const DATA_FILE_NAME: &str = "webhooks_data.json";

/// A received webhook: the server-side receipt time plus the body exactly as
/// it was parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRecord {
    #[serde(with = "receipt_time")]
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl WebhookRecord {
    pub fn received_now(data: Value) -> Self {
        Self {
            timestamp: receipt_time::now(),
            data,
        }
    }
}

/// Receipt timestamps are kept at millisecond precision and written as
/// RFC 3339 with a `Z` suffix, e.g. `2024-05-01T12:00:00.123Z`.
pub mod receipt_time {
    use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(3)
    }

    pub fn format(timestamp: &DateTime<Utc>) -> String {
        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn serialize<S: Serializer>(
        timestamp: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(timestamp))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|timestamp| timestamp.with_timezone(&Utc).trunc_subsecs(3))
            .map_err(D::Error::custom)
    }
}

/// The webhook history, persisted as one JSON array in
/// `<data_dir>/webhooks_data.json`.
///
/// Every read and every read-modify-write cycle holds `lock`, so concurrent
/// deliveries are applied one after another and none of them is lost. New
/// content is written to a sibling temp file and renamed over the old one.
pub struct RecordStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RecordStore {
    /// Opens the store, creating the directory and an empty array file when
    /// they don't exist yet.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let store = Self {
            path: data_dir.as_ref().join(DATA_FILE_NAME),
            lock: Mutex::new(()),
        };

        let exists = fs::try_exists(&store.path)
            .await
            .map_err(|source| StoreError::Read {
                path: store.path.clone(),
                source,
            })?;
        if !exists {
            tracing::info!("Creating empty data file at {}", store.path.display());
            store.write_items(&[]).await?;
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns every stored record, oldest first. Array items that aren't
    /// records are skipped here but stay in the file.
    pub async fn read_all(&self) -> Result<Vec<WebhookRecord>, StoreError> {
        let _guard = self.lock.lock().await;
        let items = self.load_items().await?;
        Ok(into_records(items))
    }

    /// Appends one record and returns the number of array items now stored.
    /// Existing items are written back exactly as they were read.
    pub async fn append(&self, record: WebhookRecord) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().await;
        let mut items = self.load_items().await?;
        items.push(serde_json::to_value(&record)?);
        self.write_items(&items).await?;
        Ok(items.len())
    }

    async fn load_items(&self) -> Result<Vec<Value>, StoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                tracing::warn!(
                    "Data file {} not found, creating a new one",
                    self.path.display()
                );
                if let Err(err) = self.write_items(&[]).await {
                    tracing::error!("Failed to recreate data file: {}", err);
                }
                return Ok(Vec::new());
            }
            Err(err) if err.kind() == ErrorKind::InvalidData => {
                tracing::error!(
                    "Data file {} is not valid UTF-8, treating it as empty",
                    self.path.display()
                );
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        Ok(parse_items(&content))
    }

    async fn write_items(&self, items: &[Value]) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let bytes = serde_json::to_vec_pretty(items)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, bytes).await.map_err(write_err)?;
        fs::rename(&tmp_path, &self.path).await.map_err(write_err)?;

        Ok(())
    }
}

/// Parses the file content leniently: anything that isn't a JSON array reads
/// as an empty history.
fn parse_items(content: &str) -> Vec<Value> {
    if content.trim().is_empty() {
        tracing::warn!("Data file is empty, returning no records");
        return Vec::new();
    }

    let value: Value = match serde_json::from_str(content) {
        Ok(value) => value,
        Err(err) => {
            tracing::error!("Data file is not valid JSON and may be corrupted: {}", err);
            return Vec::new();
        }
    };

    let Value::Array(items) = value else {
        tracing::error!("Data file does not contain an array, returning no records");
        return Vec::new();
    };

    items
}

fn into_records(items: Vec<Value>) -> Vec<WebhookRecord> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::warn!("Skipping malformed record at index {}: {}", index, err);
                None
            }
        })
        .collect()
}
