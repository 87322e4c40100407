//! Same-day delivery ledger.
//!
//! Remembers which `(rule, day, record, recipient)` deliveries already
//! succeeded so a second run on the same day skips them. Keys from any other
//! day are dropped when the ledger is opened.

use crate::clock::CalendarDate;
use crate::error::LedgerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Idempotency key of one delivery.
///
/// Stored field by field, so ids may contain any character. Displayed as
/// `rule_id|YYYY-MM-DD|record_id|recipient`, with `-` standing in for
/// date-triggered rules that have no record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeliveryKey {
    pub rule_id: String,
    /// ISO day of the delivery.
    pub day: String,
    pub record_id: Option<String>,
    /// Lowercased, trimmed address.
    pub recipient: String,
}

impl DeliveryKey {
    pub fn new(rule_id: &str, day: CalendarDate, record_id: Option<&str>, recipient: &str) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            day: day.iso(),
            record_id: record_id.map(str::to_string),
            recipient: recipient.trim().to_lowercase(),
        }
    }
}

impl std::fmt::Display for DeliveryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.rule_id,
            self.day,
            self.record_id.as_deref().unwrap_or("-"),
            self.recipient
        )
    }
}

#[async_trait]
pub trait DeliveryLedger: Send + Sync {
    async fn contains(&self, key: &DeliveryKey) -> bool;

    /// Record a successful delivery.
    async fn record(&self, key: DeliveryKey) -> Result<(), LedgerError>;
}

/// JSON array of keys on disk, rewritten after every recorded delivery.
pub struct FileLedger {
    path: PathBuf,
    keys: Mutex<BTreeSet<DeliveryKey>>,
}

impl FileLedger {
    /// Open (or start) the ledger for `today`.
    ///
    /// # Errors
    /// [`LedgerError::Load`] when the file exists but cannot be read or parsed.
    pub async fn open(path: &Path, today: CalendarDate) -> Result<Self, LedgerError> {
        let load_error = |message: String| LedgerError::Load {
            path: path.display().to_string(),
            message,
        };

        let stored: Vec<DeliveryKey> = match tokio::fs::read(path).await {
            Ok(bytes) if bytes.is_empty() => Vec::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| load_error(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(load_error(e.to_string())),
        };

        let today_iso = today.iso();
        let total = stored.len();
        let keys: BTreeSet<DeliveryKey> = stored
            .into_iter()
            .filter(|key| key.day == today_iso)
            .collect();

        tracing::debug!(
            path = %path.display(),
            kept = keys.len(),
            pruned = total - keys.len(),
            "Delivery ledger opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            keys: Mutex::new(keys),
        })
    }

    pub async fn len(&self) -> usize {
        self.keys.lock().await.len()
    }

    async fn persist(&self, keys: &BTreeSet<DeliveryKey>) -> Result<(), LedgerError> {
        let persist_error = |message: String| LedgerError::Persist {
            path: self.path.display().to_string(),
            message,
        };

        let json = serde_json::to_vec_pretty(keys).map_err(|e| persist_error(e.to_string()))?;

        // Write then rename so a crash never leaves a truncated ledger.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| persist_error(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| persist_error(e.to_string()))
    }
}

#[async_trait]
impl DeliveryLedger for FileLedger {
    async fn contains(&self, key: &DeliveryKey) -> bool {
        self.keys.lock().await.contains(key)
    }

    async fn record(&self, key: DeliveryKey) -> Result<(), LedgerError> {
        let mut keys = self.keys.lock().await;
        if keys.insert(key) {
            self.persist(&keys).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FileLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLedger").field("path", &self.path).finish()
    }
}
