//! Rolling price history with pluggable persistence.
//!
//! Every aggregator quote doubles as a price observation; a capped window
//! of the most recent points is kept in memory and persisted as JSON
//! through the [`ObjectStore`] seam. Purely observational; the evaluation
//! path never depends on it.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use alloy::primitives::U256;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object store i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt price history payload: {0}")]
    Corrupt(String),
}

/// Bucket/key object storage, the shape the original deployment used for
/// its S3 bucket. The bundled backend is filesystem-based.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StoreError>;

    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;
}

/// Stores objects under `<root>/<bucket>/<key>`.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StoreError> {
        let path = self.object_path(bucket, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body).await?;
        debug!(path = %path.display(), "price history persisted");
        Ok(())
    }

    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        Ok(tokio::fs::read(self.object_path(bucket, key)).await?)
    }
}

/// One observed quote. Amounts are stringified base units so the JSON
/// survives tooling that cannot hold 256-bit integers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub pair: String,
    pub amount_in: String,
    pub to_amount: String,
}

pub struct PriceHistory {
    window: Mutex<VecDeque<PricePoint>>,
    cap: usize,
}

impl PriceHistory {
    pub fn new(cap: usize) -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
            cap: cap.max(1),
        }
    }

    pub fn record(&self, pair: &str, amount_in: U256, to_amount: U256) {
        let point = PricePoint {
            timestamp: Utc::now(),
            pair: pair.to_string(),
            amount_in: amount_in.to_string(),
            to_amount: to_amount.to_string(),
        };
        let mut window = match self.window.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        if window.len() == self.cap {
            window.pop_front();
        }
        window.push_back(point);
    }

    pub fn len(&self) -> usize {
        self.window.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<PricePoint> {
        self.window
            .lock()
            .map(|w| w.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn persist(
        &self,
        store: &dyn ObjectStore,
        bucket: &str,
        key: &str,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_vec(&self.snapshot())
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        store.upload(bucket, key, body, "application/json").await
    }

    /// Rebuild a window from a persisted snapshot, keeping the `cap` most
    /// recent points.
    pub async fn restore(
        store: &dyn ObjectStore,
        bucket: &str,
        key: &str,
        cap: usize,
    ) -> Result<Self, StoreError> {
        let raw = store.download(bucket, key).await?;
        let points: Vec<PricePoint> =
            serde_json::from_slice(&raw).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let history = Self::new(cap);
        {
            let mut window = match history.window.lock() {
                Ok(w) => w,
                Err(poisoned) => poisoned.into_inner(),
            };
            let skip = points.len().saturating_sub(history.cap);
            window.extend(points.into_iter().skip(skip));
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_capped_and_keeps_latest() {
        let history = PriceHistory::new(3);
        for i in 0..5u64 {
            history.record("WETH/USDCe", U256::from(i), U256::from(i * 10));
        }
        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].amount_in, "2");
        assert_eq!(snapshot[2].amount_in, "4");
    }

    #[tokio::test]
    async fn persist_and_restore_round_trip() {
        let dir = std::env::temp_dir().join(format!("flasharb-history-{}", std::process::id()));
        let store = FsObjectStore::new(&dir);

        let history = PriceHistory::new(10);
        history.record("WETH/USDCe", U256::from(1u64), U256::from(2u64));
        history.record("WETH/ARB", U256::from(3u64), U256::from(4u64));
        history
            .persist(&store, "prices", "window.json")
            .await
            .unwrap();

        let restored = PriceHistory::restore(&store, "prices", "window.json", 10)
            .await
            .unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.snapshot()[1].pair, "WETH/ARB");

        // Restore with a tighter cap keeps only the newest points.
        let tight = PriceHistory::restore(&store, "prices", "window.json", 1)
            .await
            .unwrap();
        assert_eq!(tight.snapshot()[0].pair, "WETH/ARB");

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn missing_object_surfaces_io_error() {
        let store = FsObjectStore::new(std::env::temp_dir());
        assert!(matches!(
            PriceHistory::restore(&store, "prices", "does-not-exist.json", 5).await,
            Err(StoreError::Io(_))
        ));
    }
}
