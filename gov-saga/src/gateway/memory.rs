//! In-memory gateway implementations.
//!
//! Thread-safe in-memory adapters for the off-chain store and the upload
//! service, used in tests and development. The off-chain adapter models the
//! primary/read-replica split of the real store: writes land in the primary
//! immediately, while reads served from the cache only see what the last
//! refresh copied over. Freezing the cache simulates replication lag.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use gov_core::types::record::{NewRecord, OffChainRecord, RecordPatch};

use crate::error::{SagaError, SagaResult};

use super::{OffChainGateway, RecordReadSource, UploadFile, UploadGateway, UploadedArtifact};

/// Adapter call counters, used by tests to assert interaction counts
#[derive(Debug, Clone, Default)]
pub struct OffChainStats {
    /// Successful creates
    pub creates: u64,
    /// Successful updates
    pub updates: u64,
    /// Successful deletes
    pub deletes: u64,
    /// Records currently stored
    pub records: u64,
}

/// In-memory off-chain store with a lagging read cache
pub struct MemoryOffChain {
    primary: Arc<RwLock<HashMap<String, OffChainRecord>>>,
    cache: Arc<RwLock<Vec<OffChainRecord>>>,
    cache_frozen: AtomicBool,
    next_id: AtomicU64,
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
}

impl MemoryOffChain {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            primary: Arc::new(RwLock::new(HashMap::new())),
            cache: Arc::new(RwLock::new(Vec::new())),
            cache_frozen: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            creates: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
        }
    }

    /// Freeze or unfreeze the read cache.
    ///
    /// While frozen, `refresh_cache` is a no-op, so the cached collection
    /// keeps serving stale data the way a lagging replica would.
    pub fn set_cache_frozen(&self, frozen: bool) {
        self.cache_frozen.store(frozen, Ordering::SeqCst);
    }

    /// Fetch one record from the primary by slug
    pub async fn get(&self, slug: &str) -> Option<OffChainRecord> {
        self.primary.read().await.get(slug).cloned()
    }

    /// Interaction counters
    pub async fn stats(&self) -> OffChainStats {
        OffChainStats {
            creates: self.creates.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
            records: self.primary.read().await.len() as u64,
        }
    }

    /// Clear all data
    pub async fn clear(&self) {
        self.primary.write().await.clear();
        self.cache.write().await.clear();
    }
}

impl Default for MemoryOffChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OffChainGateway for MemoryOffChain {
    async fn create(&self, record: NewRecord) -> SagaResult<OffChainRecord> {
        if record.creator.trim().is_empty() {
            return Err(SagaError::OffChainWrite("creator id required".to_string()));
        }

        let mut primary = self.primary.write().await;
        if primary.contains_key(&record.slug) {
            return Err(SagaError::OffChainWrite(format!(
                "unique constraint: slug {} already exists",
                record.slug
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let stored = OffChainRecord::new(id, record);
        primary.insert(stored.slug.clone(), stored.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn update_by_slug(&self, slug: &str, patch: RecordPatch) -> SagaResult<OffChainRecord> {
        let mut primary = self.primary.write().await;
        let record = primary
            .get_mut(slug)
            .ok_or_else(|| SagaError::OffChainWrite(format!("not found: {}", slug)))?;

        record.apply_patch(&patch)?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(record.clone())
    }

    async fn delete_by_slug(&self, slug: &str) -> SagaResult<OffChainRecord> {
        let mut primary = self.primary.write().await;
        let removed = primary
            .remove(slug)
            .ok_or_else(|| SagaError::OffChainWrite(format!("not found: {}", slug)))?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(removed)
    }
}

#[async_trait]
impl RecordReadSource for MemoryOffChain {
    async fn refresh_cache(&self) -> SagaResult<()> {
        if self.cache_frozen.load(Ordering::SeqCst) {
            return Ok(());
        }
        let snapshot: Vec<OffChainRecord> = self.primary.read().await.values().cloned().collect();
        *self.cache.write().await = snapshot;
        Ok(())
    }

    async fn cached(&self) -> Vec<OffChainRecord> {
        self.cache.read().await.clone()
    }

    async fn fetch_direct(&self) -> SagaResult<Vec<OffChainRecord>> {
        Ok(self.primary.read().await.values().cloned().collect())
    }
}

/// Recording in-memory upload adapter
pub struct MemoryUploads {
    uploaded: Arc<RwLock<Vec<UploadedArtifact>>>,
    fail_with: RwLock<Option<String>>,
}

impl MemoryUploads {
    /// Create an adapter that accepts every upload
    pub fn new() -> Self {
        Self {
            uploaded: Arc::new(RwLock::new(Vec::new())),
            fail_with: RwLock::new(None),
        }
    }

    /// Make the next uploads fail with the given message
    pub async fn fail_with(&self, message: impl Into<String>) {
        *self.fail_with.write().await = Some(message.into());
    }

    /// Everything uploaded so far
    pub async fn uploaded(&self) -> Vec<UploadedArtifact> {
        self.uploaded.read().await.clone()
    }
}

impl Default for MemoryUploads {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UploadGateway for MemoryUploads {
    async fn upload(&self, files: Vec<UploadFile>) -> SagaResult<Vec<UploadedArtifact>> {
        if let Some(message) = self.fail_with.read().await.clone() {
            return Err(SagaError::Upload(message));
        }

        let mut artifacts = Vec::with_capacity(files.len());
        let mut uploaded = self.uploaded.write().await;
        for file in files {
            let artifact = UploadedArtifact {
                url: format!("memory://uploads/{}", file.name),
                name: file.name,
            };
            uploaded.push(artifact.clone());
            artifacts.push(artifact);
        }
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gov_core::types::record::{RecordKind, RecordState};
    use serde_json::json;

    fn new_record(slug: &str) -> NewRecord {
        NewRecord {
            kind: RecordKind::Space,
            slug: slug.to_string(),
            creator: "0xcafe".to_string(),
            fields: json!({"title": "Test"}),
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let store = MemoryOffChain::new();

        let created = store.create(new_record("space-1")).await.unwrap();
        assert_eq!(created.state, RecordState::Provisional);
        assert!(store.get("space-1").await.is_some());

        let removed = store.delete_by_slug("space-1").await.unwrap();
        assert_eq!(removed.id, created.id);
        assert!(store.get("space-1").await.is_none());
    }

    #[tokio::test]
    async fn test_create_requires_creator() {
        let store = MemoryOffChain::new();
        let mut record = new_record("space-1");
        record.creator = "  ".to_string();

        let err = store.create(record).await.unwrap_err();
        assert!(err.to_string().contains("creator id required"));
    }

    #[tokio::test]
    async fn test_unique_constraint() {
        let store = MemoryOffChain::new();
        store.create(new_record("space-1")).await.unwrap();

        let err = store.create(new_record("space-1")).await.unwrap_err();
        assert!(err.to_string().contains("unique constraint"));
    }

    #[tokio::test]
    async fn test_update_missing_slug() {
        let store = MemoryOffChain::new();
        let err = store
            .update_by_slug("nope", RecordPatch::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_cache_lags_until_refresh() {
        let store = MemoryOffChain::new();
        store.create(new_record("space-1")).await.unwrap();

        // The cache has never been refreshed, so it lags the primary
        assert!(store.cached().await.is_empty());
        assert_eq!(store.fetch_direct().await.unwrap().len(), 1);

        store.refresh_cache().await.unwrap();
        assert_eq!(store.cached().await.len(), 1);
    }

    #[tokio::test]
    async fn test_frozen_cache_stays_stale() {
        let store = MemoryOffChain::new();
        store.set_cache_frozen(true);
        store.create(new_record("space-1")).await.unwrap();

        store.refresh_cache().await.unwrap();
        assert!(store.cached().await.is_empty());

        store.set_cache_frozen(false);
        store.refresh_cache().await.unwrap();
        assert_eq!(store.cached().await.len(), 1);
    }

    #[tokio::test]
    async fn test_uploads_record_artifacts() {
        let uploads = MemoryUploads::new();
        let artifacts = uploads
            .upload(vec![UploadFile {
                name: "logo.png".to_string(),
                content_type: "image/png".to_string(),
                bytes: vec![1, 2, 3],
            }])
            .await
            .unwrap();

        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].url, "memory://uploads/logo.png");
        assert_eq!(uploads.uploaded().await.len(), 1);
    }

    #[tokio::test]
    async fn test_uploads_scripted_failure() {
        let uploads = MemoryUploads::new();
        uploads.fail_with("disk full").await;

        let err = uploads.upload(vec![]).await.unwrap_err();
        assert!(matches!(err, SagaError::Upload(_)));
    }
}
