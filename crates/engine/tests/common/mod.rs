#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use verifier_storage::{
    DeleteRecord, ExistsFilter, ExistsSnapshot, InMemoryStorage, LaunchRecord, MemorySnapshot,
    ReconcileRecord, StorageError, StorageSeed, TimeWindow, VerifierStorage,
};

/// In-memory store that counts record lookups and can be told to fail them.
///
/// It can also fail status writes for one snapshot, and let a rival
/// snapshot claim a row right after the next page is listed. Both use 0 for
/// "off" since fixture ids start at 1.
#[derive(Clone, Default)]
pub struct ProbeStorage {
    pub inner: InMemoryStorage,
    lookups: Arc<AtomicUsize>,
    fail_lookups: Arc<AtomicBool>,
    fail_reconciles: Arc<AtomicBool>,
    fail_update_of: Arc<AtomicU64>,
    claim_after_list: Arc<AtomicU64>,
}

impl ProbeStorage {
    pub fn from_seed(seed: StorageSeed) -> Self {
        Self {
            inner: InMemoryStorage::from_seed(seed),
            ..Default::default()
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn fail_lookups(&self) {
        self.fail_lookups.store(true, Ordering::SeqCst);
    }

    pub fn fail_reconciles(&self) {
        self.fail_reconciles.store(true, Ordering::SeqCst);
    }

    /// Every `update_exists` for `id` fails with a backend error.
    pub fn fail_updates_of(&self, id: u64) {
        self.fail_update_of.store(id, Ordering::SeqCst);
    }

    /// Once the next page is listed, claim `id` from another snapshot
    /// before the caller gets to it.
    pub fn claim_after_next_list(&self, id: u64) {
        self.claim_after_list.store(id, Ordering::SeqCst);
    }

    fn lookup(&self, fail: &AtomicBool) -> Result<(), StorageError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if fail.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl VerifierStorage for ProbeStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        self.inner.begin_snapshot().await
    }

    async fn commit_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        self.inner.commit_snapshot(snapshot).await
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        self.inner.abort_snapshot(snapshot).await
    }

    async fn count_exists(
        &self,
        snapshot: &mut MemorySnapshot,
        filter: &ExistsFilter,
    ) -> Result<usize, StorageError> {
        self.inner.count_exists(snapshot, filter).await
    }

    async fn list_exists(
        &self,
        snapshot: &mut MemorySnapshot,
        filter: &ExistsFilter,
        limit: usize,
    ) -> Result<Vec<ExistsSnapshot>, StorageError> {
        let page = self.inner.list_exists(snapshot, filter, limit).await?;
        let rival = self.claim_after_list.swap(0, Ordering::SeqCst);
        if rival != 0 {
            let mut other = self.inner.begin_snapshot().await?;
            self.inner.claim_exists(&mut other, rival).await?;
            self.inner.commit_snapshot(other).await?;
        }
        Ok(page)
    }

    async fn claim_exists(
        &self,
        snapshot: &mut MemorySnapshot,
        id: u64,
    ) -> Result<ExistsSnapshot, StorageError> {
        self.inner.claim_exists(snapshot, id).await
    }

    async fn get_exists(&self, id: u64) -> Result<ExistsSnapshot, StorageError> {
        self.inner.get_exists(id).await
    }

    async fn update_exists(&self, exists: &ExistsSnapshot) -> Result<(), StorageError> {
        if self.fail_update_of.load(Ordering::SeqCst) == exists.id {
            return Err(StorageError::Backend("write timed out".to_string()));
        }
        self.inner.update_exists(exists).await
    }

    async fn find_launches(
        &self,
        instance: &str,
        window: &TimeWindow,
    ) -> Result<Vec<LaunchRecord>, StorageError> {
        self.lookup(&self.fail_lookups)?;
        self.inner.find_launches(instance, window).await
    }

    async fn find_deletes(
        &self,
        instance: &str,
        window: &TimeWindow,
        deleted_max: Option<OffsetDateTime>,
    ) -> Result<Vec<DeleteRecord>, StorageError> {
        self.lookup(&self.fail_lookups)?;
        self.inner.find_deletes(instance, window, deleted_max).await
    }

    async fn find_reconciles(
        &self,
        instance: &str,
        window: &TimeWindow,
    ) -> Result<Vec<ReconcileRecord>, StorageError> {
        self.lookup(&self.fail_reconciles)?;
        self.inner.find_reconciles(instance, window).await
    }
}
