//! In-memory `VerifierStorage` backend.
//!
//! Used by the CLI to replay a fixtures file and by every test in the
//! workspace. All state sits behind one mutex, so each operation is atomic
//! with respect to every other; that is enough to honour the claim and
//! transition rules of the trait.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{
    DeleteRecord, ExistsFilter, ExistsSnapshot, ExistsStatus, LaunchRecord, ReconcileRecord,
    StorageSeed, TimeWindow,
};
use crate::traits::VerifierStorage;

#[derive(Clone, Default)]
pub struct InMemoryStorage {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    exists: BTreeMap<u64, ExistsSnapshot>,
    launches: Vec<LaunchRecord>,
    deletes: Vec<DeleteRecord>,
    reconciles: Vec<ReconcileRecord>,
    committed: usize,
    aborted: usize,
}

/// Snapshot handle: remembers what it claimed so an abort can undo it.
#[derive(Debug, Default)]
pub struct MemorySnapshot {
    claimed: Vec<u64>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: StorageSeed) -> Self {
        let storage = Self::new();
        storage.seed(seed);
        storage
    }

    /// Add records to the store. Exists snapshots with an existing id are
    /// replaced.
    pub fn seed(&self, seed: StorageSeed) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for exists in seed.exists {
            inner.exists.insert(exists.id, exists);
        }
        inner.launches.extend(seed.launches);
        inner.deletes.extend(seed.deletes);
        inner.reconciles.extend(seed.reconciles);
    }

    /// Number of committed snapshots.
    pub fn committed_snapshots(&self) -> usize {
        self.inner.lock().map(|i| i.committed).unwrap_or(0)
    }

    /// Number of aborted snapshots.
    pub fn aborted_snapshots(&self) -> usize {
        self.inner.lock().map(|i| i.aborted).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StorageError> {
        self.inner
            .lock()
            .map_err(|_| StorageError::Backend("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl VerifierStorage for InMemoryStorage {
    type Snapshot = MemorySnapshot;

    async fn begin_snapshot(&self) -> Result<MemorySnapshot, StorageError> {
        Ok(MemorySnapshot::default())
    }

    async fn commit_snapshot(&self, _snapshot: MemorySnapshot) -> Result<(), StorageError> {
        self.lock()?.committed += 1;
        Ok(())
    }

    async fn abort_snapshot(&self, snapshot: MemorySnapshot) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        for id in snapshot.claimed {
            if let Some(exists) = inner.exists.get_mut(&id) {
                if exists.status == ExistsStatus::Verifying {
                    exists.status = ExistsStatus::Pending;
                }
            }
        }
        inner.aborted += 1;
        Ok(())
    }

    async fn count_exists(
        &self,
        _snapshot: &mut MemorySnapshot,
        filter: &ExistsFilter,
    ) -> Result<usize, StorageError> {
        let inner = self.lock()?;
        Ok(inner.exists.values().filter(|e| filter.matches(e)).count())
    }

    async fn list_exists(
        &self,
        _snapshot: &mut MemorySnapshot,
        filter: &ExistsFilter,
        limit: usize,
    ) -> Result<Vec<ExistsSnapshot>, StorageError> {
        let inner = self.lock()?;
        // BTreeMap iterates in id order.
        Ok(inner
            .exists
            .values()
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn claim_exists(
        &self,
        snapshot: &mut MemorySnapshot,
        id: u64,
    ) -> Result<ExistsSnapshot, StorageError> {
        let mut inner = self.lock()?;
        let exists = inner
            .exists
            .get_mut(&id)
            .ok_or(StorageError::ExistsNotFound { id })?;
        if exists.status != ExistsStatus::Pending {
            return Err(StorageError::ClaimConflict {
                id,
                status: exists.status,
            });
        }
        exists.status = ExistsStatus::Verifying;
        snapshot.claimed.push(id);
        Ok(exists.clone())
    }

    async fn get_exists(&self, id: u64) -> Result<ExistsSnapshot, StorageError> {
        let inner = self.lock()?;
        inner
            .exists
            .get(&id)
            .cloned()
            .ok_or(StorageError::ExistsNotFound { id })
    }

    async fn update_exists(&self, exists: &ExistsSnapshot) -> Result<(), StorageError> {
        let mut inner = self.lock()?;
        let stored = inner
            .exists
            .get_mut(&exists.id)
            .ok_or(StorageError::ExistsNotFound { id: exists.id })?;
        if !stored.status.can_transition_to(exists.status) {
            return Err(StorageError::InvalidTransition {
                id: exists.id,
                from: stored.status,
                to: exists.status,
            });
        }
        stored.status = exists.status;
        stored.fail_reason = exists.fail_reason.clone();
        Ok(())
    }

    async fn find_launches(
        &self,
        instance: &str,
        window: &TimeWindow,
    ) -> Result<Vec<LaunchRecord>, StorageError> {
        let inner = self.lock()?;
        Ok(inner
            .launches
            .iter()
            .filter(|l| l.instance == instance && window.contains(l.launched_at))
            .cloned()
            .collect())
    }

    async fn find_deletes(
        &self,
        instance: &str,
        window: &TimeWindow,
        deleted_max: Option<OffsetDateTime>,
    ) -> Result<Vec<DeleteRecord>, StorageError> {
        let inner = self.lock()?;
        Ok(inner
            .deletes
            .iter()
            .filter(|d| d.instance == instance && window.contains(d.launched_at))
            .filter(|d| deleted_max.map_or(true, |max| d.deleted_at <= max))
            .cloned()
            .collect())
    }

    async fn find_reconciles(
        &self,
        instance: &str,
        window: &TimeWindow,
    ) -> Result<Vec<ReconcileRecord>, StorageError> {
        let inner = self.lock()?;
        Ok(inner
            .reconciles
            .iter()
            .filter(|r| r.instance == instance && window.contains(r.launched_at))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{delete_record, exists_snapshot, launch_record};
    use time::macros::datetime;

    #[tokio::test]
    async fn abort_rolls_back_only_unfinished_claims() {
        let t = datetime!(2026-01-05 10:00:00 UTC);
        let storage = InMemoryStorage::from_seed(StorageSeed {
            exists: vec![exists_snapshot(1, "inst-1", t), exists_snapshot(2, "inst-2", t)],
            ..Default::default()
        });

        let mut snap = storage.begin_snapshot().await.unwrap();
        storage.claim_exists(&mut snap, 1).await.unwrap();
        let mut second = storage.claim_exists(&mut snap, 2).await.unwrap();
        second.status = ExistsStatus::Verified;
        storage.update_exists(&second).await.unwrap();
        storage.abort_snapshot(snap).await.unwrap();

        assert_eq!(
            storage.get_exists(1).await.unwrap().status,
            ExistsStatus::Pending
        );
        assert_eq!(
            storage.get_exists(2).await.unwrap().status,
            ExistsStatus::Verified
        );
        assert_eq!(storage.aborted_snapshots(), 1);
        assert_eq!(storage.committed_snapshots(), 0);
    }

    #[tokio::test]
    async fn deleted_max_is_inclusive() {
        let launched = datetime!(2026-01-05 10:00:00 UTC);
        let deleted = datetime!(2026-01-05 12:00:00 UTC);
        let storage = InMemoryStorage::from_seed(StorageSeed {
            launches: vec![launch_record(1, "inst-1", launched)],
            deletes: vec![delete_record(1, "inst-1", launched, deleted)],
            ..Default::default()
        });
        let window = TimeWindow {
            start: launched,
            end: launched,
        };

        let at_bound = storage
            .find_deletes("inst-1", &window, Some(deleted))
            .await
            .unwrap();
        assert_eq!(at_bound.len(), 1);

        let before = storage
            .find_deletes("inst-1", &window, Some(deleted - time::Duration::SECOND))
            .await
            .unwrap();
        assert!(before.is_empty());
    }
}
