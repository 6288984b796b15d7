use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::StorageError;
use crate::record::{
    DeleteRecord, ExistsFilter, ExistsSnapshot, LaunchRecord, ReconcileRecord, TimeWindow,
};

/// The storage trait consumed by the exists verifier.
///
/// A `VerifierStorage` implementation holds exists snapshots and the launch,
/// delete and reconcile records they are verified against.
///
/// ## Snapshot Semantics
///
/// The orchestrator wraps each iteration (select + claim) in a snapshot:
///
/// 1. `begin_snapshot()` starts a transaction and returns a `Snapshot`
/// 2. `count_exists` / `list_exists` / `claim_exists` with `&mut snapshot`
/// 3. `commit_snapshot(snapshot)` OR `abort_snapshot(snapshot)`
///
/// Aborting must roll back claims made in the snapshot whose rows are still
/// `verifying`. Rows a worker already moved to a terminal status stay put.
///
/// ## Claims
///
/// `claim_exists` is a conditional update `pending -> verifying`. When the row
/// is no longer pending it returns `Err(StorageError::ClaimConflict { .. })`.
/// This is an optimistic claim that keeps two overlapping runs from verifying
/// the same snapshot; it is advisory, not a lock with expiry.
///
/// ## Row-scoped writes
///
/// `update_exists` runs outside any snapshot (autocommit) and is used by the
/// verification workers. It must reject illegal lifecycle transitions with
/// `StorageError::InvalidTransition` (see `ExistsStatus::can_transition_to`).
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so workers on other tasks
/// can share them behind an `Arc`.
#[async_trait]
pub trait VerifierStorage: Send + Sync + 'static {
    /// The snapshot (transaction) type used by this storage backend.
    type Snapshot: Send;

    // ── Snapshot lifecycle ────────────────────────────────────────────────────

    async fn begin_snapshot(&self) -> Result<Self::Snapshot, StorageError>;

    async fn commit_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    async fn abort_snapshot(&self, snapshot: Self::Snapshot) -> Result<(), StorageError>;

    // ── Selection and claiming (within snapshot) ──────────────────────────────

    /// Count exists snapshots matching `filter`.
    async fn count_exists(
        &self,
        snapshot: &mut Self::Snapshot,
        filter: &ExistsFilter,
    ) -> Result<usize, StorageError>;

    /// List up to `limit` exists snapshots matching `filter`, ordered by id.
    async fn list_exists(
        &self,
        snapshot: &mut Self::Snapshot,
        filter: &ExistsFilter,
        limit: usize,
    ) -> Result<Vec<ExistsSnapshot>, StorageError>;

    /// Atomically move a pending snapshot to `verifying` and return it.
    async fn claim_exists(
        &self,
        snapshot: &mut Self::Snapshot,
        id: u64,
    ) -> Result<ExistsSnapshot, StorageError>;

    // ── Row-scoped operations ─────────────────────────────────────────────────

    /// Read one exists snapshot.
    ///
    /// Returns `Err(StorageError::ExistsNotFound)` if it does not exist.
    async fn get_exists(&self, id: u64) -> Result<ExistsSnapshot, StorageError>;

    /// Persist status and fail reason of an exists snapshot.
    async fn update_exists(&self, exists: &ExistsSnapshot) -> Result<(), StorageError>;

    // ── Corroborating record queries ──────────────────────────────────────────

    /// Launch records for `instance` whose `launched_at` lies in `window`.
    async fn find_launches(
        &self,
        instance: &str,
        window: &TimeWindow,
    ) -> Result<Vec<LaunchRecord>, StorageError>;

    /// Delete records for `instance` whose `launched_at` lies in `window`,
    /// optionally restricted to `deleted_at <= deleted_max`.
    async fn find_deletes(
        &self,
        instance: &str,
        window: &TimeWindow,
        deleted_max: Option<OffsetDateTime>,
    ) -> Result<Vec<DeleteRecord>, StorageError>;

    /// Reconcile records for `instance` whose `launched_at` lies in `window`.
    async fn find_reconciles(
        &self,
        instance: &str,
        window: &TimeWindow,
    ) -> Result<Vec<ReconcileRecord>, StorageError>;
}
