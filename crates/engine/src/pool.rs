//! Worker pool orchestration.
//!
//! The orchestrator itself is single-threaded and never waits on an
//! individual verification: it claims snapshots, spawns their verification
//! onto the runtime behind a fixed number of semaphore permits, and polls
//! finished tasks in [`Orchestrator::drain_completed`].
//!
//! Claiming (`pending -> verifying`) happens in the store before the task is
//! spawned. That is the only thing keeping two overlapping runs from
//! verifying the same snapshot, and it is advisory: a crash after the claim
//! leaves the snapshot in `verifying` until something outside this crate
//! sweeps it.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use verifier_storage::{ExistsFilter, ExistsSnapshot, ExistsStatus, StorageError, VerifierStorage};

use crate::engine::{Verification, VerificationEngine};
use crate::reconciler::Reconciler;

/// Snapshots selected per page.
pub const PAGE_SIZE: usize = 1000;

/// How often `submit_batch` reports progress while queueing.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

type VerifyTask = JoinHandle<Result<Verification, StorageError>>;

/// Counts from one pass over the in-flight tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainCounts {
    /// Still running (or waiting for a permit).
    pub pending: usize,
    /// Finished normally, whatever the verification outcome.
    pub succeeded: usize,
    /// Finished with a store error or a panic.
    pub errored: usize,
}

/// `N: queued, P: pending, S: succeeded, E: errored`, the progress line format.
pub(crate) struct Progress(pub usize, pub DrainCounts);

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "N: {}, P: {}, S: {}, E: {}",
            self.0, self.1.pending, self.1.succeeded, self.1.errored
        )
    }
}

pub struct Orchestrator<S> {
    storage: Arc<S>,
    engine: Arc<VerificationEngine<S>>,
    permits: Arc<Semaphore>,
    in_flight: Vec<VerifyTask>,
    failed: Vec<ExistsSnapshot>,
    reconcile: bool,
    verified_tx: Option<mpsc::UnboundedSender<ExistsSnapshot>>,
    page_size: usize,
    progress_interval: Duration,
}

impl<S: VerifierStorage> Orchestrator<S> {
    /// `pool_size` bounds how many verifications run at once.
    pub fn new(storage: Arc<S>, pool_size: usize) -> Self {
        Self {
            engine: Arc::new(VerificationEngine::new(storage.clone())),
            storage,
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
            in_flight: Vec::new(),
            failed: Vec::new(),
            reconcile: false,
            verified_tx: None,
            page_size: PAGE_SIZE,
            progress_interval: PROGRESS_INTERVAL,
        }
    }

    /// Keep snapshots that fail verification for
    /// [`Orchestrator::reconcile_failed`].
    pub fn set_reconciliation(&mut self, enabled: bool) {
        self.reconcile = enabled;
    }

    /// Forward every verified snapshot to `tx` as it is drained.
    pub fn attach_notifications(&mut self, tx: mpsc::UnboundedSender<ExistsSnapshot>) {
        self.verified_tx = Some(tx);
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Drop the notification sender so the notifier can finish.
    pub fn close_notifications(&mut self) {
        self.verified_tx = None;
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Snapshots waiting for reconciler escalation.
    pub fn failed(&self) -> &[ExistsSnapshot] {
        &self.failed
    }

    /// Claim and dispatch every pending snapshot whose audit period ended at
    /// or before `ending_max`. Returns how many were dispatched.
    pub async fn submit_batch(
        &mut self,
        snapshot: &mut S::Snapshot,
        ending_max: OffsetDateTime,
    ) -> Result<usize, StorageError> {
        let filter = ExistsFilter {
            ending_max: Some(ending_max),
            status: Some(ExistsStatus::Pending),
        };
        let count = self.storage.count_exists(snapshot, &filter).await?;
        info!(count, "adding exists to queue");

        let mut added = 0usize;
        let mut next_update = Instant::now() + self.progress_interval;
        while added < count {
            // Claimed and conflicting rows both leave the pending filter, so
            // the first page is always the next one and an empty page ends it.
            let page = self
                .storage
                .list_exists(snapshot, &filter, self.page_size)
                .await?;
            if page.is_empty() {
                break;
            }

            for exists in page {
                let claimed = match self.storage.claim_exists(snapshot, exists.id).await {
                    Ok(claimed) => claimed,
                    Err(StorageError::ClaimConflict { id, status }) => {
                        debug!(exists_id = id, %status, "exists claimed elsewhere, skipping");
                        continue;
                    }
                    Err(err) => return Err(err),
                };
                self.dispatch(claimed);
                added += 1;

                if Instant::now() > next_update {
                    let counts = self.drain_completed().await;
                    info!("{}", Progress(added, counts));
                    next_update = Instant::now() + self.progress_interval;
                }
            }
        }
        Ok(added)
    }

    fn dispatch(&mut self, exists: ExistsSnapshot) {
        let engine = self.engine.clone();
        let permits = self.permits.clone();
        self.in_flight.push(tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| StorageError::Backend("worker pool closed".to_string()))?;
            engine.verify(exists).await
        }));
    }

    /// One non-blocking pass over the in-flight tasks. Finished tasks are
    /// removed; only already-finished handles are awaited.
    pub async fn drain_completed(&mut self) -> DrainCounts {
        let mut counts = DrainCounts::default();
        let mut still_running = Vec::with_capacity(self.in_flight.len());

        for handle in std::mem::take(&mut self.in_flight) {
            if !handle.is_finished() {
                still_running.push(handle);
                continue;
            }
            match handle.await {
                Ok(Ok(verification)) => {
                    counts.succeeded += 1;
                    self.on_verified(verification);
                }
                Ok(Err(err)) => {
                    counts.errored += 1;
                    error!(error = %err, "verification task failed");
                }
                Err(join_err) => {
                    counts.errored += 1;
                    error!(error = %join_err, "verification task panicked");
                }
            }
        }

        self.in_flight = still_running;
        counts.pending = self.in_flight.len();
        counts
    }

    fn on_verified(&mut self, verification: Verification) {
        if verification.verified {
            if let Some(tx) = &self.verified_tx {
                if tx.send(verification.exists).is_err() {
                    warn!("notifier has stopped, dropping verified notification");
                }
            }
        } else if self.reconcile {
            self.failed.push(verification.exists);
        }
    }

    /// Hand each failed snapshot to the reconciler once, then forget them.
    pub async fn reconcile_failed(&mut self, reconciler: &dyn Reconciler) -> usize {
        let failed = std::mem::take(&mut self.failed);
        let total = failed.len();
        for exists in &failed {
            if let Err(err) = reconciler.failed_validation(exists).await {
                warn!(exists_id = exists.id, error = %err, "reconciler escalation failed");
            }
        }
        total
    }
}
