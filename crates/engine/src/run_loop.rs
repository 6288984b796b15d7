//! Top-level driver: continuous ticking or a single pass.
//!
//! Each continuous iteration opens a store snapshot, queues everything that
//! has settled, drains whatever finished, escalates failures, and commits.
//! A single pass (`run_once`) queues once and then waits for every queued
//! verification before returning.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use verifier_storage::{StorageError, VerifierStorage};

use crate::config::{SettleWindow, VerifierConfig};
use crate::notify::{Notifier, NotifyError};
use crate::pool::{Orchestrator, Progress};
use crate::reconciler::Reconciler;

/// Floor for every wait between ticks and drain passes, so a zero tick
/// never spins.
const MIN_WAIT: Duration = Duration::from_millis(10);

type Clock = Box<dyn Fn() -> OffsetDateTime + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("notifier failed: {0}")]
    Notify(#[from] NotifyError),

    #[error("notifier task panicked: {0}")]
    NotifierPanicked(String),

    #[error("settle window {0} reaches before the earliest representable time")]
    SettleOutOfRange(SettleWindow),
}

/// Totals for a single pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Snapshots claimed and dispatched.
    pub queued: usize,
    /// Tasks that finished, whatever the verification outcome.
    pub succeeded: usize,
    /// Tasks that ended in a store error or a panic.
    pub errored: usize,
    /// Failed snapshots handed to the reconciler.
    pub escalated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub tick: Duration,
    pub settle: SettleWindow,
    pub pool_size: usize,
}

impl From<&VerifierConfig> for RunOptions {
    fn from(config: &VerifierConfig) -> Self {
        Self {
            tick: config.tick(),
            settle: config.settle_window(),
            pool_size: config.pool_size,
        }
    }
}

enum NotifierState {
    Idle,
    Pending(Notifier),
    Running(JoinHandle<Result<u64, NotifyError>>),
}

pub struct RunLoop<S: VerifierStorage> {
    storage: Arc<S>,
    orchestrator: Orchestrator<S>,
    options: RunOptions,
    reconciler: Option<Arc<dyn Reconciler>>,
    notifier: NotifierState,
    clock: Clock,
}

impl<S: VerifierStorage> RunLoop<S> {
    pub fn new(storage: Arc<S>, options: RunOptions) -> Self {
        Self {
            orchestrator: Orchestrator::new(storage.clone(), options.pool_size),
            storage,
            options,
            reconciler: None,
            notifier: NotifierState::Idle,
            clock: Box::new(OffsetDateTime::now_utc),
        }
    }

    /// Escalate every snapshot that fails verification to `reconciler`.
    pub fn with_reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.orchestrator.set_reconciliation(true);
        self.reconciler = Some(reconciler);
        self
    }

    /// Publish a verified notification for every verified snapshot. The
    /// notifier task starts with the first run.
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = NotifierState::Pending(notifier);
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> OffsetDateTime + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.orchestrator = self.orchestrator.with_page_size(page_size);
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator<S> {
        &self.orchestrator
    }

    /// Tick until `shutdown` is cancelled or an iteration fails. On shutdown
    /// the verifications already dispatched are waited for.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), RunError> {
        self.start_notifier();
        info!(
            tick = ?self.options.tick,
            pool_size = self.options.pool_size,
            "verifier started"
        );

        let result = loop {
            if shutdown.is_cancelled() {
                break Ok(());
            }
            if let Err(err) = self.iteration().await {
                break Err(err);
            }
            if let Err(err) = self.check_notifier().await {
                break Err(err);
            }
            tokio::select! {
                _ = shutdown.cancelled() => break Ok(()),
                _ = tokio::time::sleep(self.options.tick.max(MIN_WAIT)) => {}
            }
        };

        let drained = match result {
            Ok(()) => {
                info!(in_flight = self.orchestrator.in_flight(), "shutting down");
                self.drain_all(&mut RunSummary::default()).await
            }
            Err(err) => Err(err),
        };
        let finished = self.finish_notifier().await;
        drained.and(finished)
    }

    /// Queue everything that has settled, wait for all of it, then stop.
    pub async fn run_once(&mut self) -> Result<RunSummary, RunError> {
        let ending_max = self.ending_max()?;
        self.start_notifier();

        let mut snapshot = self.storage.begin_snapshot().await?;
        let queued = match self.orchestrator.submit_batch(&mut snapshot, ending_max).await {
            Ok(queued) => queued,
            Err(err) => {
                self.abort(snapshot).await;
                return Err(err.into());
            }
        };
        // Workers write their rows outside the snapshot; commit the claims
        // before waiting on them.
        self.storage.commit_snapshot(snapshot).await?;
        info!(queued, "verifying exists");

        let mut summary = RunSummary {
            queued,
            ..RunSummary::default()
        };
        let drained = self.drain_all(&mut summary).await;
        let finished = self.finish_notifier().await;
        drained.and(finished)?;
        Ok(summary)
    }

    async fn iteration(&mut self) -> Result<(), RunError> {
        let ending_max = self.ending_max()?;
        let mut snapshot = self.storage.begin_snapshot().await?;
        let queued = match self.orchestrator.submit_batch(&mut snapshot, ending_max).await {
            Ok(queued) => queued,
            Err(err) => {
                self.abort(snapshot).await;
                return Err(err.into());
            }
        };
        let counts = self.orchestrator.drain_completed().await;
        self.escalate().await;
        info!("{}", Progress(queued, counts));
        self.storage.commit_snapshot(snapshot).await?;
        Ok(())
    }

    async fn drain_all(&mut self, summary: &mut RunSummary) -> Result<(), RunError> {
        loop {
            let counts = self.orchestrator.drain_completed().await;
            summary.succeeded += counts.succeeded;
            summary.errored += counts.errored;
            summary.escalated += self.escalate().await;
            info!(
                "P: {}, S: {}, E: {}",
                counts.pending, summary.succeeded, summary.errored
            );
            self.check_notifier().await?;

            if self.orchestrator.in_flight() == 0 {
                return Ok(());
            }
            tokio::time::sleep(self.options.tick.max(MIN_WAIT)).await;
        }
    }

    async fn escalate(&mut self) -> usize {
        match &self.reconciler {
            Some(reconciler) => self.orchestrator.reconcile_failed(reconciler.as_ref()).await,
            None => 0,
        }
    }

    async fn abort(&self, snapshot: S::Snapshot) {
        if let Err(err) = self.storage.abort_snapshot(snapshot).await {
            warn!(error = %err, "failed to abort snapshot");
        }
    }

    fn ending_max(&self) -> Result<OffsetDateTime, RunError> {
        (self.clock)()
            .checked_sub(self.options.settle.duration())
            .ok_or(RunError::SettleOutOfRange(self.options.settle))
    }

    fn start_notifier(&mut self) {
        if !matches!(self.notifier, NotifierState::Pending(_)) {
            return;
        }
        if let NotifierState::Pending(notifier) =
            std::mem::replace(&mut self.notifier, NotifierState::Idle)
        {
            let (tx, rx) = mpsc::unbounded_channel();
            self.orchestrator.attach_notifications(tx);
            self.notifier = NotifierState::Running(tokio::spawn(notifier.run(rx)));
        }
    }

    /// Surface a notifier that stopped early. A healthy notifier only
    /// finishes once its sender is closed.
    async fn check_notifier(&mut self) -> Result<(), RunError> {
        let finished = matches!(&self.notifier, NotifierState::Running(task) if task.is_finished());
        if finished {
            self.orchestrator.close_notifications();
            self.finish_notifier().await?;
        }
        Ok(())
    }

    async fn finish_notifier(&mut self) -> Result<(), RunError> {
        self.orchestrator.close_notifications();
        let NotifierState::Running(task) = std::mem::replace(&mut self.notifier, NotifierState::Idle)
        else {
            return Ok(());
        };
        match task.await {
            Ok(Ok(sent)) => {
                info!(sent, "notifications published");
                Ok(())
            }
            Ok(Err(err)) => Err(err.into()),
            Err(join_err) => Err(RunError::NotifierPanicked(join_err.to_string())),
        }
    }
}
