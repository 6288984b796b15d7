//! Exists verifier -- proves every exists snapshot is corroborated by its
//! launch (and delete) records, falling back to reconciled records when the
//! fast path disagrees.
//!
//! Layering, leaves first: [`matcher`] compares facts, [`finder`] looks up
//! candidates, [`engine`] runs the per-snapshot state machine, [`pool`] fans
//! verification out over a bounded set of tasks, and [`run_loop`] drives the
//! pool continuously or once.

pub mod config;
pub mod engine;
pub mod error;
pub mod finder;
pub mod matcher;
pub mod notify;
pub mod pool;
pub mod reconciler;
pub mod run_loop;

pub use config::{BrokerConfig, ConfigError, SettleUnit, SettleWindow, VerifierConfig};
pub use engine::{Verification, VerificationEngine};
pub use error::VerificationError;
pub use notify::{ExchangeSpec, Notifier, NotifyError, Publisher, SpoolPublisher};
pub use pool::{DrainCounts, Orchestrator};
pub use reconciler::{Reconciler, ReconcilerConfig, ReconcilerError, SpoolReconciler};
pub use run_loop::{RunError, RunLoop, RunOptions, RunSummary};
