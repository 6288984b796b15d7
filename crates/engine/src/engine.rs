//! Per-snapshot verification state machine.
//!
//! `verify` takes one snapshot from `pending`/`verifying` to exactly one
//! terminal status:
//!
//! 1. Fast path: the launch record (pre-attached or the single match in the
//!    launch window) must agree field by field, and the delete evidence must
//!    agree with the snapshot's `deleted_at` (see [`VerificationEngine`]).
//! 2. Reconciliation fallback: on an evidence failure, the single reconcile
//!    record for the launch window is used as both launch and delete source.
//!
//! Outcomes never escape as errors. The only `Err` returned is a store
//! failure while persisting the terminal status itself.

use std::sync::Arc;

use tracing::{debug, error, warn};
use verifier_storage::{
    DeleteRecord, ExistsSnapshot, ExistsStatus, LaunchRecord, StorageError, VerifierStorage,
};

use crate::error::VerificationError;
use crate::finder::{exactly_one, Finder, DELETE_KIND, LAUNCH_KIND, RECONCILE_KIND};
use crate::matcher::{deletes_match, fields_match, DeleteFacts, LaunchFacts};

const MISSING_LAUNCHED_AT: &str = "Exists without a launched_at";

/// Result of one verification attempt.
///
/// `verified` is true for both `verified` and `reconciled` outcomes; it is
/// what notification and reconciler escalation key on, not `exists.status`.
#[derive(Debug, Clone)]
pub struct Verification {
    pub verified: bool,
    pub exists: ExistsSnapshot,
}

/// Source of the delete evidence for the delete step.
enum DeleteSource<'a, D> {
    /// Use this record directly.
    Supplied(&'a D),
    /// Resolve from the snapshot's pre-attached record or by searching.
    Lookup,
}

pub struct VerificationEngine<S> {
    storage: Arc<S>,
}

impl<S: VerifierStorage> VerificationEngine<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Verify one snapshot and persist its terminal status.
    pub async fn verify(&self, mut exists: ExistsSnapshot) -> Result<Verification, StorageError> {
        if exists.status.is_terminal() {
            debug!(exists_id = exists.id, status = %exists.status, "exists already terminal");
            let verified = matches!(
                exists.status,
                ExistsStatus::Verified | ExistsStatus::Reconciled
            );
            return Ok(Verification { verified, exists });
        }

        let verified = match self.verify_fast_path(&exists).await {
            Ok(()) => {
                self.mark_verified(&mut exists, None).await?;
                true
            }
            Err(err) if err.triggers_fallback() => self.attempt_reconciled(&mut exists, err).await?,
            Err(VerificationError::Infrastructure(err)) => {
                error!(exists_id = exists.id, error = %err, "verification aborted by infrastructure error");
                self.mark_failed(&mut exists, Some(err.category().to_string()))
                    .await?;
                false
            }
            Err(err) => {
                self.mark_failed(&mut exists, Some(err.to_string())).await?;
                false
            }
        };

        Ok(Verification { verified, exists })
    }

    /// Mark verified, or reconciled when `reconciled_reason` is given.
    ///
    /// Re-marking an already verified snapshot is a no-op: nothing is written
    /// and the fail reason is left alone. Returns whether a write happened.
    pub async fn mark_verified(
        &self,
        exists: &mut ExistsSnapshot,
        reconciled_reason: Option<String>,
    ) -> Result<bool, StorageError> {
        match reconciled_reason {
            None => {
                if exists.status == ExistsStatus::Verified {
                    return Ok(false);
                }
                exists.status = ExistsStatus::Verified;
            }
            Some(reason) => {
                exists.status = ExistsStatus::Reconciled;
                exists.fail_reason = Some(reason);
            }
        }
        self.storage.update_exists(exists).await?;
        Ok(true)
    }

    /// Mark failed. `None` keeps whatever fail reason is already recorded.
    pub async fn mark_failed(
        &self,
        exists: &mut ExistsSnapshot,
        reason: Option<String>,
    ) -> Result<(), StorageError> {
        exists.status = ExistsStatus::Failed;
        if reason.is_some() {
            exists.fail_reason = reason;
        }
        self.storage.update_exists(exists).await
    }

    async fn verify_fast_path(&self, exists: &ExistsSnapshot) -> Result<(), VerificationError> {
        if exists.launched_at.is_none() {
            return Err(VerificationError::Structural(MISSING_LAUNCHED_AT));
        }
        self.verify_launch::<LaunchRecord>(exists, None).await?;
        self.verify_delete::<DeleteRecord>(exists, DeleteSource::Lookup)
            .await
    }

    async fn attempt_reconciled(
        &self,
        exists: &mut ExistsSnapshot,
        original: VerificationError,
    ) -> Result<bool, StorageError> {
        match self.verify_with_reconciled(exists).await {
            Ok(()) => {
                self.mark_verified(exists, Some(original.to_string()))
                    .await?;
                Ok(true)
            }
            // Nothing to fall back to: report what sent us here.
            Err(VerificationError::NotFound { .. }) => {
                self.mark_failed(exists, Some(original.to_string())).await?;
                Ok(false)
            }
            Err(err @ VerificationError::Ambiguous { .. }) => {
                warn!(exists_id = exists.id, error = %err, original = %original, "ambiguous reconcile lookup");
                self.mark_failed(exists, None).await?;
                Ok(false)
            }
            Err(VerificationError::Infrastructure(err)) => {
                error!(exists_id = exists.id, error = %err, "reconciled verification aborted by infrastructure error");
                self.mark_failed(exists, Some(err.category().to_string()))
                    .await?;
                Ok(false)
            }
            // Fell back and still disagreed: report the fallback failure.
            Err(err) => {
                self.mark_failed(exists, Some(err.to_string())).await?;
                Ok(false)
            }
        }
    }

    async fn verify_with_reconciled(&self, exists: &ExistsSnapshot) -> Result<(), VerificationError> {
        let launched_at = exists
            .launched_at
            .ok_or(VerificationError::Structural(MISSING_LAUNCHED_AT))?;
        let found = Finder::new(self.storage.as_ref())
            .find_reconcile(&exists.instance, launched_at)
            .await?;
        let reconcile = exactly_one(found, RECONCILE_KIND, &exists.instance, launched_at)?;

        self.verify_launch(exists, Some(&reconcile)).await?;
        self.verify_delete(exists, DeleteSource::Supplied(&reconcile))
            .await
    }

    async fn verify_launch<L: LaunchFacts + Sync>(
        &self,
        exists: &ExistsSnapshot,
        supplied: Option<&L>,
    ) -> Result<(), VerificationError> {
        if let Some(launch) = supplied {
            return Ok(fields_match(exists, launch)?);
        }
        if let Some(launch) = &exists.usage {
            return Ok(fields_match(exists, launch)?);
        }

        let launched_at = exists
            .launched_at
            .ok_or(VerificationError::Structural(MISSING_LAUNCHED_AT))?;
        let found = Finder::new(self.storage.as_ref())
            .find_launch(&exists.instance, launched_at)
            .await?;
        let launch = exactly_one(found, LAUNCH_KIND, &exists.instance, launched_at)?;
        Ok(fields_match(exists, &launch)?)
    }

    async fn verify_delete<D: DeleteFacts + Sync>(
        &self,
        exists: &ExistsSnapshot,
        source: DeleteSource<'_, D>,
    ) -> Result<(), VerificationError> {
        if let DeleteSource::Supplied(delete) = source {
            return Ok(deletes_match(exists, delete)?);
        }
        if let Some(delete) = &exists.delete {
            return Ok(deletes_match(exists, delete)?);
        }

        let launched_at = exists
            .launched_at
            .ok_or(VerificationError::Structural(MISSING_LAUNCHED_AT))?;
        let finder = Finder::new(self.storage.as_ref());

        if exists.deleted_at.is_some() {
            // The exists arrived after the delete; exactly one must exist.
            let found = finder
                .find_delete(&exists.instance, launched_at, None)
                .await?;
            let delete = exactly_one(found, DELETE_KIND, &exists.instance, launched_at)?;
            return Ok(deletes_match(exists, &delete)?);
        }

        // Never deleted as far as the snapshot knows. A delete may still be
        // on its way, so only deletions inside the audit period count.
        let found = finder
            .find_delete(
                &exists.instance,
                launched_at,
                Some(exists.audit_period_ending),
            )
            .await?;
        if found.is_empty() {
            Ok(())
        } else {
            Err(VerificationError::Contradiction { kind: DELETE_KIND })
        }
    }
}
