use std::future::Future;

use time::macros::datetime;
use time::OffsetDateTime;

use super::{check, TestResult};
use crate::fixtures::exists_snapshot;
use crate::record::{ExistsStatus, StorageSeed};
use crate::{StorageError, VerifierStorage};

const LAUNCHED: OffsetDateTime = datetime!(2026-01-05 10:00:00 UTC);

pub(super) async fn run_transition_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "transition",
            "update_persists_status_and_reason",
            update_persists_status_and_reason(factory).await,
        ),
        TestResult::from_result(
            "transition",
            "terminal_status_is_final",
            terminal_status_is_final(factory).await,
        ),
        TestResult::from_result(
            "transition",
            "resaving_terminal_status_is_allowed",
            resaving_terminal_status_is_allowed(factory).await,
        ),
        TestResult::from_result(
            "transition",
            "update_missing_exists_not_found",
            update_missing_exists_not_found(factory).await,
        ),
    ]
}

async fn update_persists_status_and_reason<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    let mut exists = exists_snapshot(1, "inst-1", LAUNCHED);
    let s = factory(StorageSeed {
        exists: vec![exists.clone()],
        ..Default::default()
    })
    .await;

    exists.status = ExistsStatus::Failed;
    exists.fail_reason = Some("tenant mismatch".to_string());
    s.update_exists(&exists)
        .await
        .map_err(|e| format!("update: {e}"))?;

    let stored = s.get_exists(1).await.map_err(|e| format!("get: {e}"))?;
    check(stored.status == ExistsStatus::Failed, || {
        format!("stored status is {}", stored.status)
    })?;
    check(stored.fail_reason.as_deref() == Some("tenant mismatch"), || {
        format!("stored fail_reason is {:?}", stored.fail_reason)
    })
}

async fn terminal_status_is_final<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    let mut exists = exists_snapshot(1, "inst-1", LAUNCHED);
    exists.status = ExistsStatus::Verified;
    let s = factory(StorageSeed {
        exists: vec![exists.clone()],
        ..Default::default()
    })
    .await;

    for next in [
        ExistsStatus::Pending,
        ExistsStatus::Verifying,
        ExistsStatus::Failed,
        ExistsStatus::Reconciled,
    ] {
        exists.status = next;
        match s.update_exists(&exists).await {
            Err(StorageError::InvalidTransition { from, to, .. })
                if from == ExistsStatus::Verified && to == next => {}
            other => return Err(format!("verified -> {next}: expected InvalidTransition, got {other:?}")),
        }
    }

    let stored = s.get_exists(1).await.map_err(|e| format!("get: {e}"))?;
    check(stored.status == ExistsStatus::Verified, || {
        format!("stored status changed to {}", stored.status)
    })
}

async fn resaving_terminal_status_is_allowed<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    let mut exists = exists_snapshot(1, "inst-1", LAUNCHED);
    exists.status = ExistsStatus::Reconciled;
    exists.fail_reason = Some("original".to_string());
    let s = factory(StorageSeed {
        exists: vec![exists.clone()],
        ..Default::default()
    })
    .await;

    s.update_exists(&exists)
        .await
        .map_err(|e| format!("re-save: {e}"))
}

async fn update_missing_exists_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(StorageSeed::default()).await;
    match s.update_exists(&exists_snapshot(7, "inst-7", LAUNCHED)).await {
        Err(StorageError::ExistsNotFound { id: 7 }) => Ok(()),
        other => Err(format!("expected ExistsNotFound, got {other:?}")),
    }
}
