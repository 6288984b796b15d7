use std::future::Future;

use time::macros::datetime;
use time::OffsetDateTime;

use super::{check, TestResult};
use crate::fixtures::exists_snapshot;
use crate::record::{ExistsStatus, StorageSeed};
use crate::{StorageError, VerifierStorage};

const LAUNCHED: OffsetDateTime = datetime!(2026-01-05 10:00:00 UTC);

pub(super) async fn run_claim_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "claim",
            "claim_moves_pending_to_verifying",
            claim_moves_pending_to_verifying(factory).await,
        ),
        TestResult::from_result(
            "claim",
            "claim_on_claimed_or_terminal_conflicts",
            claim_on_claimed_or_terminal_conflicts(factory).await,
        ),
        TestResult::from_result(
            "claim",
            "claim_missing_exists_not_found",
            claim_missing_exists_not_found(factory).await,
        ),
        TestResult::from_result(
            "claim",
            "abort_releases_claims_commit_keeps_them",
            abort_releases_claims_commit_keeps_them(factory).await,
        ),
    ]
}

fn one_pending(id: u64) -> StorageSeed {
    StorageSeed {
        exists: vec![exists_snapshot(id, "inst-1", LAUNCHED)],
        ..Default::default()
    }
}

async fn claim_moves_pending_to_verifying<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(one_pending(1)).await;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let claimed = s
        .claim_exists(&mut snap, 1)
        .await
        .map_err(|e| format!("claim: {e}"))?;
    s.commit_snapshot(snap).await.map_err(|e| format!("commit: {e}"))?;

    check(claimed.status == ExistsStatus::Verifying, || {
        format!("claim returned status {}", claimed.status)
    })?;
    let stored = s.get_exists(1).await.map_err(|e| format!("get: {e}"))?;
    check(stored.status == ExistsStatus::Verifying, || {
        format!("stored status is {}", stored.status)
    })
}

async fn claim_on_claimed_or_terminal_conflicts<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    let mut failed = exists_snapshot(2, "inst-2", LAUNCHED);
    failed.status = ExistsStatus::Failed;
    let s = factory(StorageSeed {
        exists: vec![exists_snapshot(1, "inst-1", LAUNCHED), failed],
        ..Default::default()
    })
    .await;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.claim_exists(&mut snap, 1)
        .await
        .map_err(|e| format!("first claim: {e}"))?;

    match s.claim_exists(&mut snap, 1).await {
        Err(StorageError::ClaimConflict { id: 1, status }) if status == ExistsStatus::Verifying => {}
        other => return Err(format!("expected ClaimConflict on re-claim, got {other:?}")),
    }
    match s.claim_exists(&mut snap, 2).await {
        Err(StorageError::ClaimConflict { id: 2, status }) if status == ExistsStatus::Failed => {}
        other => return Err(format!("expected ClaimConflict on terminal, got {other:?}")),
    }
    s.commit_snapshot(snap).await.map_err(|e| format!("commit: {e}"))
}

async fn claim_missing_exists_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(StorageSeed::default()).await;
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let result = s.claim_exists(&mut snap, 42).await;
    let _ = s.abort_snapshot(snap).await;
    match result {
        Err(StorageError::ExistsNotFound { id: 42 }) => Ok(()),
        other => Err(format!("expected ExistsNotFound, got {other:?}")),
    }
}

async fn abort_releases_claims_commit_keeps_them<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(StorageSeed {
        exists: vec![
            exists_snapshot(1, "inst-1", LAUNCHED),
            exists_snapshot(2, "inst-2", LAUNCHED),
        ],
        ..Default::default()
    })
    .await;

    let mut aborted = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.claim_exists(&mut aborted, 1)
        .await
        .map_err(|e| format!("claim 1: {e}"))?;
    s.abort_snapshot(aborted).await.map_err(|e| format!("abort: {e}"))?;

    let mut committed = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    s.claim_exists(&mut committed, 2)
        .await
        .map_err(|e| format!("claim 2: {e}"))?;
    s.commit_snapshot(committed)
        .await
        .map_err(|e| format!("commit: {e}"))?;

    let first = s.get_exists(1).await.map_err(|e| format!("get 1: {e}"))?;
    check(first.status == ExistsStatus::Pending, || {
        format!("aborted claim left status {}", first.status)
    })?;
    let second = s.get_exists(2).await.map_err(|e| format!("get 2: {e}"))?;
    check(second.status == ExistsStatus::Verifying, || {
        format!("committed claim left status {}", second.status)
    })
}
