use std::future::Future;
use std::sync::Arc;

use time::macros::datetime;
use time::OffsetDateTime;

use super::TestResult;
use crate::fixtures::exists_snapshot;
use crate::record::{ExistsStatus, StorageSeed};
use crate::{StorageError, VerifierStorage};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

const LAUNCHED: OffsetDateTime = datetime!(2026-01-05 10:00:00 UTC);

pub(super) async fn run_concurrent_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "concurrent",
            "concurrent_claims_exactly_one_wins",
            concurrent_claims_exactly_one_wins(factory).await,
        ),
        TestResult::from_result(
            "concurrent",
            "concurrent_claims_different_exists_all_succeed",
            concurrent_claims_different_exists_all_succeed(factory).await,
        ),
    ]
}

// ── Concurrent claim: exactly one wins ──────────────────────────────────────

/// N tasks each open a snapshot and claim the same pending snapshot. Exactly
/// one claim succeeds; the rest must get ClaimConflict.
async fn concurrent_claims_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    let storage = Arc::new(
        factory(StorageSeed {
            exists: vec![exists_snapshot(1, "inst-1", LAUNCHED)],
            ..Default::default()
        })
        .await,
    );

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            match s.claim_exists(&mut snap, 1).await {
                Ok(_) => {
                    s.commit_snapshot(snap).await?;
                    Ok(true)
                }
                Err(StorageError::ClaimConflict { .. }) => {
                    s.abort_snapshot(snap).await?;
                    Ok(false)
                }
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    let mut winners = 0usize;
    let mut losers = 0usize;
    for handle in handles {
        let won = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e: StorageError| format!("storage error: {e}"))?;
        if won {
            winners += 1;
        } else {
            losers += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    if losers != N - 1 {
        return Err(format!("expected {} losers, got {losers}", N - 1));
    }

    let stored = storage
        .get_exists(1)
        .await
        .map_err(|e| format!("get: {e}"))?;
    if stored.status != ExistsStatus::Verifying {
        return Err(format!("expected verifying, got {}", stored.status));
    }
    Ok(())
}

// ── Concurrent claims on different snapshots: all succeed ───────────────────

/// N tasks each claim a different snapshot. No false conflicts when there is
/// no contention.
async fn concurrent_claims_different_exists_all_succeed<S, F, Fut>(
    factory: &F,
) -> Result<(), String>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    let exists = (0..N as u64)
        .map(|i| exists_snapshot(i + 1, &format!("inst-{i}"), LAUNCHED))
        .collect();
    let storage = Arc::new(
        factory(StorageSeed {
            exists,
            ..Default::default()
        })
        .await,
    );

    let mut handles = Vec::new();
    for i in 0..N as u64 {
        let s = storage.clone();
        handles.push(tokio::spawn(async move {
            let mut snap = s.begin_snapshot().await?;
            let claimed = s.claim_exists(&mut snap, i + 1).await;
            match claimed {
                Ok(_) => s.commit_snapshot(snap).await,
                Err(e) => {
                    let _ = s.abort_snapshot(snap).await;
                    Err(e)
                }
            }
        }));
    }

    for handle in handles {
        handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("unexpected claim failure: {e}"))?;
    }
    Ok(())
}
