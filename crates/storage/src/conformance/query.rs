use std::future::Future;

use time::macros::datetime;
use time::{Duration, OffsetDateTime};

use super::{check, TestResult};
use crate::fixtures::{delete_record, exists_snapshot, launch_record, reconcile_record};
use crate::record::{ExistsFilter, ExistsStatus, StorageSeed, TimeWindow};
use crate::VerifierStorage;

const LAUNCHED: OffsetDateTime = datetime!(2026-01-05 10:00:00 UTC);

fn one_second_window() -> TimeWindow {
    TimeWindow {
        start: LAUNCHED,
        end: LAUNCHED + Duration::microseconds(999_999),
    }
}

pub(super) async fn run_query_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "query",
            "launch_window_is_inclusive",
            launch_window_is_inclusive(factory).await,
        ),
        TestResult::from_result(
            "query",
            "lookups_are_scoped_to_instance",
            lookups_are_scoped_to_instance(factory).await,
        ),
        TestResult::from_result(
            "query",
            "deleted_max_bounds_deletions",
            deleted_max_bounds_deletions(factory).await,
        ),
        TestResult::from_result(
            "query",
            "list_exists_ordered_by_id_and_limited",
            list_exists_ordered_by_id_and_limited(factory).await,
        ),
        TestResult::from_result(
            "query",
            "exists_filter_applies_status_and_ending",
            exists_filter_applies_status_and_ending(factory).await,
        ),
    ]
}

// ── Window bounds: both ends included, next second excluded ──────────────────

async fn launch_window_is_inclusive<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    let window = one_second_window();
    let s = factory(StorageSeed {
        launches: vec![
            launch_record(1, "inst-1", window.start),
            launch_record(2, "inst-1", window.end),
            launch_record(3, "inst-1", LAUNCHED + Duration::SECOND),
        ],
        reconciles: vec![
            reconcile_record(1, "inst-1", window.end, None),
            reconcile_record(2, "inst-1", LAUNCHED - Duration::microseconds(1), None),
        ],
        ..Default::default()
    })
    .await;

    let launches = s
        .find_launches("inst-1", &window)
        .await
        .map_err(|e| format!("find_launches: {e}"))?;
    let mut ids: Vec<u64> = launches.iter().map(|l| l.id).collect();
    ids.sort_unstable();
    check(ids == vec![1, 2], || {
        format!("expected launches [1, 2], got {ids:?}")
    })?;

    let reconciles = s
        .find_reconciles("inst-1", &window)
        .await
        .map_err(|e| format!("find_reconciles: {e}"))?;
    check(reconciles.len() == 1 && reconciles[0].id == 1, || {
        format!("expected reconcile [1], got {reconciles:?}")
    })
}

async fn lookups_are_scoped_to_instance<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    let window = one_second_window();
    let s = factory(StorageSeed {
        launches: vec![launch_record(1, "inst-other", LAUNCHED)],
        deletes: vec![delete_record(
            1,
            "inst-other",
            LAUNCHED,
            LAUNCHED + Duration::MINUTE,
        )],
        reconciles: vec![reconcile_record(1, "inst-other", LAUNCHED, None)],
        ..Default::default()
    })
    .await;

    let launches = s.find_launches("inst-1", &window).await.map_err(|e| e.to_string())?;
    let deletes = s
        .find_deletes("inst-1", &window, None)
        .await
        .map_err(|e| e.to_string())?;
    let reconciles = s.find_reconciles("inst-1", &window).await.map_err(|e| e.to_string())?;
    check(
        launches.is_empty() && deletes.is_empty() && reconciles.is_empty(),
        || "records of another instance leaked into the lookup".to_string(),
    )
}

async fn deleted_max_bounds_deletions<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    let window = one_second_window();
    let deleted = LAUNCHED + Duration::HOUR;
    let s = factory(StorageSeed {
        deletes: vec![delete_record(1, "inst-1", LAUNCHED, deleted)],
        ..Default::default()
    })
    .await;

    let unbounded = s
        .find_deletes("inst-1", &window, None)
        .await
        .map_err(|e| e.to_string())?;
    check(unbounded.len() == 1, || {
        format!("expected 1 delete without bound, got {}", unbounded.len())
    })?;

    let at_bound = s
        .find_deletes("inst-1", &window, Some(deleted))
        .await
        .map_err(|e| e.to_string())?;
    check(at_bound.len() == 1, || {
        format!("deleted_max must be inclusive, got {}", at_bound.len())
    })?;

    let before = s
        .find_deletes("inst-1", &window, Some(deleted - Duration::SECOND))
        .await
        .map_err(|e| e.to_string())?;
    check(before.is_empty(), || {
        format!("expected no delete before bound, got {}", before.len())
    })
}

async fn list_exists_ordered_by_id_and_limited<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory(StorageSeed {
        exists: vec![
            exists_snapshot(3, "inst-3", LAUNCHED),
            exists_snapshot(1, "inst-1", LAUNCHED),
            exists_snapshot(2, "inst-2", LAUNCHED),
        ],
        ..Default::default()
    })
    .await;

    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let page = s
        .list_exists(&mut snap, &ExistsFilter::default(), 2)
        .await
        .map_err(|e| format!("list: {e}"))?;
    let count = s
        .count_exists(&mut snap, &ExistsFilter::default())
        .await
        .map_err(|e| format!("count: {e}"))?;
    s.commit_snapshot(snap).await.map_err(|e| format!("commit: {e}"))?;

    let ids: Vec<u64> = page.iter().map(|e| e.id).collect();
    check(ids == vec![1, 2], || format!("expected [1, 2], got {ids:?}"))?;
    check(count == 3, || format!("expected count 3, got {count}"))
}

async fn exists_filter_applies_status_and_ending<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: VerifierStorage,
    F: Fn(StorageSeed) -> Fut,
    Fut: Future<Output = S>,
{
    let mut verified = exists_snapshot(2, "inst-2", LAUNCHED);
    verified.status = ExistsStatus::Verified;
    let late = exists_snapshot(3, "inst-3", LAUNCHED + Duration::DAY);
    let s = factory(StorageSeed {
        exists: vec![exists_snapshot(1, "inst-1", LAUNCHED), verified, late],
        ..Default::default()
    })
    .await;

    let filter = ExistsFilter {
        ending_max: Some(LAUNCHED + Duration::HOUR),
        status: Some(ExistsStatus::Pending),
    };
    let mut snap = s.begin_snapshot().await.map_err(|e| format!("begin: {e}"))?;
    let page = s
        .list_exists(&mut snap, &filter, 1000)
        .await
        .map_err(|e| format!("list: {e}"))?;
    s.commit_snapshot(snap).await.map_err(|e| format!("commit: {e}"))?;

    let ids: Vec<u64> = page.iter().map(|e| e.id).collect();
    check(ids == vec![1], || format!("expected [1], got {ids:?}"))
}
