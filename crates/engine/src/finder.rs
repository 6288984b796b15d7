//! Candidate lookups for launch, delete and reconcile records.
//!
//! Every lookup is scoped to an instance and the one-second window enclosing
//! a launch timestamp. Cardinality is left to the caller: [`exactly_one`]
//! turns zero results into `NotFound` and several into `Ambiguous`.

use time::{Duration, OffsetDateTime};
use verifier_storage::{
    DeleteRecord, LaunchRecord, ReconcileRecord, StorageError, TimeWindow, VerifierStorage,
};

use crate::error::{LookupQuery, VerificationError};

pub const LAUNCH_KIND: &str = "InstanceUsage";
pub const DELETE_KIND: &str = "InstanceDelete";
pub const RECONCILE_KIND: &str = "InstanceReconcile";

/// `[t truncated to the second, that + 999_999µs]`.
pub fn launch_window(launched_at: OffsetDateTime) -> TimeWindow {
    let start = launched_at - Duration::nanoseconds(i64::from(launched_at.nanosecond()));
    TimeWindow {
        start,
        end: start + Duration::microseconds(999_999),
    }
}

pub struct Finder<'a, S> {
    storage: &'a S,
}

impl<'a, S: VerifierStorage> Finder<'a, S> {
    pub fn new(storage: &'a S) -> Self {
        Self { storage }
    }

    pub async fn find_launch(
        &self,
        instance: &str,
        launched_at: OffsetDateTime,
    ) -> Result<Vec<LaunchRecord>, StorageError> {
        self.storage
            .find_launches(instance, &launch_window(launched_at))
            .await
    }

    /// `deleted_max` restricts the search to deletions at or before it.
    pub async fn find_delete(
        &self,
        instance: &str,
        launched_at: OffsetDateTime,
        deleted_max: Option<OffsetDateTime>,
    ) -> Result<Vec<DeleteRecord>, StorageError> {
        self.storage
            .find_deletes(instance, &launch_window(launched_at), deleted_max)
            .await
    }

    pub async fn find_reconcile(
        &self,
        instance: &str,
        launched_at: OffsetDateTime,
    ) -> Result<Vec<ReconcileRecord>, StorageError> {
        self.storage
            .find_reconciles(instance, &launch_window(launched_at))
            .await
    }
}

/// Require exactly one candidate. Never picks one of several.
pub fn exactly_one<T>(
    mut found: Vec<T>,
    kind: &'static str,
    instance: &str,
    launched_at: OffsetDateTime,
) -> Result<T, VerificationError> {
    let query = || LookupQuery {
        instance: instance.to_string(),
        launched_at,
    };
    match found.len() {
        0 => Err(VerificationError::NotFound {
            kind,
            query: query(),
        }),
        1 => Ok(found.remove(0)),
        _ => Err(VerificationError::Ambiguous {
            kind,
            query: query(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn window_covers_the_enclosing_second() {
        let window = launch_window(datetime!(2026-01-05 10:00:00.123456 UTC));
        assert_eq!(window.start, datetime!(2026-01-05 10:00:00 UTC));
        assert_eq!(window.end, datetime!(2026-01-05 10:00:00.999999 UTC));
        assert!(!window.contains(datetime!(2026-01-05 10:00:01 UTC)));
    }

    #[test]
    fn window_of_whole_second_starts_there() {
        let t = datetime!(2026-01-05 10:00:00 UTC);
        assert_eq!(launch_window(t).start, t);
    }

    #[test]
    fn exactly_one_classifies_cardinality() {
        let t = datetime!(2026-01-05 10:00:00 UTC);
        assert_eq!(exactly_one(vec![7], LAUNCH_KIND, "inst-1", t).unwrap(), 7);

        match exactly_one(Vec::<u8>::new(), LAUNCH_KIND, "inst-1", t) {
            Err(VerificationError::NotFound { kind, query }) => {
                assert_eq!(kind, LAUNCH_KIND);
                assert_eq!(query.instance, "inst-1");
            }
            other => panic!("expected NotFound, got {other:?}"),
        }

        match exactly_one(vec![1, 2], RECONCILE_KIND, "inst-1", t) {
            Err(VerificationError::Ambiguous { kind, .. }) => assert_eq!(kind, RECONCILE_KIND),
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }
}
