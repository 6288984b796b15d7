//! Field comparison between an exists snapshot and a corroborating record.
//!
//! Pure and deterministic. Fields are compared in a fixed order and the first
//! mismatch wins; mismatches are never aggregated.

use time::OffsetDateTime;
use verifier_storage::{DeleteRecord, ExistsSnapshot, LaunchRecord, ReconcileRecord};

use crate::error::FieldMismatch;

/// Launch-side facts a record can corroborate.
pub trait LaunchFacts {
    fn launched_at(&self) -> Option<OffsetDateTime>;
    fn instance_type_id(&self) -> &str;
    fn tenant(&self) -> &str;
    fn provider_options(&self) -> Option<&str>;
    fn os_architecture(&self) -> Option<&str>;
    fn os_version(&self) -> Option<&str>;
    fn os_distro(&self) -> Option<&str>;
}

/// Delete-side facts a record can corroborate.
pub trait DeleteFacts {
    fn launched_at(&self) -> Option<OffsetDateTime>;
    fn deleted_at(&self) -> Option<OffsetDateTime>;
}

macro_rules! launch_facts {
    ($ty:ty) => {
        impl LaunchFacts for $ty {
            fn launched_at(&self) -> Option<OffsetDateTime> {
                Some(self.launched_at)
            }
            fn instance_type_id(&self) -> &str {
                &self.instance_type_id
            }
            fn tenant(&self) -> &str {
                &self.tenant
            }
            fn provider_options(&self) -> Option<&str> {
                self.provider_options.as_deref()
            }
            fn os_architecture(&self) -> Option<&str> {
                self.os_architecture.as_deref()
            }
            fn os_version(&self) -> Option<&str> {
                self.os_version.as_deref()
            }
            fn os_distro(&self) -> Option<&str> {
                self.os_distro.as_deref()
            }
        }
    };
}

launch_facts!(LaunchRecord);
launch_facts!(ReconcileRecord);

impl DeleteFacts for DeleteRecord {
    fn launched_at(&self) -> Option<OffsetDateTime> {
        Some(self.launched_at)
    }
    fn deleted_at(&self) -> Option<OffsetDateTime> {
        Some(self.deleted_at)
    }
}

impl DeleteFacts for ReconcileRecord {
    fn launched_at(&self) -> Option<OffsetDateTime> {
        Some(self.launched_at)
    }
    fn deleted_at(&self) -> Option<OffsetDateTime> {
        self.deleted_at
    }
}

/// Timestamp equality tolerant of sub-second jitter.
///
/// Equal exactly (two absent values included), or both present and equal
/// once truncated to whole seconds.
pub fn same_second(a: Option<OffsetDateTime>, b: Option<OffsetDateTime>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b || a.unix_timestamp() == b.unix_timestamp(),
        _ => false,
    }
}

/// Compare a snapshot's launch-side attributes with a candidate record.
pub fn fields_match<L: LaunchFacts>(
    exists: &ExistsSnapshot,
    launch: &L,
) -> Result<(), FieldMismatch> {
    if !same_second(launch.launched_at(), exists.launched_at) {
        return Err(mismatch(
            "launched_at",
            show_time(exists.launched_at),
            show_time(launch.launched_at()),
        ));
    }
    compare(
        "instance_type_id",
        Some(exists.instance_type_id.as_str()),
        Some(launch.instance_type_id()),
    )?;
    compare("tenant", Some(exists.tenant.as_str()), Some(launch.tenant()))?;
    compare(
        "provider_options",
        exists.provider_options.as_deref(),
        launch.provider_options(),
    )?;
    compare(
        "os_architecture",
        exists.os_architecture.as_deref(),
        launch.os_architecture(),
    )?;
    compare("os_version", exists.os_version.as_deref(), launch.os_version())?;
    compare("os_distro", exists.os_distro.as_deref(), launch.os_distro())
}

/// Compare a snapshot's launch and delete timestamps with a delete record.
pub fn deletes_match<D: DeleteFacts>(
    exists: &ExistsSnapshot,
    delete: &D,
) -> Result<(), FieldMismatch> {
    if !same_second(delete.launched_at(), exists.launched_at) {
        return Err(mismatch(
            "launched_at",
            show_time(exists.launched_at),
            show_time(delete.launched_at()),
        ));
    }
    if !same_second(delete.deleted_at(), exists.deleted_at) {
        return Err(mismatch(
            "deleted_at",
            show_time(exists.deleted_at),
            show_time(delete.deleted_at()),
        ));
    }
    Ok(())
}

fn compare(
    field: &'static str,
    expected: Option<&str>,
    actual: Option<&str>,
) -> Result<(), FieldMismatch> {
    if expected == actual {
        Ok(())
    } else {
        Err(mismatch(field, show(expected), show(actual)))
    }
}

fn mismatch(field: &'static str, expected: String, actual: String) -> FieldMismatch {
    FieldMismatch {
        field,
        expected,
        actual,
    }
}

fn show(value: Option<&str>) -> String {
    value.unwrap_or("None").to_string()
}

fn show_time(value: Option<OffsetDateTime>) -> String {
    value.map_or_else(|| "None".to_string(), |t| t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::Duration;
    use verifier_storage::fixtures::{
        delete_record, exists_snapshot, launch_record, reconcile_record,
    };

    const T: OffsetDateTime = datetime!(2026-01-05 10:00:00.250 UTC);

    #[test]
    fn same_second_tolerates_sub_second_jitter() {
        let other = datetime!(2026-01-05 10:00:00.999 UTC);
        assert!(same_second(Some(T), Some(other)));
        assert!(same_second(Some(T), Some(T)));
        assert!(same_second(None, None));
    }

    #[test]
    fn same_second_rejects_whole_second_difference() {
        assert!(!same_second(Some(T), Some(T + Duration::SECOND)));
        assert!(!same_second(Some(T), Some(datetime!(2026-01-05 10:00:01 UTC))));
        assert!(!same_second(Some(T), None));
        assert!(!same_second(None, Some(T)));
    }

    #[test]
    fn matching_launch_passes() {
        let exists = exists_snapshot(1, "inst-1", T);
        let launch = launch_record(1, "inst-1", datetime!(2026-01-05 10:00:00.75 UTC));
        assert_eq!(fields_match(&exists, &launch), Ok(()));
    }

    #[test]
    fn first_mismatch_wins() {
        let exists = exists_snapshot(1, "inst-1", T);
        let mut launch = launch_record(1, "inst-1", T);
        launch.tenant = "tenant-b".to_string();
        launch.os_distro = Some("org.debian".to_string());

        let err = fields_match(&exists, &launch).unwrap_err();
        assert_eq!(err.field, "tenant");
        assert_eq!(err.expected, "tenant-a");
        assert_eq!(err.actual, "tenant-b");
        assert_eq!(err.to_string(), "Expected tenant to be 'tenant-a' got 'tenant-b'");
    }

    #[test]
    fn launched_at_is_checked_before_attributes() {
        let exists = exists_snapshot(1, "inst-1", T);
        let mut launch = launch_record(1, "inst-1", T + Duration::SECOND);
        launch.instance_type_id = "flavor-9".to_string();
        assert_eq!(fields_match(&exists, &launch).unwrap_err().field, "launched_at");
    }

    #[test]
    fn absent_optional_field_on_one_side_mismatches() {
        let exists = exists_snapshot(1, "inst-1", T);
        let mut launch = launch_record(1, "inst-1", T);
        launch.provider_options = None;
        let err = fields_match(&exists, &launch).unwrap_err();
        assert_eq!(err.field, "provider_options");
        assert_eq!(err.actual, "None");
    }

    #[test]
    fn reconcile_record_is_a_launch_candidate() {
        let exists = exists_snapshot(1, "inst-1", T);
        let mut rec = reconcile_record(1, "inst-1", T, None);
        assert_eq!(fields_match(&exists, &rec), Ok(()));
        rec.os_version = Some("2016".to_string());
        assert_eq!(fields_match(&exists, &rec).unwrap_err().field, "os_version");
    }

    #[test]
    fn delete_timestamps_compared_with_same_second() {
        let deleted = datetime!(2026-01-05 12:00:00.1 UTC);
        let mut exists = exists_snapshot(1, "inst-1", T);
        exists.deleted_at = Some(datetime!(2026-01-05 12:00:00.9 UTC));
        let delete = delete_record(1, "inst-1", T, deleted);
        assert_eq!(deletes_match(&exists, &delete), Ok(()));

        exists.deleted_at = Some(deleted + Duration::SECOND);
        assert_eq!(deletes_match(&exists, &delete).unwrap_err().field, "deleted_at");
    }

    #[test]
    fn never_deleted_reconcile_matches_never_deleted_snapshot() {
        let exists = exists_snapshot(1, "inst-1", T);
        let rec = reconcile_record(1, "inst-1", T, None);
        assert_eq!(deletes_match(&exists, &rec), Ok(()));

        let deleted = reconcile_record(2, "inst-1", T, Some(T + Duration::HOUR));
        assert_eq!(deletes_match(&exists, &deleted).unwrap_err().field, "deleted_at");
    }
}
