//! Record constructors with sensible defaults.
//!
//! Every builder produces records that agree with each other on all
//! billing attributes, so a test only spells out the field it wants to
//! break. Shared by the conformance suite and the engine tests.

use time::{Duration, OffsetDateTime};

use crate::record::{
    DeleteRecord, ExistsSnapshot, ExistsStatus, LaunchRecord, ReconcileRecord,
};

pub const INSTANCE_TYPE_ID: &str = "flavor-2";
pub const TENANT: &str = "tenant-a";
pub const PROVIDER_OPTIONS: &str = "4";
pub const OS_ARCHITECTURE: &str = "x64";
pub const OS_VERSION: &str = "2012";
pub const OS_DISTRO: &str = "com.microsoft.server";

/// A pending, never-deleted snapshot whose audit period ends one hour after
/// launch.
pub fn exists_snapshot(id: u64, instance: &str, launched_at: OffsetDateTime) -> ExistsSnapshot {
    ExistsSnapshot {
        id,
        instance: instance.to_string(),
        launched_at: Some(launched_at),
        deleted_at: None,
        audit_period_beginning: Some(launched_at),
        audit_period_ending: launched_at + Duration::HOUR,
        instance_type_id: INSTANCE_TYPE_ID.to_string(),
        tenant: TENANT.to_string(),
        provider_options: Some(PROVIDER_OPTIONS.to_string()),
        os_architecture: Some(OS_ARCHITECTURE.to_string()),
        os_version: Some(OS_VERSION.to_string()),
        os_distro: Some(OS_DISTRO.to_string()),
        status: ExistsStatus::Pending,
        fail_reason: None,
        raw: Some(serde_json::json!([
            "monitor.info",
            {
                "event_type": "compute.instance.exists",
                "message_id": format!("msg-{id}"),
                "payload": {"instance_id": instance}
            }
        ])),
        usage: None,
        delete: None,
    }
}

pub fn launch_record(id: u64, instance: &str, launched_at: OffsetDateTime) -> LaunchRecord {
    LaunchRecord {
        id,
        instance: instance.to_string(),
        launched_at,
        instance_type_id: INSTANCE_TYPE_ID.to_string(),
        tenant: TENANT.to_string(),
        provider_options: Some(PROVIDER_OPTIONS.to_string()),
        os_architecture: Some(OS_ARCHITECTURE.to_string()),
        os_version: Some(OS_VERSION.to_string()),
        os_distro: Some(OS_DISTRO.to_string()),
    }
}

pub fn delete_record(
    id: u64,
    instance: &str,
    launched_at: OffsetDateTime,
    deleted_at: OffsetDateTime,
) -> DeleteRecord {
    DeleteRecord {
        id,
        instance: instance.to_string(),
        launched_at,
        deleted_at,
    }
}

pub fn reconcile_record(
    id: u64,
    instance: &str,
    launched_at: OffsetDateTime,
    deleted_at: Option<OffsetDateTime>,
) -> ReconcileRecord {
    ReconcileRecord {
        id,
        instance: instance.to_string(),
        launched_at,
        deleted_at,
        instance_type_id: INSTANCE_TYPE_ID.to_string(),
        tenant: TENANT.to_string(),
        provider_options: Some(PROVIDER_OPTIONS.to_string()),
        os_architecture: Some(OS_ARCHITECTURE.to_string()),
        os_version: Some(OS_VERSION.to_string()),
        os_distro: Some(OS_DISTRO.to_string()),
        source: "reconciler:test".to_string(),
    }
}
