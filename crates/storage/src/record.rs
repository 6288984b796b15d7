use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Verification status of an exists snapshot.
///
/// `Pending` and `Verifying` are transient; the other three are terminal and
/// exactly one of them holds for a snapshot at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExistsStatus {
    Pending,
    Verifying,
    Verified,
    Reconciled,
    Failed,
}

impl ExistsStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Reconciled | Self::Failed)
    }

    /// Whether a stored row may move from `self` to `next`.
    ///
    /// Re-saving the same status is always allowed. A terminal status never
    /// changes, and `Verifying -> Pending` only happens when a claim is
    /// rolled back.
    pub fn can_transition_to(self, next: ExistsStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Pending => true,
            Self::Verifying => next != Self::Verifying,
            Self::Verified | Self::Reconciled | Self::Failed => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verifying => "verifying",
            Self::Verified => "verified",
            Self::Reconciled => "reconciled",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ExistsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audited observation of an instance's billing attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistsSnapshot {
    pub id: u64,
    pub instance: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub launched_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub audit_period_beginning: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub audit_period_ending: OffsetDateTime,
    pub instance_type_id: String,
    pub tenant: String,
    #[serde(default)]
    pub provider_options: Option<String>,
    #[serde(default)]
    pub os_architecture: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub os_distro: Option<String>,
    #[serde(default = "default_status")]
    pub status: ExistsStatus,
    #[serde(default)]
    pub fail_reason: Option<String>,
    /// Raw inbound message as `[routing_key, body]`. Only used to re-emit
    /// the verified notification.
    #[serde(default)]
    pub raw: Option<serde_json::Value>,
    /// Launch record already resolved by the store.
    #[serde(default)]
    pub usage: Option<LaunchRecord>,
    /// Delete record already resolved by the store.
    #[serde(default)]
    pub delete: Option<DeleteRecord>,
}

fn default_status() -> ExistsStatus {
    ExistsStatus::Pending
}

/// Corroborates that an instance was launched with the given attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchRecord {
    pub id: u64,
    pub instance: String,
    #[serde(with = "time::serde::rfc3339")]
    pub launched_at: OffsetDateTime,
    pub instance_type_id: String,
    pub tenant: String,
    #[serde(default)]
    pub provider_options: Option<String>,
    #[serde(default)]
    pub os_architecture: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub os_distro: Option<String>,
}

/// Corroborates that the instance launched at `launched_at` was deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRecord {
    pub id: u64,
    pub instance: String,
    #[serde(with = "time::serde::rfc3339")]
    pub launched_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub deleted_at: OffsetDateTime,
}

/// Authoritative launch + delete facts re-derived by the reconciler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileRecord {
    pub id: u64,
    pub instance: String,
    #[serde(with = "time::serde::rfc3339")]
    pub launched_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
    pub instance_type_id: String,
    pub tenant: String,
    #[serde(default)]
    pub provider_options: Option<String>,
    #[serde(default)]
    pub os_architecture: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub os_distro: Option<String>,
    /// Where the reconciler got its facts from.
    #[serde(default)]
    pub source: String,
}

/// A closed time interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

impl TimeWindow {
    pub fn contains(&self, t: OffsetDateTime) -> bool {
        self.start <= t && t <= self.end
    }
}

/// Selection criteria for exists snapshots. `None` fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExistsFilter {
    /// Inclusive upper bound on `audit_period_ending`.
    pub ending_max: Option<OffsetDateTime>,
    pub status: Option<ExistsStatus>,
}

impl ExistsFilter {
    pub fn matches(&self, exists: &ExistsSnapshot) -> bool {
        if let Some(max) = self.ending_max {
            if exists.audit_period_ending > max {
                return false;
            }
        }
        if let Some(status) = self.status {
            if exists.status != status {
                return false;
            }
        }
        true
    }
}

/// Bulk contents for seeding a backend (fixtures, conformance, CLI replay).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSeed {
    #[serde(default)]
    pub exists: Vec<ExistsSnapshot>,
    #[serde(default)]
    pub launches: Vec<LaunchRecord>,
    #[serde(default)]
    pub deletes: Vec<DeleteRecord>,
    #[serde(default)]
    pub reconciles: Vec<ReconcileRecord>,
}
