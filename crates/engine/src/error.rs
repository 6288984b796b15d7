use std::fmt;

use time::OffsetDateTime;
use verifier_storage::StorageError;

/// One named field that differs between a snapshot and its candidate record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMismatch {
    pub field: &'static str,
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for FieldMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Expected {} to be '{}' got '{}'",
            self.field, self.expected, self.actual
        )
    }
}

/// The lookup that produced a NotFound or Ambiguous outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupQuery {
    pub instance: String,
    pub launched_at: OffsetDateTime,
}

impl fmt::Display for LookupQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{instance: {}, launched_at: {}}}",
            self.instance, self.launched_at
        )
    }
}

/// Outcome of a failed verification step.
///
/// Everything except `Infrastructure` is a verification-level condition: it
/// says something about the evidence, not about the system. `Structural` is
/// fatal to the attempt; the other evidence conditions send the snapshot to
/// the reconciliation fallback.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    /// A required field is absent from the snapshot.
    #[error("{0}")]
    Structural(&'static str),

    #[error("{0}")]
    FieldMismatch(FieldMismatch),

    /// Zero candidates where exactly one was required.
    #[error("Could not find {kind} using {query}")]
    NotFound {
        kind: &'static str,
        query: LookupQuery,
    },

    /// More than one candidate where exactly one was required.
    #[error("Ambiguous results for {kind} using {query}")]
    Ambiguous {
        kind: &'static str,
        query: LookupQuery,
    },

    /// A deletion exists that a never-deleted snapshot should have reflected.
    #[error("Found {kind}s for non-delete exist")]
    Contradiction { kind: &'static str },

    /// Store failure or any other condition outside the taxonomy above.
    #[error(transparent)]
    Infrastructure(#[from] StorageError),
}

impl VerificationError {
    /// Whether this failure is resolved by trying reconciled data.
    pub fn triggers_fallback(&self) -> bool {
        matches!(
            self,
            Self::FieldMismatch(_)
                | Self::NotFound { .. }
                | Self::Ambiguous { .. }
                | Self::Contradiction { .. }
        )
    }
}

impl From<FieldMismatch> for VerificationError {
    fn from(mismatch: FieldMismatch) -> Self {
        Self::FieldMismatch(mismatch)
    }
}
