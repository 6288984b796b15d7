use crate::record::ExistsStatus;

/// All errors that can be returned by a VerifierStorage implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No exists snapshot with the given id.
    #[error("exists snapshot not found: {id}")]
    ExistsNotFound { id: u64 },

    /// Optimistic claim lost: the snapshot was no longer pending when the
    /// conditional `pending -> verifying` update ran.
    #[error("claim conflict on exists {id}: status is {status}")]
    ClaimConflict { id: u64, status: ExistsStatus },

    /// The requested status change is not a legal lifecycle transition.
    #[error("invalid transition on exists {id}: {from} -> {to}")]
    InvalidTransition {
        id: u64,
        from: ExistsStatus,
        to: ExistsStatus,
    },

    /// A backend-specific storage error (DB connection, serialization, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Short category name, stored as the fail reason when a verification
    /// attempt dies on an infrastructure fault.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ExistsNotFound { .. } => "ExistsNotFound",
            Self::ClaimConflict { .. } => "ClaimConflict",
            Self::InvalidTransition { .. } => "InvalidTransition",
            Self::Backend(_) => "StorageBackendError",
        }
    }
}
