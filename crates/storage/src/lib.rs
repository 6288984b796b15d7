pub mod conformance;
mod error;
pub mod fixtures;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{InMemoryStorage, MemorySnapshot};
pub use record::{
    DeleteRecord, ExistsFilter, ExistsSnapshot, ExistsStatus, LaunchRecord, ReconcileRecord,
    StorageSeed, TimeWindow,
};
pub use traits::VerifierStorage;
