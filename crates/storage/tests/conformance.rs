//! Runs the backend conformance suite against the in-memory store.

use verifier_storage::conformance::run_conformance_suite;
use verifier_storage::InMemoryStorage;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn in_memory_storage_passes_conformance() {
    let report = run_conformance_suite(|seed| async move { InMemoryStorage::from_seed(seed) }).await;
    assert_eq!(report.failed, 0, "{report}");
    assert_eq!(report.total, 15);
}
