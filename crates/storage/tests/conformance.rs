//! Runs the key-value conformance suite against the bundled backends.

use fieldsync_storage::conformance::run_conformance_suite;
use fieldsync_storage::{FileStore, MemoryStore};

#[tokio::test]
async fn memory_store_conformance() {
    let report = run_conformance_suite(|| async { MemoryStore::new() }).await;
    assert!(report.failed == 0, "{report}");
    assert!(report.total > 0);
}

#[tokio::test]
async fn file_store_conformance() {
    let report = run_conformance_suite(|| async {
        let dir = std::env::temp_dir().join(format!("fieldsync-conf-{:016x}", rand::random::<u64>()));
        FileStore::open(dir.join("store.json"))
            .await
            .expect("open scratch file store")
    })
    .await;
    assert!(report.failed == 0, "{report}");
}
