use std::future::Future;

use super::TestResult;
use crate::{KeyValueStore, WriteOp};

pub(super) async fn run_prefix_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "prefix",
            "prefix_scan_is_sorted_and_exact",
            prefix_scan_is_sorted_and_exact(factory).await,
        ),
        TestResult::from_result(
            "prefix",
            "prefix_scan_empty_store",
            prefix_scan_empty_store(factory).await,
        ),
        TestResult::from_result(
            "prefix",
            "prefix_scan_reflects_deletes",
            prefix_scan_reflects_deletes(factory).await,
        ),
    ]
}

async fn prefix_scan_is_sorted_and_exact<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.write_batch(vec![
        WriteOp::set("queue/patch/srv-2", "[]"),
        WriteOp::set("queue/create", "[]"),
        WriteOp::set("queue/patch/srv-1", "[]"),
        WriteOp::set("queue/patchy", "[]"),
        WriteOp::set("meta/srv-1", "{}"),
    ])
    .await
    .map_err(|e| format!("write_batch: {e}"))?;

    let keys = s
        .keys_with_prefix("queue/patch/")
        .await
        .map_err(|e| format!("keys_with_prefix: {e}"))?;
    let expected = vec!["queue/patch/srv-1".to_string(), "queue/patch/srv-2".to_string()];
    if keys != expected {
        return Err(format!("expected {expected:?}, got {keys:?}"));
    }
    Ok(())
}

async fn prefix_scan_empty_store<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let keys = s
        .keys_with_prefix("meta/")
        .await
        .map_err(|e| format!("keys_with_prefix: {e}"))?;
    if !keys.is_empty() {
        return Err(format!("expected no keys, got {keys:?}"));
    }
    Ok(())
}

async fn prefix_scan_reflects_deletes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.write_batch(vec![WriteOp::set("idmap/a", "1"), WriteOp::set("idmap/b", "2")])
        .await
        .map_err(|e| format!("write_batch: {e}"))?;
    s.delete("idmap/a")
        .await
        .map_err(|e| format!("delete: {e}"))?;
    let keys = s
        .keys_with_prefix("idmap/")
        .await
        .map_err(|e| format!("keys_with_prefix: {e}"))?;
    if keys != vec!["idmap/b".to_string()] {
        return Err(format!("expected [idmap/b], got {keys:?}"));
    }
    Ok(())
}
