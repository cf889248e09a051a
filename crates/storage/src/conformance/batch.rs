use std::future::Future;

use super::{expect_value, TestResult};
use crate::{KeyValueStore, WriteOp};

pub(super) async fn run_batch_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "batch",
            "batch_applies_all_ops",
            batch_applies_all_ops(factory).await,
        ),
        TestResult::from_result(
            "batch",
            "batch_later_op_on_same_key_wins",
            batch_later_op_on_same_key_wins(factory).await,
        ),
        TestResult::from_result(
            "batch",
            "batch_can_move_a_record",
            batch_can_move_a_record(factory).await,
        ),
        TestResult::from_result(
            "batch",
            "empty_batch_is_noop",
            empty_batch_is_noop(factory).await,
        ),
    ]
}

async fn batch_applies_all_ops<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.set("stale", "x".to_string())
        .await
        .map_err(|e| format!("set: {e}"))?;
    s.write_batch(vec![
        WriteOp::set("a", "1"),
        WriteOp::set("b", "2"),
        WriteOp::delete("stale"),
    ])
    .await
    .map_err(|e| format!("write_batch: {e}"))?;
    expect_value(&s, "a", Some("1")).await?;
    expect_value(&s, "b", Some("2")).await?;
    expect_value(&s, "stale", None).await
}

async fn batch_later_op_on_same_key_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.write_batch(vec![
        WriteOp::set("k", "first"),
        WriteOp::delete("k"),
        WriteOp::set("k", "last"),
    ])
    .await
    .map_err(|e| format!("write_batch: {e}"))?;
    expect_value(&s, "k", Some("last")).await
}

/// The rekey pattern: copy under the new key and delete the old one in
/// the same batch.
async fn batch_can_move_a_record<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.set("meta/tmp_1", "record".to_string())
        .await
        .map_err(|e| format!("set: {e}"))?;
    s.write_batch(vec![
        WriteOp::set("meta/srv-1", "record"),
        WriteOp::delete("meta/tmp_1"),
        WriteOp::set("idmap/tmp_1", "srv-1"),
    ])
    .await
    .map_err(|e| format!("write_batch: {e}"))?;
    expect_value(&s, "meta/tmp_1", None).await?;
    expect_value(&s, "meta/srv-1", Some("record")).await?;
    expect_value(&s, "idmap/tmp_1", Some("srv-1")).await
}

async fn empty_batch_is_noop<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.set("k", "v".to_string())
        .await
        .map_err(|e| format!("set: {e}"))?;
    s.write_batch(Vec::new())
        .await
        .map_err(|e| format!("empty write_batch: {e}"))?;
    expect_value(&s, "k", Some("v")).await
}
