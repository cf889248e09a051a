use std::future::Future;

use super::{expect_value, TestResult};
use crate::KeyValueStore;

pub(super) async fn run_basic_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "basic",
            "missing_key_returns_none",
            missing_key_returns_none(factory).await,
        ),
        TestResult::from_result(
            "basic",
            "set_then_get_returns_value",
            set_then_get_returns_value(factory).await,
        ),
        TestResult::from_result(
            "basic",
            "set_overwrites_existing_value",
            set_overwrites_existing_value(factory).await,
        ),
        TestResult::from_result(
            "basic",
            "delete_removes_value",
            delete_removes_value(factory).await,
        ),
        TestResult::from_result(
            "basic",
            "delete_missing_key_is_ok",
            delete_missing_key_is_ok(factory).await,
        ),
        TestResult::from_result(
            "basic",
            "values_are_stored_verbatim",
            values_are_stored_verbatim(factory).await,
        ),
    ]
}

async fn missing_key_returns_none<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    expect_value(&s, "meta/nothing", None).await
}

async fn set_then_get_returns_value<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.set("meta/a", "one".to_string())
        .await
        .map_err(|e| format!("set: {e}"))?;
    expect_value(&s, "meta/a", Some("one")).await?;
    // A neighbouring key must not be affected.
    expect_value(&s, "meta/b", None).await
}

async fn set_overwrites_existing_value<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.set("k", "first".to_string())
        .await
        .map_err(|e| format!("set first: {e}"))?;
    s.set("k", "second".to_string())
        .await
        .map_err(|e| format!("set second: {e}"))?;
    expect_value(&s, "k", Some("second")).await
}

async fn delete_removes_value<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.set("k", "v".to_string())
        .await
        .map_err(|e| format!("set: {e}"))?;
    s.delete("k").await.map_err(|e| format!("delete: {e}"))?;
    expect_value(&s, "k", None).await
}

async fn delete_missing_key_is_ok<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    s.delete("never-written")
        .await
        .map_err(|e| format!("delete of missing key failed: {e}"))
}

async fn values_are_stored_verbatim<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: KeyValueStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let s = factory().await;
    let raw = "{\"note\":\"line one\\nline two\",\"name\":\"Zoë / 東京\"}\n";
    s.set("doc/x", raw.to_string())
        .await
        .map_err(|e| format!("set: {e}"))?;
    expect_value(&s, "doc/x", Some(raw)).await
}
