//! End-to-end behavior of `SyncEngine`.

use std::path::PathBuf;
use std::sync::Arc;

use fieldsync_engine::{
    Disconnected, EditableSections, EngineConfig, EngineError, ErrorKind, FieldPath,
    InMemoryRemote, NewInstance, RemoteCall, RemoteError, SaveOutcome, StructuralOp, SyncEngine,
};
use fieldsync_storage::{FileStore, MemoryStore};
use serde_json::{json, Value};

fn engine(remote: &Arc<InMemoryRemote>) -> SyncEngine {
    SyncEngine::new(
        Arc::new(MemoryStore::new()),
        remote.clone(),
        EngineConfig::default(),
    )
}

fn inspection() -> NewInstance {
    NewInstance {
        form_type: "Inspection".to_string(),
        form_version_hint: Some("3".to_string()),
        initial_payload: json!({"site": {"name": "North"}}),
        schema: json!({
            "sections": [
                {"key": "general", "fields": [{"key": "pressure"}]},
                {
                    "key": "findings",
                    "repeatable": true,
                    "label_field": "title",
                    "fields": [{"key": "title"}, {"key": "notes"}]
                }
            ]
        }),
        workflow_definition: Value::Null,
    }
}

fn pressure() -> FieldPath {
    FieldPath::root().field("general").field("pressure")
}

fn findings() -> FieldPath {
    FieldPath::root().field("findings")
}

fn scratch_file(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("fieldsync-engine-{:016x}", rand::random::<u64>()))
        .join(name)
}

#[tokio::test]
async fn create_instance_is_local_until_synced() {
    let remote = Arc::new(InMemoryRemote::new());
    let engine = engine(&remote);
    let temp_id = engine.create_instance(inspection()).await.unwrap();

    assert!(temp_id.starts_with("tmp_"));
    let instance = engine.instance(&temp_id).await.unwrap().unwrap();
    assert!(instance.meta.is_local);
    assert_eq!(instance.meta.concurrency_token, None);
    assert_eq!(instance.meta.workflow_state, "");
    assert_eq!(instance.meta.form_version_hint.as_deref(), Some("3"));
    assert_eq!(engine.creation_queue().await.unwrap().len(), 1);

    let report = engine.connectivity_changed(true).await.unwrap();
    assert_eq!(report.created.len(), 1);
    let server_id = engine.resolve(&temp_id).await.unwrap();
    assert_eq!(server_id, report.created[0].server_id);

    // Old id still finds the instance.
    let instance = engine.instance(&temp_id).await.unwrap().unwrap();
    assert_eq!(instance.meta.local_id, server_id);
    assert!(!instance.meta.is_local);
    assert_eq!(
        remote.entity(&server_id).unwrap().form_version.as_deref(),
        Some("3")
    );
}

#[tokio::test]
async fn going_offline_does_not_sync() {
    let remote = Arc::new(InMemoryRemote::new());
    let engine = engine(&remote);
    assert!(engine.connectivity_changed(false).await.is_none());
    assert!(engine.connectivity_changed(true).await.is_some());
    // Already online: no new cycle.
    assert!(engine.connectivity_changed(true).await.is_none());
    assert!(engine.is_online());
}

#[tokio::test]
async fn save_sends_edits_and_reports_synced() {
    let remote = Arc::new(InMemoryRemote::new());
    let engine = engine(&remote);
    let temp_id = engine.create_instance(inspection()).await.unwrap();
    engine.sync().await;
    let server_id = engine.resolve(&temp_id).await.unwrap();

    assert!(engine.record_edit(&temp_id, "general", pressure(), json!("12")));
    assert_eq!(engine.save(&temp_id).await.unwrap(), SaveOutcome::Synced);
    assert_eq!(
        remote.entity(&server_id).unwrap().revision.document["general"]["pressure"],
        "12"
    );
    assert!(engine.patch_queue(&server_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn save_while_unreachable_is_saved_offline() {
    let engine = SyncEngine::new(
        Arc::new(MemoryStore::new()),
        Arc::new(Disconnected),
        EngineConfig::default(),
    );
    let temp_id = engine.create_instance(inspection()).await.unwrap();
    engine.record_edit(&temp_id, "general", pressure(), json!(5));
    assert_eq!(engine.save(&temp_id).await.unwrap(), SaveOutcome::SavedOffline);

    let queued = engine.patch_queue(&temp_id).await.unwrap();
    assert_eq!(queued.len(), 1);
    let doc = engine.instance(&temp_id).await.unwrap().unwrap().document;
    assert_eq!(doc.0["general"]["pressure"], 5);
}

#[tokio::test]
async fn save_surfaces_conflicts_and_validation() {
    let remote = Arc::new(InMemoryRemote::new());
    let engine = engine(&remote);
    let temp_id = engine.create_instance(inspection()).await.unwrap();
    engine.sync().await;
    let server_id = engine.resolve(&temp_id).await.unwrap();

    remote
        .external_patch(
            &server_id,
            &[fieldsync_engine::PatchOp::replace(pressure(), json!("theirs"))],
        )
        .unwrap();
    engine.record_edit(&server_id, "general", pressure(), json!("mine"));
    let err = engine.save(&server_id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let doc = engine.instance(&server_id).await.unwrap().unwrap().document;
    assert_eq!(doc.0["general"]["pressure"], "theirs");

    remote.reject_path("/general/pressure");
    engine.record_edit(&server_id, "general", pressure(), json!("bad"));
    let err = engine.save(&server_id).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation { .. }));
    // Rejected job stays queued for the user to fix.
    assert_eq!(engine.patch_queue(&server_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn read_only_sections_are_not_recorded() {
    let remote = Arc::new(InMemoryRemote::new());
    let engine = engine(&remote);
    let temp_id = engine.create_instance(inspection()).await.unwrap();
    engine.set_editable_sections(&temp_id, EditableSections::only(["findings"]));
    assert!(!engine.record_edit(&temp_id, "general", pressure(), json!(1)));
    assert_eq!(engine.flush(&temp_id).await.unwrap(), 0);
}

#[tokio::test]
async fn structural_ops_follow_pending_field_edits() {
    let remote = Arc::new(InMemoryRemote::new());
    let engine = engine(&remote);
    let temp_id = engine.create_instance(inspection()).await.unwrap();

    engine.record_edit(&temp_id, "general", pressure(), json!("7"));
    let job = engine
        .apply_structural(&temp_id, StructuralOp::AddEntry { list_path: findings() })
        .await
        .unwrap();
    assert_eq!(job.section_key, "findings");
    engine
        .apply_structural(
            &temp_id,
            StructuralOp::RenameEntry {
                list_path: findings(),
                index: 0,
                label: "Cracked weld".into(),
            },
        )
        .await
        .unwrap();

    let sections: Vec<_> = engine
        .patch_queue(&temp_id)
        .await
        .unwrap()
        .into_iter()
        .map(|j| j.section_key)
        .collect();
    assert_eq!(sections, ["general", "findings", "findings"]);

    let report = engine.sync().await;
    assert!(report.is_clean(), "{report}");
    assert_eq!(report.patches_sent, 3);
    let server_id = engine.resolve(&temp_id).await.unwrap();
    let doc = remote.entity(&server_id).unwrap().revision.document;
    assert_eq!(doc["general"]["pressure"], "7");
    assert_eq!(doc["findings"][0], json!({"title": "Cracked weld", "notes": null}));
}

#[tokio::test]
async fn structural_op_on_unknown_section_fails() {
    let remote = Arc::new(InMemoryRemote::new());
    let engine = engine(&remote);
    let temp_id = engine.create_instance(inspection()).await.unwrap();
    let err = engine
        .apply_structural(
            &temp_id,
            StructuralOp::AddEntry {
                list_path: FieldPath::root().field("general"),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Schema(_)));
    assert!(engine.patch_queue(&temp_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn transition_moves_workflow_state() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.allow_transition("draft", "submit", "submitted");
    let engine = engine(&remote);
    let temp_id = engine.create_instance(inspection()).await.unwrap();

    // Not created yet: offline indicator, nothing lost.
    let err = engine.transition(&temp_id, "submit").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);

    engine.sync().await;
    engine.record_edit(&temp_id, "general", pressure(), json!("9"));
    let revision = engine.transition(&temp_id, "submit").await.unwrap();
    assert_eq!(revision.workflow_state, "submitted");

    let instance = engine.instance(&temp_id).await.unwrap().unwrap();
    assert_eq!(instance.meta.workflow_state, "submitted");
    assert_eq!(instance.document.0["general"]["pressure"], "9");
}

#[tokio::test]
async fn transition_conflict_refetches_before_returning() {
    let remote = Arc::new(InMemoryRemote::new());
    remote.allow_transition("draft", "submit", "submitted");
    let engine = engine(&remote);
    let temp_id = engine.create_instance(inspection()).await.unwrap();
    engine.sync().await;
    let server_id = engine.resolve(&temp_id).await.unwrap();

    remote.fail_next(
        RemoteCall::Transition,
        RemoteError::Conflict {
            server_id: server_id.clone(),
        },
    );
    let token = remote
        .external_patch(
            &server_id,
            &[fieldsync_engine::PatchOp::replace(pressure(), json!(1))],
        )
        .unwrap();

    let err = engine.transition(&server_id, "submit").await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict { .. }));
    let meta = engine.instance(&server_id).await.unwrap().unwrap().meta;
    assert_eq!(meta.concurrency_token, Some(token));
}

#[tokio::test]
async fn discard_creation_abandons_everything_local() {
    let remote = Arc::new(InMemoryRemote::new());
    let engine = engine(&remote);
    let temp_id = engine.create_instance(inspection()).await.unwrap();
    engine.record_edit(&temp_id, "general", pressure(), json!(1));
    engine.flush(&temp_id).await.unwrap();

    assert!(engine.discard_creation(&temp_id).await.unwrap());
    assert!(!engine.discard_creation(&temp_id).await.unwrap());
    assert!(engine.instance(&temp_id).await.unwrap().is_none());
    assert!(engine.queued_entities().await.unwrap().is_empty());

    let report = engine.sync().await;
    assert!(report.created.is_empty());
    assert_eq!(remote.entity_count(), 0);
}

#[tokio::test]
async fn queue_order_survives_reopening_the_store() {
    let path = scratch_file("store.json");
    let remote = Arc::new(InMemoryRemote::new());

    let temp_id = {
        let store = FileStore::open(&path).await.unwrap();
        let engine = SyncEngine::new(Arc::new(store), remote.clone(), EngineConfig::default());
        let temp_id = engine.create_instance(inspection()).await.unwrap();
        for n in 1..=3 {
            engine.record_edit(&temp_id, "general", pressure(), json!(n));
            engine.flush(&temp_id).await.unwrap();
        }
        engine.shutdown();
        temp_id
    };

    let store = FileStore::open(&path).await.unwrap();
    let engine = SyncEngine::new(Arc::new(store), remote.clone(), EngineConfig::default());
    assert_eq!(engine.patch_queue(&temp_id).await.unwrap().len(), 3);

    let report = engine.sync().await;
    assert!(report.is_clean(), "{report}");
    let sent: Vec<_> = remote
        .patch_log()
        .into_iter()
        .map(|p| p.operations[0].value.clone().unwrap())
        .collect();
    assert_eq!(sent, [json!(1), json!(2), json!(3)]);

    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[tokio::test]
async fn shutdown_reports_unflushed_entities() {
    let remote = Arc::new(InMemoryRemote::new());
    let engine = engine(&remote);
    let temp_id = engine.create_instance(inspection()).await.unwrap();
    engine.record_edit(&temp_id, "general", pressure(), json!(1));
    assert_eq!(engine.shutdown(), vec![temp_id]);
}

#[tokio::test]
async fn custom_temp_prefix_is_used() {
    let remote = Arc::new(InMemoryRemote::new());
    let config = EngineConfig::from_toml_str("[engine]\ntemp_id_prefix = \"local-\"\n").unwrap();
    let engine = SyncEngine::new(Arc::new(MemoryStore::new()), remote, config);
    let id = engine.create_instance(inspection()).await.unwrap();
    assert!(id.starts_with("local-"));
    assert_eq!(engine.resolve(&id).await.unwrap(), id);
}
