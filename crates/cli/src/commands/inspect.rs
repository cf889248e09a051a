use std::collections::BTreeMap;

use fieldsync_engine::{PatchJob, SyncEngine};
use serde::Serialize;
use serde_json::json;

use super::emit;
use crate::OutputFormat;

#[derive(Serialize)]
struct InstanceStatus {
    local_id: String,
    form_type: String,
    is_local: bool,
    workflow_state: String,
    version: i64,
    queued_patches: usize,
}

pub(crate) async fn cmd_status(engine: &SyncEngine, output: OutputFormat) -> Result<(), String> {
    let metas = engine.instances().await.map_err(|e| e.to_string())?;
    let mut rows = Vec::with_capacity(metas.len());
    for meta in metas {
        let queued = engine
            .patch_queue(&meta.local_id)
            .await
            .map_err(|e| e.to_string())?
            .len();
        rows.push(InstanceStatus {
            local_id: meta.local_id,
            form_type: meta.form_type,
            is_local: meta.is_local,
            workflow_state: meta.workflow_state,
            version: meta.version_token,
            queued_patches: queued,
        });
    }

    emit(output, &rows, || {
        if rows.is_empty() {
            return "no instances".to_string();
        }
        rows.iter()
            .map(|r| {
                format!(
                    "{}  {}  {}  {}  {} queued",
                    r.local_id,
                    r.form_type,
                    if r.workflow_state.is_empty() { "-" } else { r.workflow_state.as_str() },
                    if r.is_local { "local" } else { "synced" },
                    r.queued_patches
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    });
    Ok(())
}

pub(crate) async fn cmd_queue(engine: &SyncEngine, output: OutputFormat) -> Result<(), String> {
    let creates = engine.creation_queue().await.map_err(|e| e.to_string())?;
    let mut patches: BTreeMap<String, Vec<PatchJob>> = BTreeMap::new();
    for entity in engine.queued_entities().await.map_err(|e| e.to_string())? {
        let jobs = engine.patch_queue(&entity).await.map_err(|e| e.to_string())?;
        patches.insert(entity, jobs);
    }

    emit(output, &json!({ "creates": creates, "patches": patches }), || {
        let mut lines = vec![format!("creates ({}):", creates.len())];
        for job in &creates {
            lines.push(format!("  {}  {}  {}", job.temp_id, job.form_type, job.queued_at));
        }
        lines.push(format!("patches ({} entities):", patches.len()));
        for (entity, jobs) in &patches {
            lines.push(format!("  {}: {} job(s)", entity, jobs.len()));
            for job in jobs {
                let ops: Vec<String> = job
                    .operations
                    .iter()
                    .map(|op| format!("{} {}", op.op, op.path))
                    .collect();
                lines.push(format!("    {} [{}]", job.section_key, ops.join(", ")));
            }
        }
        lines.join("\n")
    });
    Ok(())
}

pub(crate) async fn cmd_resolve(
    engine: &SyncEngine,
    id: &str,
    output: OutputFormat,
) -> Result<(), String> {
    let resolved = engine.resolve(id).await.map_err(|e| e.to_string())?;
    emit(output, &json!({ "id": id, "resolved": resolved }), || {
        resolved.clone()
    });
    Ok(())
}
