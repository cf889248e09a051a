use std::path::Path;

use fieldsync_engine::{FieldPath, NewInstance, SyncEngine};
use serde_json::{json, Value};

use super::emit;
use crate::OutputFormat;

pub(crate) struct NewArgs<'a> {
    pub form_type: String,
    pub form_version: Option<String>,
    pub payload: Option<&'a Path>,
    pub schema: Option<&'a Path>,
}

pub(crate) async fn cmd_new(
    engine: &SyncEngine,
    args: NewArgs<'_>,
    output: OutputFormat,
) -> Result<(), String> {
    let initial_payload = match args.payload {
        Some(path) => read_json(path)?,
        None => json!({}),
    };
    let schema = match args.schema {
        Some(path) => read_json(path)?,
        None => Value::Null,
    };
    let temp_id = engine
        .create_instance(NewInstance {
            form_type: args.form_type,
            form_version_hint: args.form_version,
            initial_payload,
            schema,
            workflow_definition: Value::Null,
        })
        .await
        .map_err(|e| e.to_string())?;
    emit(output, &json!({ "temp_id": temp_id }), || temp_id.clone());
    Ok(())
}

pub(crate) async fn cmd_edit(
    engine: &SyncEngine,
    id: &str,
    section: &str,
    path: &str,
    value: &str,
    output: OutputFormat,
) -> Result<(), String> {
    let path = FieldPath::parse(path).map_err(|e| e.to_string())?;
    if path.is_root() {
        return Err("refusing to replace the whole document".to_string());
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));

    if engine
        .instance(id)
        .await
        .map_err(|e| e.to_string())?
        .is_none()
    {
        return Err(format!("no local instance '{}'", id));
    }
    if !engine.record_edit(id, section, path, value) {
        return Err(format!("section '{}' is read-only", section));
    }
    let jobs = engine.flush(id).await.map_err(|e| e.to_string())?;
    let target = engine.resolve(id).await.map_err(|e| e.to_string())?;
    emit(
        output,
        &json!({ "entity_id": target, "jobs_queued": jobs }),
        || format!("queued {} patch job(s) for {}", jobs, target),
    );
    Ok(())
}

pub(crate) async fn cmd_discard(
    engine: &SyncEngine,
    temp_id: &str,
    output: OutputFormat,
) -> Result<(), String> {
    let discarded = engine
        .discard_creation(temp_id)
        .await
        .map_err(|e| e.to_string())?;
    if !discarded {
        return Err(format!("no queued creation for '{}'", temp_id));
    }
    emit(output, &json!({ "discarded": temp_id }), || {
        format!("discarded {}", temp_id)
    });
    Ok(())
}

fn read_json(path: &Path) -> Result<Value, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("error parsing JSON in '{}': {}", path.display(), e))
}
