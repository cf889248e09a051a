//! JSON-Patch-shaped operations and their local application.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::path::{FieldPath, PathToken};

/// Errors from building or applying patch operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("invalid field path '{0}'")]
    InvalidPath(String),

    #[error("nothing at {0}")]
    MissingTarget(String),

    #[error("index {index} out of bounds at {path}")]
    IndexOutOfBounds { path: String, index: usize },

    #[error("{op} at {path} requires a value")]
    MissingValue { op: OpKind, path: String },

    #[error("cannot {op} at {path}: {reason}")]
    Unsupported {
        op: OpKind,
        path: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Add,
    Remove,
    Replace,
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OpKind::Add => "add",
            OpKind::Remove => "remove",
            OpKind::Replace => "replace",
        })
    }
}

/// One operation, serialized exactly like a JSON Patch entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchOp {
    pub op: OpKind,
    pub path: FieldPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOp {
    pub fn add(path: FieldPath, value: Value) -> Self {
        Self {
            op: OpKind::Add,
            path,
            value: Some(value),
        }
    }

    pub fn remove(path: FieldPath) -> Self {
        Self {
            op: OpKind::Remove,
            path,
            value: None,
        }
    }

    pub fn replace(path: FieldPath, value: Value) -> Self {
        Self {
            op: OpKind::Replace,
            path,
            value: Some(value),
        }
    }
}

/// Apply `ops` in order. On error `document` is left untouched.
///
/// Field edits arrive as `replace` against forms that start out sparse, so
/// `add` and `replace` create missing object members (and missing parent
/// objects) instead of failing. Array positions are never invented.
pub fn apply_ops(document: &mut Value, ops: &[PatchOp]) -> Result<(), PatchError> {
    let mut working = document.clone();
    for op in ops {
        apply_one(&mut working, op)?;
    }
    *document = working;
    Ok(())
}

/// Read the value at `path`, if any.
pub fn value_at<'a>(document: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    let mut current = document;
    for token in path.tokens() {
        current = match (current, token) {
            (Value::Object(map), PathToken::Field(name)) => map.get(name)?,
            (Value::Object(map), PathToken::Index(i)) => map.get(&i.to_string())?,
            (Value::Array(items), PathToken::Index(i)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

fn apply_one(document: &mut Value, op: &PatchOp) -> Result<(), PatchError> {
    let value = match op.op {
        OpKind::Add | OpKind::Replace => Some(op.value.clone().ok_or_else(|| {
            PatchError::MissingValue {
                op: op.op,
                path: op.path.to_pointer(),
            }
        })?),
        OpKind::Remove => None,
    };

    let Some((parent_path, last)) = op.path.split_last() else {
        *document = value.unwrap_or(Value::Null);
        return Ok(());
    };

    let create = op.op != OpKind::Remove;
    let parent = walk_mut(document, &parent_path, create)?;

    if parent.is_null() && create {
        *parent = Value::Object(Map::new());
    }

    match parent {
        Value::Object(map) => {
            let key = match last {
                PathToken::Field(name) => name.clone(),
                PathToken::Index(i) => i.to_string(),
                PathToken::Append => return Err(unsupported(op, "'-' addresses arrays only")),
            };
            match value {
                Some(v) => {
                    map.insert(key, v);
                }
                None => {
                    map.remove(&key)
                        .ok_or_else(|| PatchError::MissingTarget(op.path.to_pointer()))?;
                }
            }
        }
        Value::Array(items) => match (last, op.op) {
            (PathToken::Append, OpKind::Add) => items.push(value.unwrap_or(Value::Null)),
            (PathToken::Append, _) => {
                return Err(unsupported(op, "'-' is only valid for add"));
            }
            (PathToken::Index(i), OpKind::Add) if *i <= items.len() => {
                items.insert(*i, value.unwrap_or(Value::Null));
            }
            (PathToken::Index(i), OpKind::Replace) if *i < items.len() => {
                items[*i] = value.unwrap_or(Value::Null);
            }
            (PathToken::Index(i), OpKind::Remove) if *i < items.len() => {
                items.remove(*i);
            }
            (PathToken::Index(i), _) => {
                return Err(PatchError::IndexOutOfBounds {
                    path: parent_path.to_pointer(),
                    index: *i,
                });
            }
            (PathToken::Field(_), _) => {
                return Err(unsupported(op, "arrays are addressed by index"));
            }
        },
        _ => return Err(unsupported(op, "parent is not a container")),
    }
    Ok(())
}

fn walk_mut<'a>(
    document: &'a mut Value,
    path: &FieldPath,
    create: bool,
) -> Result<&'a mut Value, PatchError> {
    let mut current = document;
    for (depth, token) in path.tokens().iter().enumerate() {
        let here = || FieldPath::from_tokens(path.tokens()[..=depth].to_vec()).to_pointer();
        if current.is_null() && create && matches!(token, PathToken::Field(_)) {
            *current = Value::Object(Map::new());
        }
        current = match (current, token) {
            (Value::Object(map), PathToken::Field(name)) => {
                if create {
                    map.entry(name.clone()).or_insert(Value::Null)
                } else {
                    map.get_mut(name)
                        .ok_or_else(|| PatchError::MissingTarget(here()))?
                }
            }
            (Value::Object(map), PathToken::Index(i)) => map
                .get_mut(&i.to_string())
                .ok_or_else(|| PatchError::MissingTarget(here()))?,
            (Value::Array(items), PathToken::Index(i)) => {
                items
                    .get_mut(*i)
                    .ok_or_else(|| PatchError::IndexOutOfBounds {
                        path: here(),
                        index: *i,
                    })?
            }
            _ => return Err(PatchError::MissingTarget(here())),
        };
    }
    Ok(current)
}

fn unsupported(op: &PatchOp, reason: &str) -> PatchError {
    PatchError::Unsupported {
        op: op.op,
        path: op.path.to_pointer(),
        reason: reason.to_string(),
    }
}
