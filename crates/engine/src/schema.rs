//! Form schema as a tree of typed section nodes.
//!
//! The cached schema of an instance is JSON shaped like
//!
//! ```json
//! {"sections": [
//!   {"key": "general", "fields": [{"key": "pressure", "type": "text"}]},
//!   {"key": "findings", "repeatable": true, "label_field": "title",
//!    "fields": [{"key": "title", "type": "text"}],
//!    "sections": [{"key": "photos", "repeatable": true, "fields": []}]}
//! ]}
//! ```
//!
//! A single section maps to an object in the document under its key, a
//! repeatable one to an array of such objects. Nested sections live inside
//! their parent's record.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::patch::{value_at, PatchOp};
use crate::path::{FieldPath, PathToken};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid schema: {0}")]
    Invalid(String),

    #[error("no section at {0}")]
    UnknownSection(String),

    #[error("section '{0}' is not repeatable")]
    NotRepeatable(String),

    #[error("section '{0}' declares no label field")]
    NoLabelField(String),

    #[error("no entry {index} in {path}")]
    MissingEntry { path: String, index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectionKind {
    Single,
    Repeatable { label_field: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNode {
    pub key: String,
    pub field_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionNode {
    pub key: String,
    pub kind: SectionKind,
    pub fields: Vec<FieldNode>,
    pub children: Vec<SectionNode>,
}

impl SectionNode {
    pub fn is_repeatable(&self) -> bool {
        matches!(self.kind, SectionKind::Repeatable { .. })
    }

    /// A blank record: leaf fields `null`, nested lists empty, nested
    /// single sections blank records themselves.
    pub fn empty_entry(&self) -> Value {
        let mut record = Map::new();
        for field in &self.fields {
            record.insert(field.key.clone(), Value::Null);
        }
        for child in &self.children {
            let value = match child.kind {
                SectionKind::Single => child.empty_entry(),
                SectionKind::Repeatable { .. } => Value::Array(Vec::new()),
            };
            record.insert(child.key.clone(), value);
        }
        Value::Object(record)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormSchema {
    pub sections: Vec<SectionNode>,
}

#[derive(Deserialize)]
struct RawSchema {
    #[serde(default)]
    sections: Vec<RawSection>,
}

#[derive(Deserialize)]
struct RawSection {
    key: String,
    #[serde(default)]
    repeatable: bool,
    #[serde(default)]
    label_field: Option<String>,
    #[serde(default)]
    fields: Vec<RawField>,
    #[serde(default)]
    sections: Vec<RawSection>,
}

#[derive(Deserialize)]
struct RawField {
    key: String,
    #[serde(rename = "type", default = "default_field_type")]
    field_type: String,
}

fn default_field_type() -> String {
    "text".to_string()
}

impl FormSchema {
    /// Build the tree from a cached schema. `null` is an empty schema.
    pub fn parse(value: &Value) -> Result<Self, SchemaError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let raw: RawSchema = serde_json::from_value(value.clone())
            .map_err(|e| SchemaError::Invalid(e.to_string()))?;
        Ok(Self {
            sections: convert_level(raw.sections, "")?,
        })
    }

    /// Top-level or nested section by key, depth first.
    pub fn find(&self, key: &str) -> Option<&SectionNode> {
        fn search<'a>(nodes: &'a [SectionNode], key: &str) -> Option<&'a SectionNode> {
            nodes.iter().find_map(|n| {
                if n.key == key {
                    Some(n)
                } else {
                    search(&n.children, key)
                }
            })
        }
        search(&self.sections, key)
    }

    /// The section a document path points at.
    ///
    /// Paths alternate section keys and, after a repeatable section, an
    /// entry index: `/findings/2/photos` names the `photos` list of the
    /// third finding.
    pub fn section_at(&self, path: &FieldPath) -> Result<&SectionNode, SchemaError> {
        let unknown = || SchemaError::UnknownSection(path.to_pointer());
        let mut level = &self.sections;
        let mut current: Option<&SectionNode> = None;
        let mut tokens = path.tokens().iter().peekable();
        while let Some(token) = tokens.next() {
            let PathToken::Field(key) = token else {
                return Err(unknown());
            };
            let node = level.iter().find(|n| &n.key == key).ok_or_else(unknown)?;
            if let Some(PathToken::Index(_)) = tokens.peek() {
                if !node.is_repeatable() {
                    return Err(SchemaError::NotRepeatable(node.key.clone()));
                }
                tokens.next();
            }
            level = &node.children;
            current = Some(node);
        }
        current.ok_or_else(unknown)
    }
}

fn convert_level(raw: Vec<RawSection>, parent: &str) -> Result<Vec<SectionNode>, SchemaError> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|section| {
            if section.key.is_empty() {
                return Err(SchemaError::Invalid(format!("empty section key under '{parent}'")));
            }
            if !seen.insert(section.key.clone()) {
                return Err(SchemaError::Invalid(format!(
                    "duplicate section '{}' under '{parent}'",
                    section.key
                )));
            }
            convert(section)
        })
        .collect()
}

fn convert(raw: RawSection) -> Result<SectionNode, SchemaError> {
    let fields: Vec<FieldNode> = raw
        .fields
        .into_iter()
        .map(|f| FieldNode {
            key: f.key,
            field_type: f.field_type,
        })
        .collect();

    let kind = if raw.repeatable {
        if let Some(label) = &raw.label_field {
            if !fields.iter().any(|f| &f.key == label) {
                return Err(SchemaError::Invalid(format!(
                    "label field '{label}' is not a field of '{}'",
                    raw.key
                )));
            }
        }
        SectionKind::Repeatable {
            label_field: raw.label_field,
        }
    } else {
        SectionKind::Single
    };

    Ok(SectionNode {
        children: convert_level(raw.sections, &raw.key)?,
        key: raw.key,
        kind,
        fields,
    })
}

/// Add/remove/clone/rename of an entry in a repeatable section.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuralOp {
    AddEntry { list_path: FieldPath },
    RemoveEntry { list_path: FieldPath, index: usize },
    CloneEntry { list_path: FieldPath, index: usize },
    RenameEntry {
        list_path: FieldPath,
        index: usize,
        label: String,
    },
}

impl StructuralOp {
    pub fn list_path(&self) -> &FieldPath {
        match self {
            StructuralOp::AddEntry { list_path }
            | StructuralOp::RemoveEntry { list_path, .. }
            | StructuralOp::CloneEntry { list_path, .. }
            | StructuralOp::RenameEntry { list_path, .. } => list_path,
        }
    }

    /// Build the patch operations against `document`.
    ///
    /// Returns the key of the targeted section alongside the operations so
    /// the caller can file the job under it.
    pub fn build(
        &self,
        schema: &FormSchema,
        document: &Value,
    ) -> Result<(String, Vec<PatchOp>), SchemaError> {
        let list_path = self.list_path();
        let section = schema.section_at(list_path)?;
        let SectionKind::Repeatable { label_field } = &section.kind else {
            return Err(SchemaError::NotRepeatable(section.key.clone()));
        };

        let entry = |index: usize| {
            value_at(document, &list_path.clone().index(index)).ok_or_else(|| {
                SchemaError::MissingEntry {
                    path: list_path.to_pointer(),
                    index,
                }
            })
        };

        let ops = match self {
            StructuralOp::AddEntry { .. } => match value_at(document, list_path) {
                Some(Value::Array(_)) => {
                    vec![PatchOp::add(list_path.clone().append(), section.empty_entry())]
                }
                _ => vec![PatchOp::add(
                    list_path.clone(),
                    Value::Array(vec![section.empty_entry()]),
                )],
            },
            StructuralOp::RemoveEntry { index, .. } => {
                entry(*index)?;
                vec![PatchOp::remove(list_path.clone().index(*index))]
            }
            StructuralOp::CloneEntry { index, .. } => {
                let copy = entry(*index)?.clone();
                vec![PatchOp::add(list_path.clone().append(), copy)]
            }
            StructuralOp::RenameEntry { index, label, .. } => {
                let label_field = label_field
                    .as_ref()
                    .ok_or_else(|| SchemaError::NoLabelField(section.key.clone()))?;
                entry(*index)?;
                vec![PatchOp::replace(
                    list_path.clone().index(*index).field(label_field.clone()),
                    Value::String(label.clone()),
                )]
            }
        };
        Ok((section.key.clone(), ops))
    }
}
