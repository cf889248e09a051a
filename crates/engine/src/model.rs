use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::patch::PatchOp;

/// What the client believes about one form instance's server-side state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalInstanceMeta {
    /// Server identifier, or a temporary identifier until creation is acked.
    pub local_id: String,
    /// True until the creation job has been acknowledged.
    pub is_local: bool,
    pub form_type: String,
    pub form_version_hint: Option<String>,
    /// Server-owned workflow position. Empty until the server assigns one.
    pub workflow_state: String,
    /// Informational revision counter reported by the server.
    pub version_token: i64,
    /// Precondition for conditional writes. `None` while `is_local`.
    pub concurrency_token: Option<String>,
    #[serde(default)]
    pub schema: Value,
    #[serde(default)]
    pub workflow_definition: Value,
}

/// Arbitrary-shaped form data, stored apart from the metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceDocument(pub Value);

/// A fully hydrated instance: metadata and document together.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub meta: LocalInstanceMeta,
    pub document: InstanceDocument,
}

/// Everything needed to start a new instance while offline.
#[derive(Debug, Clone, Default)]
pub struct NewInstance {
    pub form_type: String,
    pub form_version_hint: Option<String>,
    pub initial_payload: Value,
    pub schema: Value,
    pub workflow_definition: Value,
}

/// A pending "instantiate this entity on the server" request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateJob {
    pub temp_id: String,
    pub form_type: String,
    pub form_version_hint: Option<String>,
    pub initial_payload: Value,
    pub idempotency_key: String,
    /// RFC 3339 timestamp.
    pub queued_at: String,
}

/// One accumulated, not-yet-sent mutation of a single section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchJob {
    pub entity_id: String,
    pub section_key: String,
    /// At most one operation per field path.
    pub operations: Vec<PatchOp>,
    /// Generated once when the job is queued; every resend reuses it.
    pub idempotency_key: String,
    /// Token observed when the job was queued. `None` for jobs queued
    /// before the entity existed on the server.
    pub concurrency_token: Option<String>,
    /// RFC 3339 timestamp.
    pub queued_at: String,
}

impl PatchJob {
    pub fn new(
        entity_id: impl Into<String>,
        section_key: impl Into<String>,
        operations: Vec<PatchOp>,
        concurrency_token: Option<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            section_key: section_key.into(),
            operations,
            idempotency_key: new_idempotency_key(),
            concurrency_token,
            queued_at: now_rfc3339(),
        }
    }
}

/// Durable `tempId -> serverId` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierMapping {
    pub temp_id: String,
    pub server_id: String,
    /// RFC 3339 timestamp.
    pub mapped_at: String,
}

/// Generates and recognizes temporary identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempIds {
    prefix: String,
}

impl TempIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn generate(&self) -> String {
        format!("{}{:032x}", self.prefix, rand::random::<u128>())
    }

    pub fn is_temporary(&self, id: &str) -> bool {
        id.starts_with(&self.prefix)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

pub fn new_idempotency_key() -> String {
    format!("{:032x}", rand::random::<u128>())
}

pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_ids_carry_prefix_and_differ() {
        let ids = TempIds::new("tmp_");
        let a = ids.generate();
        let b = ids.generate();
        assert!(ids.is_temporary(&a));
        assert_eq!(a.len(), "tmp_".len() + 32);
        assert_ne!(a, b);
        assert!(!ids.is_temporary("srv-1"));
    }

    #[test]
    fn each_job_gets_a_fresh_idempotency_key() {
        let a = PatchJob::new("e", "s", vec![], None);
        let b = PatchJob::new("e", "s", vec![], None);
        assert_ne!(a.idempotency_key, b.idempotency_key);
    }

    #[test]
    fn document_serializes_transparently() {
        let doc = InstanceDocument(serde_json::json!({"a": 1}));
        assert_eq!(serde_json::to_string(&doc).unwrap(), r#"{"a":1}"#);
    }
}
