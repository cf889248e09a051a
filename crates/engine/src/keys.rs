//! Storage key layout.

pub(crate) const CREATE_QUEUE: &str = "queue/create";
pub(crate) const PATCH_QUEUE_PREFIX: &str = "queue/patch/";
pub(crate) const META_PREFIX: &str = "meta/";
pub(crate) const IDMAP_PREFIX: &str = "idmap/";

pub(crate) fn meta(id: &str) -> String {
    format!("{META_PREFIX}{id}")
}

pub(crate) fn doc(id: &str) -> String {
    format!("doc/{id}")
}

pub(crate) fn patch_queue(id: &str) -> String {
    format!("{PATCH_QUEUE_PREFIX}{id}")
}

pub(crate) fn hold(id: &str) -> String {
    format!("hold/{id}")
}

pub(crate) fn idmap(temp_id: &str) -> String {
    format!("{IDMAP_PREFIX}{temp_id}")
}
