//! Recursive entry deletion
//!
//! Deletes an entry and every entry it references, children first. Each
//! `content_type/uid` is visited once, so shared and cyclic references are
//! safe. Failures are collected and the walk continues.

use crate::error::MigrateError;
use crate::models::content_node::NESTED_TYPE_KEY;
use crate::services::entry_repository::EntryRepository;
use crate::types::EntryHandle;
use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionSummary {
    /// Deleted, in deletion order
    pub deleted: Vec<String>,
    /// What a real run would delete, in the same order
    pub would_delete: Vec<String>,
    /// Referenced but no longer present
    pub already_absent: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl DeletionSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// `(content_type, uid)` of every reference inside an entry's fields
pub fn collect_references(fields: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    // The entry's own uid is not a reference
    if let Value::Object(map) = fields {
        for value in map.values() {
            collect_into(value, &mut out);
        }
    }
    out
}

fn collect_into(value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            let content_type = map.get(NESTED_TYPE_KEY).and_then(Value::as_str);
            let uid = map.get("uid").and_then(Value::as_str);
            if let (Some(content_type), Some(uid)) = (content_type, uid) {
                out.push((content_type.to_string(), uid.to_string()));
                return;
            }
            for child in map.values() {
                collect_into(child, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_into(item, out);
            }
        }
        _ => {}
    }
}

pub struct TreeDeleter {
    repository: Arc<EntryRepository>,
    dry_run: bool,
}

impl TreeDeleter {
    pub fn new(repository: Arc<EntryRepository>, dry_run: bool) -> Self {
        Self { repository, dry_run }
    }

    pub async fn delete_tree(&self, content_type: &str, uid: &str) -> DeletionSummary {
        let mut visited = HashSet::new();
        let mut summary = DeletionSummary::default();
        let root = EntryHandle::new(content_type, uid, self.repository.locale());
        self.visit(root, &mut visited, &mut summary).await;

        tracing::info!(
            deleted = summary.deleted.len(),
            would_delete = summary.would_delete.len(),
            failed = summary.failed.len(),
            dry_run = self.dry_run,
            "Tree deletion finished"
        );
        summary
    }

    fn visit<'a>(
        &'a self,
        handle: EntryHandle,
        visited: &'a mut HashSet<String>,
        summary: &'a mut DeletionSummary,
    ) -> BoxFuture<'a, ()> {
        async move {
            let key = handle.to_string();
            if !visited.insert(key.clone()) {
                return;
            }

            let entry = match self.repository.get(&handle).await {
                Ok(entry) => entry,
                Err(MigrateError::Store(crate::error::StoreError::NotFound(_))) => {
                    tracing::debug!(entry = %key, "Referenced entry already absent");
                    summary.already_absent.push(key);
                    return;
                }
                Err(e) => {
                    tracing::error!(entry = %key, error = %e, "Fetch failed, skipping subtree");
                    summary.failed.push((key, e.to_string()));
                    return;
                }
            };

            for (content_type, uid) in collect_references(&entry) {
                let child = EntryHandle::new(content_type, uid, handle.locale);
                self.visit(child, visited, summary).await;
            }

            if self.dry_run {
                tracing::info!(entry = %key, "Would delete");
                summary.would_delete.push(key);
                return;
            }

            match self.repository.delete(&handle).await {
                Ok(_) => summary.deleted.push(key),
                Err(e) => {
                    tracing::error!(entry = %key, error = %e, "Delete failed");
                    summary.failed.push((key, e.to_string()));
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collect_references() {
        let fields = json!({
            "uid": "root",
            "_content_type_uid": "feature_page",
            "title": "Page",
            "sections": [
                {"uid": "a", "_content_type_uid": "hero_banner"},
                {"uid": "b", "_content_type_uid": "content_divider", "nested": {"uid": "ignored", "_content_type_uid": "x"}}
            ],
            "meta": {"seo": [{"uid": "c", "_content_type_uid": "seo"}]},
            "image": {"uid": "asset-1", "url": "https://cdn/a.png"}
        });
        let mut refs = collect_references(&fields);
        refs.sort();
        assert_eq!(
            refs,
            vec![
                ("content_divider".to_string(), "b".to_string()),
                ("hero_banner".to_string(), "a".to_string()),
                ("seo".to_string(), "c".to_string()),
            ]
        );
    }
}
