//! Tree Materializer
//!
//! Creates a content tree bottom-up:
//!
//! 1. Materialize all children of a node concurrently and wait for every one
//!    of them (the parent needs each child's identifier)
//! 2. Apply the child-failure policy: abort fails the parent, omit rolls the
//!    failed child's subtree back and drops its slot
//! 3. Resolve the node's asset references
//! 4. Build the payload: child references, asset references, dropped slots
//! 5. Reuse a matching existing entry, or create a new one and record it in
//!    the creation ledger
//!
//! Concurrency is bounded by a semaphore around store calls. Reuse lookups
//! for the same match key are serialized so identical siblings do not both
//! create an entry.

use crate::error::{AssetError, MigrateError, MigrateResult};
use crate::models::asset_url::mime_type_for;
use crate::models::content_node::{rewrite_inline_urls, AssetRef, AssetRefKind, ContentNode, FieldPath};
use crate::services::asset_resolver::AssetResolver;
use crate::services::entry_repository::EntryRepository;
use crate::services::rollback::{CreationLedger, RollbackCoordinator, RollbackOutcome};
use crate::types::{AssetRecord, CompanionFile, EntryHandle, NodePath};
use csm_common::config::{ChildFailurePolicy, ResolvedConfig};
use futures::future::{join_all, BoxFuture, FutureExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct MaterializePolicy {
    pub entry_reuse: bool,
    pub child_failures: ChildFailurePolicy,
    /// Asset failures other than not-found fail the node
    pub fail_on_asset_error: bool,
    pub collection_id: String,
    pub max_concurrency: usize,
}

impl MaterializePolicy {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            entry_reuse: config.entry_reuse_enabled,
            child_failures: config.materialize.child_failure_policy,
            fail_on_asset_error: config.materialize.fail_on_asset_error,
            collection_id: config.asset_store.collection_id.clone(),
            max_concurrency: config.pacing.max_concurrency.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeStatus {
    Pending,
    Created,
    Reused,
    Failed,
}

/// How one asset reference was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetOutcome {
    pub reference: AssetRef,
    pub result: Result<AssetRecord, AssetError>,
}

/// Outcome for one node and, recursively, its children
#[derive(Debug, Clone)]
pub struct MaterializationResult {
    pub path: NodePath,
    pub content_type: String,
    pub title: Option<String>,
    pub status: NodeStatus,
    pub entry: Option<EntryHandle>,
    pub error: Option<MigrateError>,
    pub assets: Vec<AssetOutcome>,
    pub children: Vec<MaterializationResult>,
    /// Set when this failed subtree was rolled back and omitted from its parent
    pub rollback: Option<RollbackOutcome>,
}

impl MaterializationResult {
    fn pending(node: &ContentNode, path: &NodePath) -> Self {
        Self {
            path: path.clone(),
            content_type: node.content_type.clone(),
            title: node.title().map(str::to_string),
            status: NodeStatus::Pending,
            entry: None,
            error: None,
            assets: Vec::new(),
            children: Vec::new(),
            rollback: None,
        }
    }

    fn failed(mut self, error: MigrateError) -> Self {
        tracing::error!(path = %self.path, content_type = %self.content_type, error = %error, "Node failed");
        self.status = NodeStatus::Failed;
        self.error = Some(error);
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, NodeStatus::Created | NodeStatus::Reused)
    }

    /// This node and all descendants, parents before children
    pub fn nodes(&self) -> Vec<&MaterializationResult> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.nodes());
        }
        out
    }

    /// Subtrees that failed and were omitted from their parent
    pub fn omitted(&self) -> Vec<&MaterializationResult> {
        self.nodes().into_iter().filter(|n| n.rollback.is_some()).collect()
    }
}

/// Stored-asset reference written into an entry field
pub fn asset_reference(record: &AssetRecord) -> Value {
    let mimetype = record
        .mimetype
        .clone()
        .unwrap_or_else(|| mime_type_for(&record.extension).to_string());
    let dimensions = match record.dimensions {
        Some(d) => json!({"width": d.width, "height": d.height}),
        None => json!({}),
    };
    json!({
        "id": record.resolved_asset_id,
        "url": record.public_url(),
        "filename": record.filename,
        "extension": record.extension,
        "mimetype": mimetype,
        "dimensions": dimensions
    })
}

fn companion_reference(file: &CompanionFile) -> Value {
    json!({
        "id": file.id,
        "url": file.url,
        "filename": file.filename,
        "extension": file.extension,
        "mimetype": file.mimetype
    })
}

/// Structural change to an entry payload, applied after all in-place edits
#[derive(Debug)]
enum Splice {
    Remove,
    InsertAfter(Vec<Value>),
}

/// Entry payload for a node
///
/// `children` pairs every child slot with the child's entry, or `None` when
/// the child was omitted. A hosted video's captions and poster image follow
/// the video in its array. Removals and insertions run last, deepest and
/// rightmost first, so array indices recorded at parse time stay valid.
pub fn build_payload(
    node: &ContentNode,
    children: &[(FieldPath, Option<EntryHandle>)],
    assets: &[AssetOutcome],
) -> Value {
    let mut payload = node.fields.clone();
    let mut splices: Vec<(&FieldPath, Splice)> = Vec::new();
    let mut inline: HashMap<&FieldPath, (AssetRefKind, HashMap<&str, &str>)> = HashMap::new();

    for (slot, entry) in children {
        match entry {
            Some(handle) => {
                if let Some(Value::Object(stub)) = slot.get_mut(&mut payload) {
                    stub.insert("uid".to_string(), Value::String(handle.uid.clone()));
                    stub.insert(
                        "_content_type_uid".to_string(),
                        Value::String(handle.content_type.clone()),
                    );
                }
            }
            None => splices.push((slot, Splice::Remove)),
        }
    }

    for outcome in assets {
        let reference = &outcome.reference;
        match (&outcome.result, reference.kind) {
            (Ok(record), AssetRefKind::Attachment) => {
                reference.path.set(&mut payload, asset_reference(record));
                if !record.companions.is_empty() {
                    let companions = record.companions.iter().map(companion_reference).collect();
                    splices.push((&reference.path, Splice::InsertAfter(companions)));
                }
            }
            (Ok(record), kind @ (AssetRefKind::InlineHtml | AssetRefKind::InlineMarkdown)) => {
                inline
                    .entry(&reference.path)
                    .or_insert_with(|| (kind, HashMap::new()))
                    .1
                    .insert(reference.raw_url.as_str(), record.public_url());
            }
            (Err(AssetError::NotFound(_)), AssetRefKind::Attachment) => {
                splices.push((&reference.path, Splice::Remove))
            }
            // Inline images and tolerated failures keep the source URL
            (Err(_), _) => {}
        }
    }

    for (path, (kind, replacements)) in &inline {
        if let Some(Value::String(text)) = path.get_mut(&mut payload) {
            *text = rewrite_inline_urls(text, *kind, replacements);
        }
    }

    splices.sort_by(|a, b| a.0.cmp(b.0));
    splices.dedup_by(|a, b| a.0 == b.0);
    for (path, splice) in splices.into_iter().rev() {
        match splice {
            Splice::Remove => {
                path.remove(&mut payload);
            }
            Splice::InsertAfter(values) => {
                if !path.insert_after(&mut payload, values) {
                    tracing::debug!(path = %path, "Companion files dropped, asset is not in a list");
                }
            }
        }
    }
    payload
}

pub struct TreeMaterializer {
    assets: Arc<AssetResolver>,
    repository: Arc<EntryRepository>,
    ledger: Arc<CreationLedger>,
    rollback: Arc<RollbackCoordinator>,
    policy: MaterializePolicy,
    permits: Semaphore,
    reuse_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    cancel: CancellationToken,
}

impl TreeMaterializer {
    pub fn new(
        assets: Arc<AssetResolver>,
        repository: Arc<EntryRepository>,
        ledger: Arc<CreationLedger>,
        rollback: Arc<RollbackCoordinator>,
        policy: MaterializePolicy,
        cancel: CancellationToken,
    ) -> Self {
        let permits = Semaphore::new(policy.max_concurrency.max(1));
        Self {
            assets,
            repository,
            ledger,
            rollback,
            policy,
            permits,
            reuse_locks: Mutex::new(HashMap::new()),
            cancel,
        }
    }

    /// Materialize a node and its subtree
    pub fn materialize<'a>(&'a self, node: &'a ContentNode, path: NodePath) -> BoxFuture<'a, MaterializationResult> {
        async move {
            let mut result = MaterializationResult::pending(node, &path);

            result.children = join_all(
                node.children
                    .iter()
                    .map(|slot| self.materialize(&slot.node, path.child(&slot.slot))),
            )
            .await;

            let mut links = Vec::with_capacity(node.children.len());
            let mut abort = None;
            for (slot, child) in node.children.iter().zip(result.children.iter_mut()) {
                if child.is_success() {
                    links.push((slot.slot.clone(), child.entry.clone()));
                    continue;
                }
                let cancelled = matches!(child.error, Some(MigrateError::Cancelled));
                if self.policy.child_failures == ChildFailurePolicy::Omit && !cancelled {
                    tracing::warn!(path = %child.path, content_type = %child.content_type, "Omitting failed child");
                    child.rollback = Some(self.rollback.rollback_subtree(&child.path).await);
                    links.push((slot.slot.clone(), None));
                } else if abort.is_none() {
                    abort = Some(MigrateError::ChildFailed {
                        path: child.path.to_string(),
                        reason: child.error.as_ref().map(ToString::to_string).unwrap_or_default(),
                    });
                }
            }
            if let Some(error) = abort {
                return result.failed(error);
            }
            if self.cancel.is_cancelled() {
                return result.failed(MigrateError::Cancelled);
            }

            result.assets = self.resolve_assets(node).await;
            if self.policy.fail_on_asset_error {
                let fatal = result.assets.iter().find_map(|a| match &a.result {
                    Err(AssetError::NotFound(_)) | Ok(_) => None,
                    Err(e) => Some(e.clone()),
                });
                if let Some(e) = fatal {
                    return result.failed(MigrateError::Asset(e));
                }
            }

            let payload = build_payload(node, &links, &result.assets);
            match self.create_or_reuse(node, &payload, &path).await {
                Ok((status, handle)) => {
                    result.status = status;
                    result.entry = Some(handle);
                    result
                }
                Err(e) => result.failed(e),
            }
        }
        .boxed()
    }

    async fn resolve_assets(&self, node: &ContentNode) -> Vec<AssetOutcome> {
        join_all(node.asset_refs.iter().map(|reference| async move {
            let logical_key = format!("{}.{}", node.content_type, reference.path);
            let result = match self.permits.acquire().await {
                Ok(_permit) => {
                    self.assets
                        .resolve(&reference.url, &logical_key, &self.policy.collection_id)
                        .await
                }
                Err(_) => Err(AssetError::Store(crate::error::StoreError::Network(
                    "concurrency limiter closed".to_string(),
                ))),
            };
            AssetOutcome {
                reference: reference.clone(),
                result,
            }
        }))
        .await
    }

    async fn reuse_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.reuse_locks.lock().await;
        locks.entry(key.to_string()).or_default().clone()
    }

    async fn create_or_reuse(
        &self,
        node: &ContentNode,
        payload: &Value,
        path: &NodePath,
    ) -> MigrateResult<(NodeStatus, EntryHandle)> {
        let content_type = node.content_type.as_str();
        let reuse_key = if self.policy.entry_reuse {
            self.repository.reuse_key(content_type, payload)
        } else {
            None
        };

        let lock = match &reuse_key {
            Some(key) => Some(self.reuse_lock(key).await),
            None => None,
        };
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| MigrateError::Cancelled)?;

        if reuse_key.is_some() {
            if let Some(handle) = self.repository.find_existing(content_type, payload).await? {
                self.ledger.record_reuse(&handle.uid, path.clone()).await;
                return Ok((NodeStatus::Reused, handle));
            }
        }

        if self.cancel.is_cancelled() {
            return Err(MigrateError::Cancelled);
        }

        let handle = self.repository.create(content_type, payload).await?;
        self.ledger.record(handle.clone(), path.clone()).await;
        tracing::info!(path = %path, content_type = %content_type, uid = %handle.uid, "Entry created");
        Ok((NodeStatus::Created, handle))
    }
}
