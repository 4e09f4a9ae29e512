//! One migration run
//!
//! Wires the components from a [`ResolvedConfig`], materializes the tree,
//! promotes and publishes the root, and turns everything into a
//! [`MaterializationReport`]. The root is the failure boundary: if it cannot be
//! created or published, every entry the run created is rolled back.

use crate::error::{MigrateError, MigrateResult};
use crate::models::content_node::{ContentNode, ParseOptions};
use crate::report::{edit_url, published_url, rows_from_tree, MaterializationReport, ReportCounts, RunOutcome};
use crate::services::asset_resolver::{AssetPolicy, AssetResolver};
use crate::services::cache_flush::CacheFlusher;
use crate::services::entry_repository::{EntryRepository, MatcherRegistry, RepositoryOptions};
use crate::services::rollback::{CreationLedger, RollbackCoordinator, RollbackOutcome};
use crate::services::tree_materializer::{MaterializationResult, MaterializePolicy, NodeStatus, TreeMaterializer};
use crate::services::workflow_advancer::{WorkflowAdvancer, WorkflowPolicy};
use crate::types::{AssetStore, ContentStore, EntryHandle, NodePath};
use chrono::Utc;
use csm_common::ResolvedConfig;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

pub struct MigrationRun {
    run_id: Uuid,
    config: ResolvedConfig,
    repository: Arc<EntryRepository>,
    assets: Arc<AssetResolver>,
    ledger: Arc<CreationLedger>,
    rollback: Arc<RollbackCoordinator>,
    materializer: TreeMaterializer,
    advancer: WorkflowAdvancer,
    cache_flusher: Option<CacheFlusher>,
    cancel: CancellationToken,
}

impl MigrationRun {
    pub fn new(
        config: ResolvedConfig,
        content_store: Arc<dyn ContentStore>,
        asset_store: Arc<dyn AssetStore>,
        matchers: MatcherRegistry,
        cancel: CancellationToken,
    ) -> Self {
        let repository = Arc::new(EntryRepository::new(
            content_store,
            RepositoryOptions::from_config(&config),
            matchers,
        ));
        let assets = Arc::new(AssetResolver::new(
            asset_store,
            AssetPolicy::from_pacing(&config.pacing, &config.asset_store.section_key),
        ));
        let ledger = Arc::new(CreationLedger::new());
        let rollback = Arc::new(RollbackCoordinator::new(repository.clone(), ledger.clone(), true));
        let materializer = TreeMaterializer::new(
            assets.clone(),
            repository.clone(),
            ledger.clone(),
            rollback.clone(),
            MaterializePolicy::from_config(&config),
            cancel.clone(),
        );
        let advancer = WorkflowAdvancer::new(repository.clone(), WorkflowPolicy::from_pacing(&config.pacing));

        Self {
            run_id: Uuid::new_v4(),
            config,
            repository,
            assets,
            ledger,
            rollback,
            materializer,
            advancer,
            cache_flusher: None,
            cancel,
        }
    }

    pub fn with_cache_flusher(mut self, flusher: CacheFlusher) -> Self {
        self.cache_flusher = Some(flusher);
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Entries created so far and not rolled back
    pub fn ledger(&self) -> &CreationLedger {
        &self.ledger
    }

    /// Parse an input document into a content tree
    pub fn parse_document(&self, document: &Value, root_content_type: Option<&str>) -> MigrateResult<ContentNode> {
        let content_type = root_content_type.unwrap_or(&self.config.materialize.root_content_type);
        let options = ParseOptions {
            source_site_base_url: self.config.materialize.source_site_base_url.clone(),
        };
        ContentNode::from_document(document, content_type, &options)
    }

    /// Materialize, promote and publish a tree
    pub async fn execute(&self, root: &ContentNode) -> MaterializationReport {
        let span = tracing::info_span!(
            "run",
            run_id = %self.run_id,
            environment = %self.config.environment,
        );
        self.execute_inner(root).instrument(span).await
    }

    async fn execute_inner(&self, root: &ContentNode) -> MaterializationReport {
        let started_at = Utc::now();
        tracing::info!(
            root_type = %root.content_type,
            nodes = root.node_count(),
            locale = %self.config.locale,
            "Starting migration run"
        );

        let result = self.materializer.materialize(root, NodePath::root()).await;

        let mut rollback = RollbackOutcome::default();
        for omitted in result.omitted() {
            if let Some(outcome) = &omitted.rollback {
                rollback.merge(outcome.clone());
            }
        }

        let mut primary_error = None;
        let mut final_stage = None;
        let mut published = None;
        let mut warnings = Vec::new();

        let outcome = match (&result.status, result.entry.clone()) {
            (NodeStatus::Created | NodeStatus::Reused, Some(handle)) => {
                match self.advancer.promote_and_publish(&handle, &self.cancel).await {
                    Ok(workflow) => {
                        final_stage = Some(workflow.stage);
                        published = self.publish_followups(root, &handle, &mut warnings).await;
                        if result.omitted().is_empty() {
                            RunOutcome::Success
                        } else {
                            RunOutcome::PartialFailure
                        }
                    }
                    Err(e) => {
                        tracing::error!(uid = %handle.uid, error = %e, "Root promotion failed, rolling back run");
                        primary_error = Some(e.to_string());
                        rollback.merge(self.rollback.rollback_all().await);
                        RunOutcome::Fatal
                    }
                }
            }
            _ => {
                primary_error = primary_failure(&result);
                tracing::error!(error = ?primary_error, "Root not materialized, rolling back run");
                rollback.merge(self.rollback.rollback_all().await);
                RunOutcome::Fatal
            }
        };

        let rollback_warning = rollback.incomplete();
        if let Some(warning) = &rollback_warning {
            tracing::error!(remaining = warning.failures.len(), "Rollback incomplete");
        }

        let deleted: HashSet<String> = rollback.deleted.iter().map(|h| h.uid.clone()).collect();
        let rows = rows_from_tree(&result, &deleted);
        let counts = ReportCounts::from_rows(&rows);
        let root_handle = result.entry.as_ref().filter(|h| !deleted.contains(&h.uid));

        let report = MaterializationReport {
            run_id: self.run_id,
            environment: self.config.environment.to_string(),
            locale: self.config.locale.to_string(),
            started_at,
            finished_at: Utc::now(),
            outcome,
            root_uid: root_handle.map(|h| h.uid.clone()),
            final_stage,
            published_url: published,
            edit_url: root_handle.map(|h| edit_url(&self.config.content_store.app_url, h)),
            rows,
            counts,
            assets: self.assets.summary().await,
            primary_error,
            rollback,
            rollback_warning,
            warnings,
        };

        tracing::info!(
            outcome = %report.outcome,
            created = report.counts.created,
            reused = report.counts.reused,
            failed = report.counts.failed,
            duration_ms = report.duration_ms(),
            "Migration run finished"
        );
        report
    }

    /// Published URL and storefront cache flush
    async fn publish_followups(
        &self,
        root: &ContentNode,
        handle: &EntryHandle,
        warnings: &mut Vec<String>,
    ) -> Option<String> {
        let field = &self.config.materialize.page_path_field;

        // The stored value wins: a duplicate page path may have been suffixed
        let page_path = match self.repository.get(handle).await {
            Ok(entry) => entry.get(field.as_str()).and_then(Value::as_str).map(str::to_string),
            Err(e) => {
                tracing::warn!(uid = %handle.uid, error = %e, "Could not re-read root entry");
                None
            }
        }
        .or_else(|| root.field_str(field).map(str::to_string));

        let Some(page_path) = page_path.filter(|p| !p.trim().is_empty()) else {
            warnings.push(format!("root entry has no {}; published URL unknown", field));
            return None;
        };

        if let Some(flusher) = &self.cache_flusher {
            match flusher.flush(&page_path).await {
                Ok(status) => tracing::info!(status, "Storefront cache flushed"),
                Err(e) => warnings.push(format!("cache flush failed: {}", e)),
            }
        }

        Some(published_url(&self.config.content_store.published_page_base_url, &page_path))
    }
}

/// The failure that caused the run to fail: the first failed node, in tree
/// order, whose own error is not just a failed child
fn primary_failure(result: &MaterializationResult) -> Option<String> {
    result
        .nodes()
        .into_iter()
        .filter(|n| n.status == NodeStatus::Failed)
        .find_map(|n| match &n.error {
            Some(MigrateError::ChildFailed { .. }) | None => None,
            Some(e) => Some(format!("{} at {}: {}", n.content_type, n.path, e)),
        })
        .or_else(|| result.error.as_ref().map(ToString::to_string))
}
