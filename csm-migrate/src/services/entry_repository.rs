//! Entry Repository
//!
//! Entry CRUD, reuse lookup, workflow stage changes and deep publish against a
//! [`ContentStore`], with bounded retry on transient failures. Every call is
//! scoped to the run's locale.

use crate::error::{MigrateError, MigrateResult, StoreError};
use crate::services::workflow_advancer::WorkflowStage;
use crate::types::{ContentStore, EntryHandle};
use crate::utils::retry::{retry_transient, RetryPolicy};
use csm_common::config::{ResolvedConfig, WorkflowConfig};
use csm_common::Locale;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// Tag stamped on every entry this tool creates
pub const MIGRATION_TAG: &str = "migrated-from-cms";

/// Decides whether an existing entry stands in for a node
pub trait ReuseMatcher: Send + Sync {
    /// Store query selecting candidates; `None` when the node cannot be matched
    fn query(&self, fields: &Value) -> Option<Value>;

    /// Whether a candidate returned by [`ReuseMatcher::query`] really matches
    fn is_match(&self, candidate: &Value, fields: &Value) -> bool;
}

fn has_migration_tag(entry: &Value) -> bool {
    entry
        .get("tags")
        .and_then(Value::as_array)
        .map_or(false, |tags| tags.iter().any(|t| t.as_str() == Some(MIGRATION_TAG)))
}

fn non_empty_str<'a>(fields: &'a Value, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Exact title match on entries this tool created; untitled nodes never match
#[derive(Debug, Default, Clone, Copy)]
pub struct TitleMatcher;

impl ReuseMatcher for TitleMatcher {
    fn query(&self, fields: &Value) -> Option<Value> {
        non_empty_str(fields, "title").map(|title| json!({ "title": title }))
    }

    fn is_match(&self, candidate: &Value, fields: &Value) -> bool {
        match (non_empty_str(candidate, "title"), non_empty_str(fields, "title")) {
            (Some(a), Some(b)) => a == b && has_migration_tag(candidate),
            _ => false,
        }
    }
}

/// Equality on a fixed set of fields, all of which must be present
#[derive(Debug, Clone)]
pub struct FieldMatcher {
    fields: Vec<String>,
}

impl FieldMatcher {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl ReuseMatcher for FieldMatcher {
    fn query(&self, fields: &Value) -> Option<Value> {
        if self.fields.is_empty() {
            return None;
        }
        let mut query = serde_json::Map::new();
        for name in &self.fields {
            let value = fields.get(name).filter(|v| !v.is_null())?;
            query.insert(name.clone(), value.clone());
        }
        Some(Value::Object(query))
    }

    fn is_match(&self, candidate: &Value, fields: &Value) -> bool {
        has_migration_tag(candidate)
            && self
                .fields
                .iter()
                .all(|name| candidate.get(name).is_some() && candidate.get(name) == fields.get(name))
    }
}

/// Reuse matchers by content type, with a default
#[derive(Clone)]
pub struct MatcherRegistry {
    default: Arc<dyn ReuseMatcher>,
    by_type: HashMap<String, Arc<dyn ReuseMatcher>>,
}

impl MatcherRegistry {
    pub fn new(default: Arc<dyn ReuseMatcher>) -> Self {
        Self {
            default,
            by_type: HashMap::new(),
        }
    }

    pub fn register(mut self, content_type: &str, matcher: Arc<dyn ReuseMatcher>) -> Self {
        self.by_type.insert(content_type.to_string(), matcher);
        self
    }

    pub fn for_type(&self, content_type: &str) -> &dyn ReuseMatcher {
        self.by_type
            .get(content_type)
            .map_or(self.default.as_ref(), |m| m.as_ref())
    }
}

impl Default for MatcherRegistry {
    fn default() -> Self {
        Self::new(Arc::new(TitleMatcher))
    }
}

/// Repository settings
#[derive(Debug, Clone)]
pub struct RepositoryOptions {
    pub locale: Locale,
    /// Publish target
    pub environment_uid: String,
    pub retry: RetryPolicy,
    /// Retry a create rejected for a duplicate page path with a suffixed path
    pub handle_duplicate_page_id: bool,
    pub page_path_field: String,
    pub workflow: WorkflowConfig,
}

impl RepositoryOptions {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            locale: config.locale,
            environment_uid: config.content_store.environment_uid.clone(),
            retry: RetryPolicy::from_pacing(&config.pacing),
            handle_duplicate_page_id: config.handle_duplicate_page_id,
            page_path_field: config.materialize.page_path_field.clone(),
            workflow: config.workflow.clone(),
        }
    }
}

pub struct EntryRepository {
    store: Arc<dyn ContentStore>,
    options: RepositoryOptions,
    matchers: MatcherRegistry,
}

impl EntryRepository {
    pub fn new(store: Arc<dyn ContentStore>, options: RepositoryOptions, matchers: MatcherRegistry) -> Self {
        Self {
            store,
            options,
            matchers,
        }
    }

    pub fn locale(&self) -> Locale {
        self.options.locale
    }

    fn handle(&self, content_type: &str, uid: String) -> EntryHandle {
        EntryHandle::new(content_type, uid, self.options.locale)
    }

    /// Key identifying what a node would be matched on, if anything
    pub fn reuse_key(&self, content_type: &str, fields: &Value) -> Option<String> {
        self.matchers
            .for_type(content_type)
            .query(fields)
            .map(|query| format!("{}:{}", content_type, query))
    }

    /// Create an entry tagged as migrated
    pub async fn create(&self, content_type: &str, fields: &Value) -> MigrateResult<EntryHandle> {
        let mut payload = fields.clone();
        add_migration_tag(&mut payload);

        let uid = match self.create_raw(content_type, &payload).await {
            Err(StoreError::Validation(message))
                if self.options.handle_duplicate_page_id && is_duplicate_error(&message) =>
            {
                let field = &self.options.page_path_field;
                let Some(page_id) = payload.get(field).and_then(Value::as_str).map(str::to_string) else {
                    return Err(MigrateError::from_store(content_type, StoreError::Validation(message)));
                };
                let suffixed = format!("{}-{}", page_id, chrono::Utc::now().timestamp_millis());
                tracing::warn!(
                    content_type = %content_type,
                    page_id = %page_id,
                    retry_page_id = %suffixed,
                    "Duplicate page path, retrying with suffix"
                );
                payload[field.as_str()] = Value::String(suffixed);
                self.create_raw(content_type, &payload)
                    .await
                    .map_err(|e| MigrateError::from_store(content_type, e))
            }
            result => result.map_err(|e| MigrateError::from_store(content_type, e)),
        }?;
        Ok(self.handle(content_type, uid))
    }

    async fn create_raw(&self, content_type: &str, payload: &Value) -> Result<String, StoreError> {
        let op = format!("create {}", content_type);
        retry_transient(&op, &self.options.retry, || {
            self.store.create_entry(content_type, payload, self.options.locale)
        })
        .await
    }

    /// First existing entry the content type's matcher accepts
    pub async fn find_existing(&self, content_type: &str, fields: &Value) -> MigrateResult<Option<EntryHandle>> {
        let matcher = self.matchers.for_type(content_type);
        let Some(query) = matcher.query(fields) else {
            return Ok(None);
        };

        let op = format!("search {}", content_type);
        let candidates = retry_transient(&op, &self.options.retry, || {
            self.store.find_entries(content_type, &query, self.options.locale)
        })
        .await
        .map_err(|e| MigrateError::from_store(content_type, e))?;

        let found = candidates
            .iter()
            .find(|candidate| matcher.is_match(candidate, fields))
            .and_then(|candidate| candidate.get("uid").and_then(Value::as_str))
            .map(|uid| self.handle(content_type, uid.to_string()));

        if let Some(handle) = &found {
            tracing::info!(content_type = %content_type, uid = %handle.uid, "Reusing existing entry");
        }
        Ok(found)
    }

    pub async fn get(&self, handle: &EntryHandle) -> MigrateResult<Value> {
        retry_transient("get entry", &self.options.retry, || {
            self.store.get_entry(&handle.content_type, &handle.uid, handle.locale)
        })
        .await
        .map_err(|e| MigrateError::from_store(&handle.content_type, e))
    }

    pub async fn update(&self, handle: &EntryHandle, fields: &Value) -> MigrateResult<()> {
        retry_transient("update entry", &self.options.retry, || {
            self.store
                .update_entry(&handle.content_type, &handle.uid, fields, handle.locale)
        })
        .await
        .map_err(|e| MigrateError::from_store(&handle.content_type, e))
    }

    /// Delete an entry; `false` when it was already absent
    ///
    /// The store refuses to delete published entries and entries held in a
    /// workflow stage. Such a refusal is retried once after unpublishing the
    /// entry and clearing its workflow; both clean-up calls are best effort.
    pub async fn delete(&self, handle: &EntryHandle) -> Result<bool, StoreError> {
        match self.delete_once(handle).await {
            Err(StoreError::Validation(message)) => {
                tracing::warn!(
                    uid = %handle.uid,
                    content_type = %handle.content_type,
                    reason = %message,
                    "Delete blocked, unpublishing and clearing workflow"
                );
                self.release(handle).await;
                self.delete_once(handle).await
            }
            other => other,
        }
    }

    async fn delete_once(&self, handle: &EntryHandle) -> Result<bool, StoreError> {
        let result = retry_transient("delete entry", &self.options.retry, || {
            self.store
                .delete_entry(&handle.content_type, &handle.uid, handle.locale)
        })
        .await;
        match result {
            Err(StoreError::NotFound(_)) => Ok(false),
            other => other,
        }
    }

    async fn release(&self, handle: &EntryHandle) {
        let environments = [self.options.environment_uid.clone()];
        if let Err(e) = self
            .store
            .unpublish(&handle.content_type, &handle.uid, &environments, handle.locale)
            .await
        {
            tracing::info!(uid = %handle.uid, error = %e, "Unpublish before delete failed");
        }
        if let Err(e) = self
            .store
            .clear_workflow(&handle.content_type, &handle.uid, handle.locale)
            .await
        {
            tracing::info!(uid = %handle.uid, error = %e, "Workflow removal before delete failed");
        }
    }

    /// Uids of entries referencing this one
    pub async fn referencing_entries(&self, handle: &EntryHandle) -> Result<Vec<String>, StoreError> {
        retry_transient("entry references", &self.options.retry, || {
            self.store
                .referencing_entries(&handle.content_type, &handle.uid, handle.locale)
        })
        .await
    }

    /// Move an entry to a configured workflow stage (single attempt)
    pub async fn advance_workflow(&self, handle: &EntryHandle, target: WorkflowStage) -> Result<(), StoreError> {
        let stage_uid = match target {
            WorkflowStage::InReview => &self.options.workflow.review_stage_uid,
            WorkflowStage::Approved => &self.options.workflow.approved_stage_uid,
            other => {
                return Err(StoreError::Validation(format!(
                    "{} is not a settable workflow stage",
                    other
                )))
            }
        };
        self.store
            .set_workflow_stage(&handle.content_type, &handle.uid, stage_uid, handle.locale)
            .await
    }

    /// Publish the entry and everything it references to the run's environment
    pub async fn publish_deep(&self, handle: &EntryHandle) -> MigrateResult<()> {
        let environments = [self.options.environment_uid.clone()];
        retry_transient("deep publish", &self.options.retry, || {
            self.store
                .publish(&handle.content_type, &handle.uid, &environments, handle.locale, true)
        })
        .await
        .map_err(|e| MigrateError::Publish {
            content_type: handle.content_type.clone(),
            uid: handle.uid.clone(),
            reason: e.to_string(),
        })
    }

    pub fn is_exempt_from_workflow(&self, content_type: &str) -> bool {
        self.options
            .workflow
            .exempt_types
            .iter()
            .any(|t| t == content_type)
    }
}

fn add_migration_tag(payload: &mut Value) {
    let Value::Object(map) = payload else {
        return;
    };
    let tags = map.entry("tags").or_insert_with(|| json!([]));
    if !tags.is_array() {
        *tags = json!([]);
    }
    if let Value::Array(items) = tags {
        if !items.iter().any(|t| t.as_str() == Some(MIGRATION_TAG)) {
            items.push(Value::String(MIGRATION_TAG.to_string()));
        }
    }
}

fn is_duplicate_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("unique") || lower.contains("duplicate") || lower.contains("already exists")
}
