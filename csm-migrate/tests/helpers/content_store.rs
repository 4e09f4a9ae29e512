//! In-memory content store
//!
//! Records every call and supports failure injection per content type, title
//! or workflow stage.

use async_trait::async_trait;
use csm_common::Locale;
use csm_migrate::services::tree_deleter::collect_references;
use csm_migrate::{ContentStore, StoreError};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One recorded store call
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Create { content_type: String, title: Option<String> },
    Get { uid: String },
    Update { uid: String },
    Delete { content_type: String, uid: String },
    Find { content_type: String },
    Stage { uid: String, stage_uid: String },
    Publish { uid: String, deep: bool, environments: Vec<String> },
    Unpublish { uid: String, environments: Vec<String> },
    ClearWorkflow { uid: String },
    References { uid: String },
}

#[derive(Debug, Clone)]
struct StoredEntry {
    content_type: String,
    fields: Value,
}

#[derive(Default)]
struct State {
    next_id: u32,
    entries: BTreeMap<String, StoredEntry>,
    created: Vec<String>,
    calls: Vec<StoreCall>,
    fail_create_types: HashMap<String, StoreError>,
    fail_create_titles: HashMap<String, StoreError>,
    fail_delete_types: HashSet<String>,
    locked_types: HashSet<String>,
    unpublished: HashSet<String>,
    workflow_cleared: HashSet<String>,
    reject_stages: HashSet<String>,
    publish_error: Option<StoreError>,
    rate_limited_creates: u32,
    external_referrers: HashMap<String, Vec<String>>,
    cancel_after_creates: Option<(u32, CancellationToken)>,
}

#[derive(Default)]
pub struct FakeContentStore {
    state: Mutex<State>,
}

impl FakeContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry directly; returns its uid
    pub fn seed(&self, content_type: &str, mut fields: Value) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let uid = fields
            .get("uid")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("seed{:04}", state.next_id));
        fields["uid"] = Value::String(uid.clone());
        state.entries.insert(
            uid.clone(),
            StoredEntry {
                content_type: content_type.to_string(),
                fields,
            },
        );
        uid
    }

    pub fn fail_creates_of_type(&self, content_type: &str, error: StoreError) {
        self.state
            .lock()
            .unwrap()
            .fail_create_types
            .insert(content_type.to_string(), error);
    }

    pub fn fail_creates_titled(&self, title: &str, error: StoreError) {
        self.state
            .lock()
            .unwrap()
            .fail_create_titles
            .insert(title.to_string(), error);
    }

    pub fn fail_deletes_of_type(&self, content_type: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_delete_types
            .insert(content_type.to_string());
    }

    /// Deletes of this type fail validation until the entry has been both
    /// unpublished and taken out of its workflow
    pub fn lock_published_entries_of_type(&self, content_type: &str) {
        self.state
            .lock()
            .unwrap()
            .locked_types
            .insert(content_type.to_string());
    }

    pub fn reject_stage(&self, stage_uid: &str) {
        self.state
            .lock()
            .unwrap()
            .reject_stages
            .insert(stage_uid.to_string());
    }

    pub fn fail_publish(&self, error: StoreError) {
        self.state.lock().unwrap().publish_error = Some(error);
    }

    /// The next `count` creates answer 429
    pub fn rate_limit_creates(&self, count: u32) {
        self.state.lock().unwrap().rate_limited_creates = count;
    }

    /// Entries of `content_type` are referenced by these uids outside any run
    pub fn referenced_externally(&self, content_type: &str, referrers: &[&str]) {
        self.state.lock().unwrap().external_referrers.insert(
            content_type.to_string(),
            referrers.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Cancel `token` once `count` entries have been created
    pub fn cancel_after_creates(&self, count: u32, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after_creates = Some((count, token));
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Uids of every successful create, in order, including since-deleted ones
    pub fn created_uids(&self) -> Vec<String> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn create_count(&self, content_type: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, StoreCall::Create { content_type: ct, .. } if ct == content_type))
            .count()
    }

    pub fn deleted_uids(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::Delete { uid, .. } => Some(uid),
                _ => None,
            })
            .collect()
    }

    pub fn stage_calls(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::Stage { uid, stage_uid } => Some((uid, stage_uid)),
                _ => None,
            })
            .collect()
    }

    pub fn publish_calls(&self) -> Vec<(String, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                StoreCall::Publish { uid, deep, .. } => Some((uid, deep)),
                _ => None,
            })
            .collect()
    }

    pub fn entry(&self, uid: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .entries
            .get(uid)
            .map(|e| e.fields.clone())
    }

    pub fn entries_of_type(&self, content_type: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .entries
            .values()
            .filter(|e| e.content_type == content_type)
            .map(|e| e.fields.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }
}

fn title_of(fields: &Value) -> Option<String> {
    fields.get("title").and_then(Value::as_str).map(str::to_string)
}

#[async_trait]
impl ContentStore for FakeContentStore {
    async fn create_entry(&self, content_type: &str, fields: &Value, _locale: Locale) -> Result<String, StoreError> {
        let mut state = self.state.lock().unwrap();
        let title = title_of(fields);
        state.calls.push(StoreCall::Create {
            content_type: content_type.to_string(),
            title: title.clone(),
        });

        if state.rate_limited_creates > 0 {
            state.rate_limited_creates -= 1;
            return Err(StoreError::RateLimited);
        }
        if let Some(error) = state.fail_create_types.get(content_type) {
            return Err(error.clone());
        }
        if let Some(error) = title.as_ref().and_then(|t| state.fail_create_titles.get(t)) {
            return Err(error.clone());
        }
        if let Some(page_id) = fields.get("page_id").and_then(Value::as_str) {
            let taken = state.entries.values().any(|e| {
                e.content_type == content_type && e.fields.get("page_id").and_then(Value::as_str) == Some(page_id)
            });
            if taken {
                return Err(StoreError::Validation("page_id is not unique".to_string()));
            }
        }

        state.next_id += 1;
        let uid = format!("blt{:04}", state.next_id);
        let mut stored = fields.clone();
        stored["uid"] = Value::String(uid.clone());
        state.entries.insert(
            uid.clone(),
            StoredEntry {
                content_type: content_type.to_string(),
                fields: stored,
            },
        );

        state.created.push(uid.clone());

        let created = state.created.len() as u32;
        if let Some((after, token)) = &state.cancel_after_creates {
            if created >= *after {
                token.cancel();
            }
        }
        Ok(uid)
    }

    async fn get_entry(&self, content_type: &str, uid: &str, _locale: Locale) -> Result<Value, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Get { uid: uid.to_string() });
        state
            .entries
            .get(uid)
            .filter(|e| e.content_type == content_type)
            .map(|e| e.fields.clone())
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", content_type, uid)))
    }

    async fn update_entry(
        &self,
        content_type: &str,
        uid: &str,
        fields: &Value,
        _locale: Locale,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Update { uid: uid.to_string() });
        let entry = state
            .entries
            .get_mut(uid)
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", content_type, uid)))?;
        let mut updated = fields.clone();
        updated["uid"] = Value::String(uid.to_string());
        entry.fields = updated;
        Ok(())
    }

    async fn delete_entry(&self, content_type: &str, uid: &str, _locale: Locale) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Delete {
            content_type: content_type.to_string(),
            uid: uid.to_string(),
        });
        if state.fail_delete_types.contains(content_type) {
            return Err(StoreError::Rejected("entry is locked".to_string()));
        }
        let released = state.unpublished.contains(uid) && state.workflow_cleared.contains(uid);
        if state.locked_types.contains(content_type) && state.entries.contains_key(uid) && !released {
            return Err(StoreError::Validation(
                "entry is published or in a workflow stage".to_string(),
            ));
        }
        Ok(state.entries.remove(uid).is_some())
    }

    async fn find_entries(&self, content_type: &str, query: &Value, _locale: Locale) -> Result<Vec<Value>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Find {
            content_type: content_type.to_string(),
        });
        let Some(query) = query.as_object() else {
            return Ok(Vec::new());
        };
        Ok(state
            .entries
            .values()
            .filter(|e| e.content_type == content_type)
            .filter(|e| query.iter().all(|(k, v)| e.fields.get(k) == Some(v)))
            .map(|e| e.fields.clone())
            .collect())
    }

    async fn set_workflow_stage(
        &self,
        _content_type: &str,
        uid: &str,
        stage_uid: &str,
        _locale: Locale,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Stage {
            uid: uid.to_string(),
            stage_uid: stage_uid.to_string(),
        });
        if state.reject_stages.contains(stage_uid) {
            return Err(StoreError::Rejected("stage transition not allowed".to_string()));
        }
        Ok(())
    }

    async fn publish(
        &self,
        _content_type: &str,
        uid: &str,
        environment_ids: &[String],
        _locale: Locale,
        deep: bool,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Publish {
            uid: uid.to_string(),
            deep,
            environments: environment_ids.to_vec(),
        });
        match &state.publish_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn unpublish(
        &self,
        _content_type: &str,
        uid: &str,
        environment_ids: &[String],
        _locale: Locale,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::Unpublish {
            uid: uid.to_string(),
            environments: environment_ids.to_vec(),
        });
        state.unpublished.insert(uid.to_string());
        Ok(())
    }

    async fn clear_workflow(&self, _content_type: &str, uid: &str, _locale: Locale) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::ClearWorkflow { uid: uid.to_string() });
        state.workflow_cleared.insert(uid.to_string());
        Ok(())
    }

    async fn referencing_entries(
        &self,
        content_type: &str,
        uid: &str,
        _locale: Locale,
    ) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(StoreCall::References { uid: uid.to_string() });

        let mut referrers: Vec<String> = state
            .entries
            .values()
            .filter(|e| {
                collect_references(&e.fields)
                    .iter()
                    .any(|(ct, ref_uid)| ct == content_type && ref_uid == uid)
            })
            .filter_map(|e| e.fields.get("uid").and_then(Value::as_str).map(str::to_string))
            .collect();
        if let Some(external) = state.external_referrers.get(content_type) {
            referrers.extend(external.iter().cloned());
        }
        Ok(referrers)
    }
}
