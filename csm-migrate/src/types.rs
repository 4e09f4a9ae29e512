//! Core types and store traits
//!
//! The two remote systems are reached only through [`ContentStore`] and
//! [`AssetStore`]; HTTP clients implement them in `services/`, tests use
//! in-memory fakes.

use crate::error::StoreError;
use csm_common::Locale;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Identifier of an entry that exists in the content store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EntryHandle {
    pub content_type: String,
    pub uid: String,
    pub locale: Locale,
}

impl EntryHandle {
    pub fn new(content_type: impl Into<String>, uid: impl Into<String>, locale: Locale) -> Self {
        Self {
            content_type: content_type.into(),
            uid: uid.into(),
            locale,
        }
    }
}

impl fmt::Display for EntryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.content_type, self.uid)
    }
}

/// Position of a node in the input tree
///
/// A path is the sequence of slot labels from the root; one path is within
/// another when the other is a prefix of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct NodePath(Vec<String>);

impl NodePath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn child(&self, slot: impl fmt::Display) -> Self {
        let mut segments = self.0.clone();
        segments.push(slot.to_string());
        Self(segments)
    }

    /// True for this path itself and every path below it
    pub fn is_within(&self, ancestor: &NodePath) -> bool {
        self.0.starts_with(&ancestor.0)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("$")?;
        for segment in &self.0 {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

/// Asset already present in the asset store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAsset {
    pub id: String,
    pub cdn_url: Option<String>,
}

/// Processing state of an uploaded asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingState {
    Pending,
    Processed { cdn_url: Option<String> },
    Failed(String),
}

/// Pixel size of an asset's main file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub width: u64,
    pub height: u64,
}

/// A file stored with an asset next to its main file: the captions or the
/// poster image of a video
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanionFile {
    pub id: String,
    pub url: String,
    pub filename: String,
    pub extension: String,
    pub mimetype: String,
}

/// An asset the store already hosts, looked up through one of its attachments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostedAsset {
    pub asset_id: String,
    pub cdn_url: Option<String>,
    /// Main file details; for a video, those of the video attachment
    pub filename: Option<String>,
    pub extension: Option<String>,
    pub mimetype: Option<String>,
    pub dimensions: Option<Dimensions>,
    /// Set only for videos that carry both captions and a poster image
    pub companions: Vec<CompanionFile>,
}

/// Outcome of resolving one source URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetRecord {
    pub source_url: String,
    /// Field or slot the asset was first requested for
    pub logical_key: String,
    pub resolved_asset_id: String,
    pub collection_id: String,
    pub cdn_url: Option<String>,
    pub filename: String,
    pub extension: String,
    /// Matched an asset that was already in the store
    pub existing: bool,
    /// Overrides the extension's MIME type when the store reports one
    pub mimetype: Option<String>,
    pub dimensions: Option<Dimensions>,
    pub companions: Vec<CompanionFile>,
}

impl AssetRecord {
    /// URL the entry should point at
    pub fn public_url(&self) -> &str {
        self.cdn_url.as_deref().unwrap_or(&self.source_url)
    }
}

/// Headless content store (entries, workflow, publishing)
#[async_trait::async_trait]
pub trait ContentStore: Send + Sync {
    /// Create an entry; returns its uid
    async fn create_entry(
        &self,
        content_type: &str,
        fields: &Value,
        locale: Locale,
    ) -> Result<String, StoreError>;

    async fn get_entry(
        &self,
        content_type: &str,
        uid: &str,
        locale: Locale,
    ) -> Result<Value, StoreError>;

    async fn update_entry(
        &self,
        content_type: &str,
        uid: &str,
        fields: &Value,
        locale: Locale,
    ) -> Result<(), StoreError>;

    /// Delete an entry; `Ok(false)` when it was already absent
    async fn delete_entry(
        &self,
        content_type: &str,
        uid: &str,
        locale: Locale,
    ) -> Result<bool, StoreError>;

    /// Entries of a type matching a field query
    async fn find_entries(
        &self,
        content_type: &str,
        query: &Value,
        locale: Locale,
    ) -> Result<Vec<Value>, StoreError>;

    async fn set_workflow_stage(
        &self,
        content_type: &str,
        uid: &str,
        stage_uid: &str,
        locale: Locale,
    ) -> Result<(), StoreError>;

    /// Publish an entry, and with `deep` everything it references
    async fn publish(
        &self,
        content_type: &str,
        uid: &str,
        environment_ids: &[String],
        locale: Locale,
        deep: bool,
    ) -> Result<(), StoreError>;

    /// Withdraw an entry from the given environments
    async fn unpublish(
        &self,
        content_type: &str,
        uid: &str,
        environment_ids: &[String],
        locale: Locale,
    ) -> Result<(), StoreError>;

    /// Take an entry out of its workflow so it can be deleted
    async fn clear_workflow(
        &self,
        content_type: &str,
        uid: &str,
        locale: Locale,
    ) -> Result<(), StoreError>;

    /// Uids of entries that reference this one
    async fn referencing_entries(
        &self,
        content_type: &str,
        uid: &str,
        locale: Locale,
    ) -> Result<Vec<String>, StoreError>;
}

/// Digital asset store
#[async_trait::async_trait]
pub trait AssetStore: Send + Sync {
    /// Ask the store to ingest a public URL; returns the new asset id
    async fn create_from_url(
        &self,
        source_url: &str,
        filename: &str,
        collection_id: &str,
        section_key: &str,
    ) -> Result<String, StoreError>;

    async fn find_by_filename(
        &self,
        filename: &str,
        collection_id: &str,
    ) -> Result<Option<StoredAsset>, StoreError>;

    async fn get_status(&self, asset_id: &str) -> Result<ProcessingState, StoreError>;

    /// Asset owning a hosted attachment; `None` when the attachment is unknown
    async fn find_by_attachment(&self, attachment_id: &str) -> Result<Option<HostedAsset>, StoreError>;
}
