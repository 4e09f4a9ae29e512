//! Asset resolution
//!
//! Turns a source URL into a stored asset. Each `(source URL, collection)` pair
//! is resolved at most once per run: concurrent requests for the same pair
//! wait on one shared cell and all receive the same result, success or
//! failure. A URL on the asset store's own CDN resolves to the asset that owns
//! the attachment. Otherwise resolution reuses an asset with the same filename
//! when one exists, or ingests the URL and polls until the asset is processed.
//! Lookup and upload for one filename in one collection run one at a time, so
//! two sources sharing a filename produce a single asset.

use crate::error::{AssetError, StoreError};
use crate::models::asset_url::{extension_of, hosted_attachment_id, parse_asset_url, AssetUrl};
use crate::types::{AssetRecord, AssetStore, HostedAsset, ProcessingState};
use crate::utils::retry::{retry_transient, RetryPolicy};
use csm_common::config::PacingConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};

type CacheKey = (String, String);
type CacheCell = Arc<OnceCell<Result<AssetRecord, AssetError>>>;

/// Polling and retry settings
#[derive(Debug, Clone)]
pub struct AssetPolicy {
    pub section_key: String,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl AssetPolicy {
    pub fn from_pacing(pacing: &PacingConfig, section_key: &str) -> Self {
        Self {
            section_key: section_key.to_string(),
            poll_attempts: pacing.asset_poll_attempts.max(1),
            poll_interval: Duration::from_millis(pacing.asset_poll_interval_ms),
            retry: RetryPolicy::from_pacing(pacing),
        }
    }
}

/// Per-run asset counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AssetSummary {
    /// Uploaded during this run
    pub new: usize,
    /// Matched an asset already in the store
    pub existing: usize,
    /// Source did not exist; references dropped
    pub skipped: usize,
    pub failed: usize,
}

pub struct AssetResolver {
    store: Arc<dyn AssetStore>,
    policy: AssetPolicy,
    cache: Mutex<HashMap<CacheKey, CacheCell>>,
    /// Serializes lookup and upload per (filename, collection)
    upload_locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl AssetResolver {
    pub fn new(store: Arc<dyn AssetStore>, policy: AssetPolicy) -> Self {
        Self {
            store,
            policy,
            cache: Mutex::new(HashMap::new()),
            upload_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve one source URL into a stored asset
    ///
    /// `logical_key` names the field the asset is for; it is kept on the
    /// record for reporting only.
    pub async fn resolve(
        &self,
        source_url: &str,
        logical_key: &str,
        collection_id: &str,
    ) -> Result<AssetRecord, AssetError> {
        let attachment_id = hosted_attachment_id(source_url);
        let parsed = match parse_asset_url(source_url) {
            Ok(parsed) => Some(parsed),
            // Hosted files are found by attachment, not by filename
            Err(_) if attachment_id.is_some() => None,
            Err(e) => return Err(e),
        };

        let cell = {
            let mut cache = self.cache.lock().await;
            cache
                .entry((source_url.to_string(), collection_id.to_string()))
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_init(|| async {
            let result = self
                .resolve_uncached(source_url, attachment_id.as_deref(), parsed.as_ref(), logical_key, collection_id)
                .await;
            match &result {
                Ok(record) => tracing::info!(
                    url = %source_url,
                    asset_id = %record.resolved_asset_id,
                    existing = record.existing,
                    "Asset resolved"
                ),
                Err(AssetError::NotFound(_)) => {
                    tracing::warn!(url = %source_url, "Asset source not found, reference will be dropped")
                }
                Err(e) => tracing::error!(url = %source_url, error = %e, "Asset resolution failed"),
            }
            result
        })
        .await
        .clone()
    }

    async fn resolve_uncached(
        &self,
        source_url: &str,
        attachment_id: Option<&str>,
        parsed: Option<&AssetUrl>,
        logical_key: &str,
        collection_id: &str,
    ) -> Result<AssetRecord, AssetError> {
        if let Some(attachment_id) = attachment_id {
            let hosted = retry_transient("attachment lookup", &self.policy.retry, || {
                self.store.find_by_attachment(attachment_id)
            })
            .await;
            match hosted {
                Ok(Some(asset)) => return Ok(hosted_record(source_url, logical_key, collection_id, asset)),
                Ok(None) => tracing::info!(url = %source_url, attachment_id, "Hosted attachment unknown, ingesting"),
                Err(e) => tracing::warn!(url = %source_url, error = %e, "Attachment lookup failed, ingesting"),
            }
        }
        let Some(parsed) = parsed else {
            return Err(AssetError::UnsupportedType {
                url: source_url.to_string(),
                extension: extension_of(source_url).unwrap_or_default(),
            });
        };
        self.upload(source_url, parsed, logical_key, collection_id).await
    }

    async fn upload_lock(&self, filename: &str, collection_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.upload_locks.lock().await;
        locks
            .entry((filename.to_ascii_lowercase(), collection_id.to_string()))
            .or_default()
            .clone()
    }

    async fn upload(
        &self,
        source_url: &str,
        parsed: &AssetUrl,
        logical_key: &str,
        collection_id: &str,
    ) -> Result<AssetRecord, AssetError> {
        let record = |asset_id: String, cdn_url: Option<String>, existing: bool| AssetRecord {
            source_url: source_url.to_string(),
            logical_key: logical_key.to_string(),
            resolved_asset_id: asset_id,
            collection_id: collection_id.to_string(),
            cdn_url,
            filename: parsed.filename.clone(),
            extension: parsed.extension.clone(),
            existing,
            mimetype: None,
            dimensions: None,
            companions: Vec::new(),
        };

        let lock = self.upload_lock(&parsed.filename, collection_id).await;
        let _guard = lock.lock().await;

        let existing = retry_transient("asset search", &self.policy.retry, || {
            self.store.find_by_filename(&parsed.filename, collection_id)
        })
        .await;
        match existing {
            Ok(Some(asset)) => {
                tracing::debug!(filename = %parsed.filename, asset_id = %asset.id, "Reusing existing asset");
                return Ok(record(asset.id, asset.cdn_url, true));
            }
            Ok(None) => {}
            // A failed lookup only costs a possible duplicate upload
            Err(e) => tracing::warn!(filename = %parsed.filename, error = %e, "Asset search failed, uploading"),
        }

        let asset_id = retry_transient("asset create", &self.policy.retry, || {
            self.store.create_from_url(
                source_url,
                &parsed.filename,
                collection_id,
                &self.policy.section_key,
            )
        })
        .await
        .map_err(|e| match e {
            StoreError::NotFound(_) => AssetError::NotFound(source_url.to_string()),
            other => AssetError::Store(other),
        })?;

        for attempt in 1..=self.policy.poll_attempts {
            let state = retry_transient("asset status", &self.policy.retry, || {
                self.store.get_status(&asset_id)
            })
            .await
            .map_err(AssetError::Store)?;

            match state {
                ProcessingState::Processed { cdn_url } => {
                    return Ok(record(asset_id, cdn_url, false));
                }
                ProcessingState::Failed(reason) => {
                    return Err(AssetError::Store(StoreError::Rejected(reason)));
                }
                ProcessingState::Pending => {
                    tracing::debug!(asset_id = %asset_id, attempt, "Asset still processing");
                    if attempt < self.policy.poll_attempts {
                        tokio::time::sleep(self.policy.poll_interval).await;
                    }
                }
            }
        }

        Err(AssetError::ProcessingTimeout {
            asset_id,
            attempts: self.policy.poll_attempts,
        })
    }

    /// Counts over every URL resolved so far
    pub async fn summary(&self) -> AssetSummary {
        let cache = self.cache.lock().await;
        let mut summary = AssetSummary::default();
        for result in cache.values().filter_map(|cell| cell.get()) {
            match result {
                Ok(record) if record.existing => summary.existing += 1,
                Ok(_) => summary.new += 1,
                Err(AssetError::NotFound(_)) => summary.skipped += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }
}

fn hosted_record(source_url: &str, logical_key: &str, collection_id: &str, asset: HostedAsset) -> AssetRecord {
    let filename = asset.filename.unwrap_or_else(|| {
        source_url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .unwrap_or_default()
            .to_string()
    });
    let extension = asset
        .extension
        .or_else(|| extension_of(&filename))
        .unwrap_or_default();
    tracing::debug!(url = %source_url, asset_id = %asset.asset_id, companions = asset.companions.len(), "Hosted asset found");
    AssetRecord {
        source_url: source_url.to_string(),
        logical_key: logical_key.to_string(),
        resolved_asset_id: asset.asset_id,
        collection_id: collection_id.to_string(),
        cdn_url: asset.cdn_url,
        filename,
        extension,
        existing: true,
        mimetype: asset.mimetype,
        dimensions: asset.dimensions,
        companions: asset.companions,
    }
}
