//! In-memory asset store

use async_trait::async_trait;
use csm_migrate::types::{HostedAsset, ProcessingState, StoredAsset};
use csm_migrate::{AssetStore, StoreError};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct State {
    next_id: u32,
    by_filename: HashMap<String, StoredAsset>,
    processing: HashMap<String, (String, u32)>,
    created_urls: Vec<String>,
    missing_urls: HashSet<String>,
    failing_filenames: HashSet<String>,
    pending_polls: u32,
    search_error: Option<StoreError>,
    hosted: HashMap<String, HostedAsset>,
    attachment_lookups: Vec<String>,
}

#[derive(Default)]
pub struct FakeAssetStore {
    state: Mutex<State>,
    create_delay: Duration,
}

pub const CDN_BASE: &str = "https://cdn.example.com/assets";

impl FakeAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every create takes this long, so concurrent requests overlap
    pub fn with_create_delay(delay: Duration) -> Self {
        Self {
            create_delay: delay,
            ..Self::default()
        }
    }

    pub fn seed(&self, filename: &str, id: &str) {
        self.state.lock().unwrap().by_filename.insert(
            filename.to_string(),
            StoredAsset {
                id: id.to_string(),
                cdn_url: Some(format!("{}/{}", CDN_BASE, filename)),
            },
        );
    }

    /// The store cannot fetch this source URL
    pub fn missing_source(&self, url: &str) {
        self.state.lock().unwrap().missing_urls.insert(url.to_string());
    }

    /// Processing of this file ends in failure
    pub fn fail_processing(&self, filename: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_filenames
            .insert(filename.to_string());
    }

    /// Each new asset reports Pending this many times before it is processed
    pub fn pending_polls(&self, polls: u32) {
        self.state.lock().unwrap().pending_polls = polls;
    }

    pub fn fail_search(&self, error: StoreError) {
        self.state.lock().unwrap().search_error = Some(error);
    }

    /// Make an attachment on the store's CDN resolvable
    pub fn seed_hosted(&self, attachment_id: &str, asset: HostedAsset) {
        self.state
            .lock()
            .unwrap()
            .hosted
            .insert(attachment_id.to_string(), asset);
    }

    pub fn attachment_lookups(&self) -> Vec<String> {
        self.state.lock().unwrap().attachment_lookups.clone()
    }

    pub fn created_urls(&self) -> Vec<String> {
        self.state.lock().unwrap().created_urls.clone()
    }
}

#[async_trait]
impl AssetStore for FakeAssetStore {
    async fn create_from_url(
        &self,
        source_url: &str,
        filename: &str,
        _collection_id: &str,
        _section_key: &str,
    ) -> Result<String, StoreError> {
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.created_urls.push(source_url.to_string());
        if state.missing_urls.contains(source_url) {
            return Err(StoreError::NotFound(format!("could not fetch {}", source_url)));
        }
        state.next_id += 1;
        let id = format!("bf{:03}", state.next_id);
        let polls = state.pending_polls;
        state.processing.insert(id.clone(), (filename.to_string(), polls));
        Ok(id)
    }

    async fn find_by_filename(
        &self,
        filename: &str,
        _collection_id: &str,
    ) -> Result<Option<StoredAsset>, StoreError> {
        let state = self.state.lock().unwrap();
        if let Some(error) = &state.search_error {
            return Err(error.clone());
        }
        Ok(state.by_filename.get(filename).cloned())
    }

    async fn get_status(&self, asset_id: &str) -> Result<ProcessingState, StoreError> {
        let mut state = self.state.lock().unwrap();
        let Some((filename, remaining)) = state.processing.get(asset_id).cloned() else {
            return Err(StoreError::NotFound(asset_id.to_string()));
        };
        if remaining > 0 {
            state.processing.insert(asset_id.to_string(), (filename, remaining - 1));
            return Ok(ProcessingState::Pending);
        }
        if state.failing_filenames.contains(&filename) {
            return Ok(ProcessingState::Failed("unsupported image data".to_string()));
        }
        let cdn_url = format!("{}/{}", CDN_BASE, filename);
        state.by_filename.insert(
            filename,
            StoredAsset {
                id: asset_id.to_string(),
                cdn_url: Some(cdn_url.clone()),
            },
        );
        Ok(ProcessingState::Processed { cdn_url: Some(cdn_url) })
    }

    async fn find_by_attachment(&self, attachment_id: &str) -> Result<Option<HostedAsset>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.attachment_lookups.push(attachment_id.to_string());
        Ok(state.hosted.get(attachment_id).cloned())
    }
}
