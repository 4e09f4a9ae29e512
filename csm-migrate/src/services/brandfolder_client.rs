//! Brandfolder API client
//!
//! Implements [`AssetStore`]: ingest a public URL into a collection, find an
//! existing asset by filename or by one of its attachments, and poll an asset
//! until its CDN URL exists.

use crate::error::StoreError;
use crate::services::http::{build_http_client, json_or_error, status_error};
use crate::services::rate_limit::CallSpacing;
use crate::types::{AssetStore, CompanionFile, Dimensions, HostedAsset, ProcessingState, StoredAsset};
use csm_common::config::AssetStoreCredentials;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const BRANDFOLDER_BASE_URL: &str = "https://brandfolder.com/api/v4";
const SEARCH_PAGE_SIZE: u32 = 10;

#[derive(Debug, Deserialize)]
struct AssetList {
    #[serde(default)]
    data: Vec<AssetData>,
}

#[derive(Debug, Deserialize)]
struct AssetEnvelope {
    data: AssetData,
}

#[derive(Debug, Deserialize)]
struct AssetData {
    id: String,
    #[serde(default)]
    attributes: AssetAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct AssetAttributes {
    name: Option<String>,
    cdn_url: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentEnvelope {
    data: AttachmentLinks,
}

#[derive(Debug, Deserialize)]
struct AttachmentLinks {
    #[serde(default)]
    relationships: AttachmentRelationships,
}

#[derive(Debug, Default, Deserialize)]
struct AttachmentRelationships {
    asset: Option<Relationship>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    data: Option<ResourceId>,
}

#[derive(Debug, Deserialize)]
struct ResourceId {
    id: String,
}

/// Asset with its attachments side-loaded
#[derive(Debug, Deserialize)]
struct AssetWithAttachments {
    data: AssetData,
    #[serde(default)]
    included: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
struct Attachment {
    id: String,
    #[serde(default)]
    attributes: AttachmentAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct AttachmentAttributes {
    filename: Option<String>,
    extension: Option<String>,
    mimetype: Option<String>,
    width: Option<u64>,
    height: Option<u64>,
}

impl Attachment {
    fn mimetype(&self) -> &str {
        self.attributes.mimetype.as_deref().unwrap_or_default()
    }

    fn companion(&self, cdn_prefix: &str) -> CompanionFile {
        let filename = self.attributes.filename.clone().unwrap_or_default();
        CompanionFile {
            id: self.id.clone(),
            url: format!("{}/at/{}/{}", cdn_prefix, self.id, filename),
            extension: self
                .attributes
                .extension
                .clone()
                .or_else(|| filename.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()))
                .unwrap_or_default(),
            filename,
            mimetype: self.mimetype().to_string(),
        }
    }
}

/// Hosted asset details from an asset fetched with its attachments
///
/// A video's main file details come from its video attachment; captions and
/// poster image are attached only when the asset has both.
fn hosted_asset(asset: AssetWithAttachments) -> HostedAsset {
    let attributes = asset.data.attributes;
    let cdn_url = attributes.cdn_url.filter(|u| !u.is_empty()).or(attributes.url);
    let cdn_prefix = cdn_url
        .as_deref()
        .map(|u| u.split("/as/").next().unwrap_or(u).to_string())
        .unwrap_or_default();

    let find = |predicate: fn(&str) -> bool| asset.included.iter().find(|a| predicate(a.mimetype()));
    let video = find(|m| m.starts_with("video"));
    let captions = find(|m| m.contains("text"));
    let poster = find(|m| m.starts_with("image"));

    let companions = match (video, captions, poster) {
        (Some(_), Some(captions), Some(poster)) => {
            vec![captions.companion(&cdn_prefix), poster.companion(&cdn_prefix)]
        }
        _ => Vec::new(),
    };
    let dimensions = video.and_then(|v| match (v.attributes.width, v.attributes.height) {
        (Some(width), Some(height)) => Some(Dimensions { width, height }),
        _ => None,
    });

    HostedAsset {
        asset_id: asset.data.id,
        cdn_url,
        filename: video.and_then(|v| v.attributes.filename.clone()),
        extension: video.and_then(|v| v.attributes.extension.clone()),
        mimetype: video.and_then(|v| v.attributes.mimetype.clone()),
        dimensions,
        companions,
    }
}

/// Brandfolder API client
pub struct BrandfolderClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    spacing: CallSpacing,
}

impl BrandfolderClient {
    pub fn new(credentials: &AssetStoreCredentials, min_interval: Duration) -> Result<Self, StoreError> {
        Ok(Self {
            http_client: build_http_client()?,
            base_url: BRANDFOLDER_BASE_URL.to_string(),
            api_key: credentials.api_key.clone(),
            spacing: CallSpacing::new(min_interval),
        })
    }

    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        self.spacing.wait().await;
        request.bearer_auth(&self.api_key)
    }
}

/// Same name, with or without the extension, ignoring case
fn name_matches(name: &str, filename: &str) -> bool {
    let stem = filename.rsplit_once('.').map_or(filename, |(stem, _)| stem);
    name.eq_ignore_ascii_case(filename) || name.eq_ignore_ascii_case(stem)
}

/// Brandfolder reports a source it could not fetch as a client error
fn is_fetch_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("404") || lower.contains("not found")
}

#[async_trait::async_trait]
impl AssetStore for BrandfolderClient {
    async fn create_from_url(
        &self,
        source_url: &str,
        filename: &str,
        collection_id: &str,
        section_key: &str,
    ) -> Result<String, StoreError> {
        let url = format!("{}/collections/{}/assets", self.base_url, collection_id);
        let body = json!({
            "data": {
                "attributes": [{
                    "attachments": [{"filename": filename, "url": source_url}]
                }]
            },
            "section_key": section_key
        });

        tracing::debug!(url = %source_url, filename = %filename, "Creating asset from URL");
        let response = self
            .authorized(self.http_client.post(&url))
            .await
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(match status_error(status, &text) {
                StoreError::Validation(msg) | StoreError::Api { message: msg, .. }
                    if is_fetch_failure(&msg) =>
                {
                    StoreError::NotFound(msg)
                }
                other => other,
            });
        }

        let list: AssetList = serde_json::from_value(json_or_error(response).await?)
            .map_err(|e| StoreError::Parse(e.to_string()))?;
        let asset = list
            .data
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Parse("create response has no asset".to_string()))?;
        tracing::info!(asset_id = %asset.id, filename = %filename, "Asset created");
        Ok(asset.id)
    }

    async fn find_by_filename(&self, filename: &str, collection_id: &str) -> Result<Option<StoredAsset>, StoreError> {
        let url = format!("{}/collections/{}/assets", self.base_url, collection_id);
        let search = format!("filename:\"{}\"", filename);
        let per = SEARCH_PAGE_SIZE.to_string();
        let response = self
            .authorized(self.http_client.get(&url))
            .await
            .query(&[
                ("search", search.as_str()),
                ("fields", "cdn_url"),
                ("per", per.as_str()),
            ])
            .send()
            .await?;

        let list: AssetList = serde_json::from_value(json_or_error(response).await?)
            .map_err(|e| StoreError::Parse(e.to_string()))?;
        Ok(list
            .data
            .into_iter()
            .find(|asset| {
                asset
                    .attributes
                    .name
                    .as_deref()
                    .map_or(false, |name| name_matches(name, filename))
            })
            .map(|asset| StoredAsset {
                id: asset.id,
                cdn_url: asset.attributes.cdn_url,
            }))
    }

    async fn get_status(&self, asset_id: &str) -> Result<ProcessingState, StoreError> {
        let url = format!("{}/assets/{}", self.base_url, asset_id);
        let response = self
            .authorized(self.http_client.get(&url))
            .await
            .query(&[("fields", "cdn_url"), ("include", "attachments")])
            .send()
            .await?;

        let envelope: AssetEnvelope = serde_json::from_value(json_or_error(response).await?)
            .map_err(|e| StoreError::Parse(e.to_string()))?;
        Ok(match envelope.data.attributes.cdn_url {
            Some(cdn_url) if !cdn_url.is_empty() => ProcessingState::Processed {
                cdn_url: Some(cdn_url),
            },
            _ => ProcessingState::Pending,
        })
    }

    async fn find_by_attachment(&self, attachment_id: &str) -> Result<Option<HostedAsset>, StoreError> {
        let Some(asset_id) = self.attachment_asset_id(attachment_id).await? else {
            return Ok(None);
        };
        let url = format!("{}/assets/{}", self.base_url, asset_id);
        let response = self
            .authorized(self.http_client.get(&url))
            .await
            .query(&[("fields", "cdn_url"), ("include", "attachments")])
            .send()
            .await?;
        let asset: AssetWithAttachments = serde_json::from_value(json_or_error(response).await?)
            .map_err(|e| StoreError::Parse(e.to_string()))?;
        let hosted = hosted_asset(asset);
        tracing::debug!(attachment_id, asset_id = %hosted.asset_id, "Hosted attachment resolved");
        Ok(Some(hosted))
    }
}

impl BrandfolderClient {
    async fn attachment_asset_id(&self, attachment_id: &str) -> Result<Option<String>, StoreError> {
        let url = format!("{}/attachments/{}", self.base_url, attachment_id);
        let response = self
            .authorized(self.http_client.get(&url))
            .await
            .query(&[("include", "asset")])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: AttachmentEnvelope = serde_json::from_value(json_or_error(response).await?)
            .map_err(|e| StoreError::Parse(e.to_string()))?;
        Ok(envelope
            .data
            .relationships
            .asset
            .and_then(|r| r.data)
            .map(|d| d.id))
    }
}

impl std::fmt::Debug for BrandfolderClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrandfolderClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
