//! Contentstack Content Management API client
//!
//! Implements [`ContentStore`] over the v3 REST API. Management calls carry the
//! stack API key plus management token; the approval stage and bulk publish
//! need a user auth token instead.

use crate::error::StoreError;
use crate::services::http::{build_http_client, json_or_error};
use crate::services::rate_limit::CallSpacing;
use crate::types::ContentStore;
use csm_common::config::ContentStoreCredentials;
use csm_common::Locale;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const BULK_API_VERSION: &str = "3.2";
const SEARCH_LIMIT: u32 = 10;

#[derive(Debug, Deserialize)]
struct EntryEnvelope {
    entry: Value,
}

#[derive(Debug, Deserialize)]
struct EntriesEnvelope {
    #[serde(default)]
    entries: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ReferencesEnvelope {
    #[serde(default)]
    references: Vec<ReferenceItem>,
}

#[derive(Debug, Deserialize)]
struct ReferenceItem {
    entry_uid: Option<String>,
    uid: Option<String>,
}

/// Which credential authorizes a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    Management,
    User,
}

/// Contentstack API client
pub struct ContentstackClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    management_token: String,
    auth_token: Option<String>,
    approved_stage_uid: String,
    spacing: CallSpacing,
}

impl ContentstackClient {
    pub fn new(
        credentials: &ContentStoreCredentials,
        approved_stage_uid: &str,
        min_interval: Duration,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            http_client: build_http_client()?,
            base_url: credentials.base_url.trim_end_matches('/').to_string(),
            api_key: credentials.api_key.clone(),
            management_token: credentials.management_token.clone(),
            auth_token: credentials.auth_token.clone(),
            approved_stage_uid: approved_stage_uid.to_string(),
            spacing: CallSpacing::new(min_interval),
        })
    }

    fn entries_url(&self, content_type: &str) -> String {
        format!("{}/content_types/{}/entries", self.base_url, content_type)
    }

    fn entry_url(&self, content_type: &str, uid: &str) -> String {
        format!("{}/{}", self.entries_url(content_type), uid)
    }

    fn headers(&self, auth: Auth) -> Result<HeaderMap, StoreError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        insert_header(&mut headers, "api_key", &self.api_key)?;
        match auth {
            Auth::Management => {
                insert_header(&mut headers, "authorization", &self.management_token)?;
            }
            Auth::User => {
                let token = self.auth_token.as_deref().ok_or_else(|| {
                    StoreError::Rejected(
                        "CONTENTSTACK_AUTH_TOKEN is required for approval and publishing".to_string(),
                    )
                })?;
                insert_header(&mut headers, "authtoken", token)?;
            }
        }
        Ok(headers)
    }

    async fn request(&self, method: Method, url: &str, auth: Auth) -> Result<RequestBuilder, StoreError> {
        self.spacing.wait().await;
        Ok(self.http_client.request(method, url).headers(self.headers(auth)?))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, StoreError> {
        let response = request.send().await?;
        json_or_error(response).await
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<(), StoreError> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| StoreError::Validation(format!("header {} contains invalid characters", name)))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

fn parse<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|e| StoreError::Parse(e.to_string()))
}

/// Bulk publish payload
pub fn bulk_publish_body(
    content_type: &str,
    uid: &str,
    environment_ids: &[String],
    locale: Locale,
    deep: bool,
) -> Value {
    json!({
        "entries": [{
            "uid": uid,
            "content_type": content_type,
            "locale": locale.as_str(),
            "version": 1
        }],
        "locales": [locale.as_str()],
        "environments": environment_ids,
        "rules": {"approvals": true},
        "publish_with_reference": deep,
        "skip_workflow_stage_check": true
    })
}

fn unpublish_body(environment_ids: &[String], locale: Locale) -> Value {
    json!({
        "entry": {
            "locales": [locale.as_str()],
            "environments": environment_ids
        }
    })
}

#[async_trait::async_trait]
impl ContentStore for ContentstackClient {
    async fn create_entry(&self, content_type: &str, fields: &Value, locale: Locale) -> Result<String, StoreError> {
        tracing::debug!(content_type = %content_type, "Creating entry");
        let request = self
            .request(Method::POST, &self.entries_url(content_type), Auth::Management)
            .await?
            .query(&[("locale", locale.as_str())])
            .json(&json!({ "entry": fields }));

        let envelope: EntryEnvelope = parse(self.send(request).await?)?;
        let uid = envelope
            .entry
            .get("uid")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Parse("created entry has no uid".to_string()))?;
        tracing::info!(content_type = %content_type, uid = %uid, "Created entry");
        Ok(uid.to_string())
    }

    async fn get_entry(&self, content_type: &str, uid: &str, locale: Locale) -> Result<Value, StoreError> {
        let request = self
            .request(Method::GET, &self.entry_url(content_type, uid), Auth::Management)
            .await?
            .query(&[("locale", locale.as_str())]);
        let envelope: EntryEnvelope = parse(self.send(request).await?)?;
        Ok(envelope.entry)
    }

    async fn update_entry(
        &self,
        content_type: &str,
        uid: &str,
        fields: &Value,
        locale: Locale,
    ) -> Result<(), StoreError> {
        let request = self
            .request(Method::PUT, &self.entry_url(content_type, uid), Auth::Management)
            .await?
            .query(&[("locale", locale.as_str())])
            .json(&json!({ "entry": fields }));
        self.send(request).await?;
        tracing::debug!(content_type = %content_type, uid = %uid, "Updated entry");
        Ok(())
    }

    async fn delete_entry(&self, content_type: &str, uid: &str, locale: Locale) -> Result<bool, StoreError> {
        let response = self
            .request(Method::DELETE, &self.entry_url(content_type, uid), Auth::Management)
            .await?
            .query(&[("locale", locale.as_str())])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(content_type = %content_type, uid = %uid, "Entry already absent");
            return Ok(false);
        }
        json_or_error(response).await?;
        tracing::info!(content_type = %content_type, uid = %uid, "Deleted entry");
        Ok(true)
    }

    async fn find_entries(&self, content_type: &str, query: &Value, locale: Locale) -> Result<Vec<Value>, StoreError> {
        let limit = SEARCH_LIMIT.to_string();
        let query = query.to_string();
        let request = self
            .request(Method::GET, &self.entries_url(content_type), Auth::Management)
            .await?
            .query(&[
                ("locale", locale.as_str()),
                ("query", query.as_str()),
                ("limit", limit.as_str()),
            ]);
        let envelope: EntriesEnvelope = parse(self.send(request).await?)?;
        Ok(envelope.entries)
    }

    async fn set_workflow_stage(
        &self,
        content_type: &str,
        uid: &str,
        stage_uid: &str,
        locale: Locale,
    ) -> Result<(), StoreError> {
        let auth = if stage_uid == self.approved_stage_uid {
            Auth::User
        } else {
            Auth::Management
        };
        let url = format!("{}/workflow", self.entry_url(content_type, uid));
        let request = self
            .request(Method::POST, &url, auth)
            .await?
            .query(&[("locale", locale.as_str())])
            .json(&json!({"workflow": {"workflow_stage": {"uid": stage_uid}}}));
        self.send(request).await?;
        tracing::debug!(content_type = %content_type, uid = %uid, stage = %stage_uid, "Workflow stage set");
        Ok(())
    }

    async fn publish(
        &self,
        content_type: &str,
        uid: &str,
        environment_ids: &[String],
        locale: Locale,
        deep: bool,
    ) -> Result<(), StoreError> {
        let url = format!("{}/bulk/publish", self.base_url);
        let request = self
            .request(Method::POST, &url, Auth::User)
            .await?
            .header("api_version", BULK_API_VERSION)
            .query(&[
                ("x-bulk-action", "publish"),
                ("approvals", "true"),
                ("skip_workflow_stage_check", "true"),
            ])
            .json(&bulk_publish_body(content_type, uid, environment_ids, locale, deep));
        self.send(request).await?;
        tracing::info!(
            content_type = %content_type,
            uid = %uid,
            environments = ?environment_ids,
            deep,
            "Publish requested"
        );
        Ok(())
    }

    async fn unpublish(
        &self,
        content_type: &str,
        uid: &str,
        environment_ids: &[String],
        locale: Locale,
    ) -> Result<(), StoreError> {
        let auth = if self.auth_token.is_some() {
            Auth::User
        } else {
            Auth::Management
        };
        let url = format!("{}/unpublish", self.entry_url(content_type, uid));
        let request = self
            .request(Method::POST, &url, auth)
            .await?
            .query(&[("locale", locale.as_str())])
            .json(&unpublish_body(environment_ids, locale));
        self.send(request).await?;
        tracing::info!(content_type = %content_type, uid = %uid, environments = ?environment_ids, "Unpublished entry");
        Ok(())
    }

    async fn clear_workflow(&self, content_type: &str, uid: &str, locale: Locale) -> Result<(), StoreError> {
        let url = format!("{}/workflow", self.entry_url(content_type, uid));
        let request = self
            .request(Method::DELETE, &url, Auth::Management)
            .await?
            .query(&[("locale", locale.as_str())]);
        self.send(request).await?;
        tracing::debug!(content_type = %content_type, uid = %uid, "Workflow cleared");
        Ok(())
    }

    async fn referencing_entries(&self, content_type: &str, uid: &str, locale: Locale) -> Result<Vec<String>, StoreError> {
        let url = format!("{}/references", self.entry_url(content_type, uid));
        let request = self
            .request(Method::GET, &url, Auth::Management)
            .await?
            .query(&[("locale", locale.as_str())]);
        let envelope: ReferencesEnvelope = parse(self.send(request).await?)?;
        Ok(envelope
            .references
            .into_iter()
            .filter_map(|r| r.entry_uid.or(r.uid))
            .collect())
    }
}
