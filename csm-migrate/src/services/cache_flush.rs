//! Storefront cache flush after publishing

use crate::error::StoreError;
use crate::services::http::{build_http_client, status_error};
use std::time::Duration;

/// Requests `<base><page_path>` so the storefront drops its cached copy
pub struct CacheFlusher {
    http_client: reqwest::Client,
    base_url: String,
    settle: Duration,
}

impl CacheFlusher {
    /// `settle` is waited before the flush so the publish has landed
    pub fn new(base_url: &str, settle: Duration) -> Result<Self, StoreError> {
        Ok(Self {
            http_client: build_http_client()?,
            base_url: base_url.to_string(),
            settle,
        })
    }

    pub fn flush_url(&self, page_path: &str) -> String {
        format!("{}{}", self.base_url, page_path)
    }

    /// Returns the status code of the flush request
    pub async fn flush(&self, page_path: &str) -> Result<u16, StoreError> {
        tokio::time::sleep(self.settle).await;

        let url = self.flush_url(page_path);
        tracing::info!(url = %url, "Flushing storefront cache");
        let response = self.http_client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }
        Ok(status.as_u16())
    }
}
