//! Error types for csm-migrate
//!
//! Three layers:
//! - [`StoreError`]: what a content-store or asset-store call reported
//! - [`AssetError`]: why a single asset could not be resolved
//! - [`MigrateError`]: why a node (or the whole run) failed
//!
//! All of them are `Clone` so a memoized asset result can be handed to every
//! node that references the same URL.

use thiserror::Error;

/// Result type for materialization operations
pub type MigrateResult<T> = std::result::Result<T, MigrateError>;

/// Failure reported by a remote store call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Store asked us to slow down (429)
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Payload rejected as invalid (400 / 422)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Target does not exist (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Store refused the operation in its current state (409 / 412 / 423)
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Any other non-success status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Transport failure (connection, timeout, TLS)
    #[error("Network error: {0}")]
    Network(String),

    /// Response body did not have the expected shape
    #[error("Parse error: {0}")]
    Parse(String),
}

impl StoreError {
    /// Worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::RateLimited | StoreError::Network(_) => true,
            StoreError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Parse(err.to_string())
        } else {
            StoreError::Network(err.to_string())
        }
    }
}

/// Why an asset reference could not be turned into a stored asset
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    /// Source URL does not resolve; the reference is dropped
    #[error("Asset not found at source: {0}")]
    NotFound(String),

    #[error("Unsupported asset type '.{extension}': {url}")]
    UnsupportedType { url: String, extension: String },

    #[error("Invalid asset URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Upload accepted but never finished processing
    #[error("Asset {asset_id} still processing after {attempts} status checks")]
    ProcessingTimeout { asset_id: String, attempts: u32 },

    #[error("Asset store error: {0}")]
    Store(StoreError),
}

/// Why a node, or the run as a whole, failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrateError {
    /// Content store rejected an entry payload
    #[error("Validation error for {content_type}: {message}")]
    Validation {
        content_type: String,
        message: String,
    },

    /// Rate limiting persisted after bounded retries
    #[error("Rate limited by {0} after retries")]
    RateLimited(String),

    #[error(transparent)]
    Asset(#[from] AssetError),

    /// Workflow transition kept being rejected
    #[error("Workflow stuck: {content_type}/{uid} did not reach {stage} after {attempts} attempts ({reason})")]
    WorkflowStuck {
        content_type: String,
        uid: String,
        stage: String,
        attempts: u32,
        reason: String,
    },

    /// Workflow transition that would move an entry backwards or skip a stage
    #[error("Invalid workflow transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Publish failed for {content_type}/{uid}: {reason}")]
    Publish {
        content_type: String,
        uid: String,
        reason: String,
    },

    #[error("Content store error: {0}")]
    Store(StoreError),

    /// A child node failed and the parent does not omit failed children
    #[error("Child at {path} failed: {reason}")]
    ChildFailed { path: String, reason: String },

    #[error("Run cancelled")]
    Cancelled,

    /// Input document could not be turned into a content tree
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MigrateError {
    /// Map a content-store failure into node context
    pub fn from_store(content_type: &str, err: StoreError) -> Self {
        match err {
            StoreError::Validation(message) => MigrateError::Validation {
                content_type: content_type.to_string(),
                message,
            },
            StoreError::RateLimited => MigrateError::RateLimited("content store".to_string()),
            other => MigrateError::Store(other),
        }
    }
}

impl From<csm_common::Error> for MigrateError {
    fn from(err: csm_common::Error) -> Self {
        match err {
            csm_common::Error::InvalidInput(msg) => MigrateError::InvalidInput(msg),
            other => MigrateError::Config(other.to_string()),
        }
    }
}
