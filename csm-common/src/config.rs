//! Configuration loading and per-environment credential resolution
//!
//! A run resolves its configuration exactly once into a [`ResolvedConfig`]
//! and passes that record to every component. Resolution order:
//! 1. Credentials: environment variables suffixed with the target environment
//!    (e.g. `CONTENTSTACK_API_KEY_USBC`)
//! 2. Tunables: TOML config file (`[pacing]`, `[workflow]`, `[materialize]`, `[logging]`)
//! 3. Compiled defaults (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

const DEFAULT_CONTENTSTACK_BASE_URL: &str = "https://api.contentstack.io/v3";
const DEFAULT_CONTENTSTACK_APP_URL: &str = "https://azure-na-app.contentstack.com";
const DEFAULT_PUBLISHED_PAGE_BASE_URL: &str =
    "https://web-prd.pd.gdx.cc-costco.com/consumer-web/browse/prd/homepage-usbc/f/-/";

/// Placeholder environment name the content store accepts silently but never publishes to
const PLACEHOLDER_ENVIRONMENT: &str = "production";

/// Target environment for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetEnvironment {
    #[serde(rename = "dev")]
    Dev,
    #[serde(rename = "USBC")]
    Usbc,
    #[serde(rename = "USBD")]
    Usbd,
    #[serde(rename = "CABC")]
    Cabc,
    #[serde(rename = "CABD")]
    Cabd,
}

impl TargetEnvironment {
    pub const ALL: [TargetEnvironment; 5] = [
        TargetEnvironment::Dev,
        TargetEnvironment::Usbc,
        TargetEnvironment::Usbd,
        TargetEnvironment::Cabc,
        TargetEnvironment::Cabd,
    ];

    /// Name used as the environment-variable suffix and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetEnvironment::Dev => "dev",
            TargetEnvironment::Usbc => "USBC",
            TargetEnvironment::Usbd => "USBD",
            TargetEnvironment::Cabc => "CABC",
            TargetEnvironment::Cabd => "CABD",
        }
    }

    /// Locale used for every content-store call in this environment
    pub fn locale(&self) -> Locale {
        match self {
            TargetEnvironment::Cabc | TargetEnvironment::Cabd => Locale::EnCa,
            _ => Locale::EnUs,
        }
    }
}

impl fmt::Display for TargetEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetEnvironment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        TargetEnvironment::ALL
            .into_iter()
            .find(|env| env.as_str() == s)
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "unknown environment '{}' (expected one of: dev, USBC, USBD, CABC, CABD)",
                    s
                ))
            })
    }
}

/// Content-store locale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locale {
    #[serde(rename = "en-us")]
    EnUs,
    #[serde(rename = "en-ca")]
    EnCa,
}

impl Locale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::EnUs => "en-us",
            Locale::EnCa => "en-ca",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TOML tunables
// ============================================================================

/// TOML configuration file structure
///
/// Every section is optional; missing keys fall back to compiled defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub pacing: PacingConfig,
    pub workflow: WorkflowConfig,
    pub materialize: MaterializeConfig,
    pub logging: LoggingConfig,
}

/// Call spacing, settle delays, retries and concurrency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Minimum spacing between content-store calls (0 disables throttling)
    pub content_store_min_interval_ms: u64,
    /// Minimum spacing between asset-store calls (0 disables throttling)
    pub asset_store_min_interval_ms: u64,
    /// Settle delay after moving an entry to the review stage
    pub review_settle_ms: u64,
    /// Settle delay after moving an entry to the approved stage
    pub approve_settle_ms: u64,
    /// Settle delay between a successful publish and the cache flush
    pub publish_settle_ms: u64,
    /// Attempts for transient (rate-limited / network) failures
    pub retry_max_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Attempts for a workflow transition the store rejects
    pub workflow_max_attempts: u32,
    pub workflow_retry_delay_ms: u64,
    /// Status polls before an uploaded asset counts as timed out
    pub asset_poll_attempts: u32,
    pub asset_poll_interval_ms: u64,
    /// Maximum concurrent store operations within one run
    pub max_concurrency: usize,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            content_store_min_interval_ms: 100,
            asset_store_min_interval_ms: 1000,
            review_settle_ms: 100,
            approve_settle_ms: 100,
            publish_settle_ms: 2000,
            retry_max_attempts: 5,
            retry_initial_delay_ms: 500,
            retry_max_delay_ms: 8000,
            workflow_max_attempts: 3,
            workflow_retry_delay_ms: 500,
            asset_poll_attempts: 10,
            asset_poll_interval_ms: 1000,
            max_concurrency: 4,
        }
    }
}

impl PacingConfig {
    /// No delays, no throttling; retries still bounded
    pub fn immediate() -> Self {
        Self {
            content_store_min_interval_ms: 0,
            asset_store_min_interval_ms: 0,
            review_settle_ms: 0,
            approve_settle_ms: 0,
            publish_settle_ms: 0,
            retry_initial_delay_ms: 0,
            retry_max_delay_ms: 0,
            workflow_retry_delay_ms: 0,
            asset_poll_interval_ms: 0,
            ..Self::default()
        }
    }
}

/// Content-store workflow stage identifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub review_stage_uid: String,
    pub approved_stage_uid: String,
    /// Content types that have no workflow attached
    pub exempt_types: Vec<String>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            review_stage_uid: "blt17e0c5c565fa65c3".to_string(),
            approved_stage_uid: "blt0915ab57da3d0af1".to_string(),
            exempt_types: vec!["content_divider".to_string()],
        }
    }
}

/// What a parent does when one of its children fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildFailurePolicy {
    /// The parent fails too (failure travels up to the root)
    #[default]
    Abort,
    /// The failed child's subtree is rolled back and its slot dropped
    Omit,
}

/// Tree materialization policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterializeConfig {
    pub child_failure_policy: ChildFailurePolicy,
    /// Treat asset failures other than not-found as fatal for the node
    pub fail_on_asset_error: bool,
    /// Root entry field holding the page path used for the published URL
    pub page_path_field: String,
    /// Content type of the document's root entry
    pub root_content_type: String,
    /// Base used to absolutize relative asset URLs (`/images/x.png`)
    pub source_site_base_url: Option<String>,
}

impl Default for MaterializeConfig {
    fn default() -> Self {
        Self {
            child_failure_policy: ChildFailurePolicy::Abort,
            fail_on_asset_error: false,
            page_path_field: "page_id".to_string(),
            root_content_type: "feature_page".to_string(),
            source_site_base_url: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Platform config file location: `<config_dir>/csm/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("csm").join("config.toml"))
}

/// Load TOML tunables
///
/// An explicitly requested file must exist and parse. When no path is given the
/// platform default is tried; a missing default file yields compiled defaults.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                warn!("No config file found, using compiled defaults");
                return Ok(TomlConfig::default());
            }
        },
    };

    let content = std::fs::read_to_string(&path)?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;
    info!("Loaded config file: {}", path.display());
    Ok(config)
}

// ============================================================================
// Resolved per-run configuration
// ============================================================================

/// Content-store credentials and URLs for one environment
#[derive(Debug, Clone, PartialEq)]
pub struct ContentStoreCredentials {
    pub api_key: String,
    pub management_token: String,
    /// User auth token, required for the approval stage and bulk publish
    pub auth_token: Option<String>,
    pub base_url: String,
    /// Publish target; never a placeholder name
    pub environment_uid: String,
    pub app_url: String,
    pub published_page_base_url: String,
    pub cache_flush_base_url: Option<String>,
}

/// Asset-store credentials for one environment
#[derive(Debug, Clone, PartialEq)]
pub struct AssetStoreCredentials {
    pub api_key: String,
    pub organization_id: String,
    pub section_key: String,
    pub collection_id: String,
}

/// Read-only configuration record for a single run
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub environment: TargetEnvironment,
    pub locale: Locale,
    pub content_store: ContentStoreCredentials,
    pub asset_store: AssetStoreCredentials,
    pub entry_reuse_enabled: bool,
    pub handle_duplicate_page_id: bool,
    pub pacing: PacingConfig,
    pub workflow: WorkflowConfig,
    pub materialize: MaterializeConfig,
    pub logging: LoggingConfig,
}

/// Resolves a [`ResolvedConfig`] for one target environment
pub struct ConfigResolver {
    environment: TargetEnvironment,
    toml: TomlConfig,
}

impl ConfigResolver {
    pub fn new(environment: TargetEnvironment) -> Self {
        Self {
            environment,
            toml: TomlConfig::default(),
        }
    }

    pub fn with_toml(mut self, toml: TomlConfig) -> Self {
        self.toml = toml;
        self
    }

    /// Resolve from the process environment
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Resolve using an arbitrary variable lookup
    pub fn resolve_with<F>(&self, lookup: F) -> Result<ResolvedConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = self.environment.as_str();
        let get = |prefix: &str| -> Option<String> {
            lookup(&format!("{}_{}", prefix, env)).filter(|v| is_valid_value(v))
        };
        let mut missing = Vec::new();
        let mut require = |prefix: &str| -> String {
            get(prefix).unwrap_or_else(|| {
                missing.push(format!("{}_{}", prefix, env));
                String::new()
            })
        };

        let api_key = require("CONTENTSTACK_API_KEY");
        let management_token = require("CONTENTSTACK_MANAGEMENT_TOKEN");
        let environment_uid = require("CONTENTSTACK_ENVIRONMENT_UID");
        let bf_api_key = require("BRANDFOLDER_API_KEY");
        let organization_id = require("BRANDFOLDER_ORGANIZATION_ID");
        let collection_id = require("BRANDFOLDER_COLLECTION_ID");

        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "Missing required settings for environment {}: {}",
                env,
                missing.join(", ")
            )));
        }

        if environment_uid == PLACEHOLDER_ENVIRONMENT {
            return Err(Error::Config(format!(
                "CONTENTSTACK_ENVIRONMENT_UID_{} must be the environment UID, not '{}'",
                env, PLACEHOLDER_ENVIRONMENT
            )));
        }

        let content_store = ContentStoreCredentials {
            api_key,
            management_token,
            auth_token: lookup("CONTENTSTACK_AUTH_TOKEN").filter(|v| is_valid_value(v)),
            base_url: get("CONTENTSTACK_BASE_URL")
                .unwrap_or_else(|| DEFAULT_CONTENTSTACK_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            environment_uid,
            app_url: get("CONTENTSTACK_APP_URL")
                .unwrap_or_else(|| DEFAULT_CONTENTSTACK_APP_URL.to_string()),
            published_page_base_url: get("PUBLISHED_PAGE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_PUBLISHED_PAGE_BASE_URL.to_string()),
            cache_flush_base_url: get("CACHE_FLUSH_BASE_URL"),
        };

        let asset_store = AssetStoreCredentials {
            api_key: bf_api_key,
            organization_id,
            section_key: get("BRANDFOLDER_SECTION_KEY").unwrap_or_default(),
            collection_id,
        };

        let entry_reuse_enabled = lookup("ENTRY_REUSE_ENABLED")
            .map(|v| !v.trim().eq_ignore_ascii_case("false"))
            .unwrap_or(true);
        let handle_duplicate_page_id = lookup("HANDLE_DUPLICATE_PAGE_ID")
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if content_store.auth_token.is_none() {
            warn!("CONTENTSTACK_AUTH_TOKEN not set; approval and deep publish will be rejected");
        }

        info!(
            environment = %self.environment,
            locale = %self.environment.locale(),
            entry_reuse = entry_reuse_enabled,
            "Configuration resolved"
        );

        Ok(ResolvedConfig {
            environment: self.environment,
            locale: self.environment.locale(),
            content_store,
            asset_store,
            entry_reuse_enabled,
            handle_duplicate_page_id,
            pacing: self.toml.pacing.clone(),
            workflow: self.toml.workflow.clone(),
            materialize: self.toml.materialize.clone(),
            logging: self.toml.logging.clone(),
        })
    }
}

/// Non-empty, non-whitespace
pub fn is_valid_value(value: &str) -> bool {
    !value.trim().is_empty()
}
