//! Test Helper Utilities
//!
//! In-memory stores and fixtures shared by the csm-migrate integration tests

#![allow(dead_code)]

pub mod asset_store;
pub mod content_store;

pub use asset_store::{FakeAssetStore, CDN_BASE};
pub use content_store::{FakeContentStore, StoreCall};

use csm_common::config::{ConfigResolver, PacingConfig};
use csm_common::{ResolvedConfig, TargetEnvironment};
use csm_migrate::services::MatcherRegistry;
use csm_migrate::{MaterializationReport, MigrationRun};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const ENVIRONMENT_UID: &str = "blt-env-dev";
pub const HERO_IMAGE: &str = "https://www.example.com/images/hero.png";
pub const INLINE_IMAGE: &str = "https://www.example.com/images/inline.jpg";

/// Dev configuration with no pacing delays
pub fn test_config() -> ResolvedConfig {
    let vars: HashMap<&str, &str> = [
        ("CONTENTSTACK_API_KEY_dev", "cs-key"),
        ("CONTENTSTACK_MANAGEMENT_TOKEN_dev", "cs-token"),
        ("CONTENTSTACK_ENVIRONMENT_UID_dev", ENVIRONMENT_UID),
        ("CONTENTSTACK_AUTH_TOKEN", "auth"),
        ("BRANDFOLDER_API_KEY_dev", "bf-key"),
        ("BRANDFOLDER_ORGANIZATION_ID_dev", "org"),
        ("BRANDFOLDER_COLLECTION_ID_dev", "collection"),
        ("PUBLISHED_PAGE_BASE_URL_dev", "https://shop.example.com/f/-/"),
    ]
    .into_iter()
    .collect();

    let mut config = ConfigResolver::new(TargetEnvironment::Dev)
        .resolve_with(|name| vars.get(name).map(|v| v.to_string()))
        .expect("test config resolves");
    config.pacing = PacingConfig::immediate();
    config
}

/// A run wired to fresh in-memory stores
pub struct Harness {
    pub content: Arc<FakeContentStore>,
    pub assets: Arc<FakeAssetStore>,
    pub config: ResolvedConfig,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_stores(FakeContentStore::new(), FakeAssetStore::new())
    }

    pub fn with_stores(content: FakeContentStore, assets: FakeAssetStore) -> Self {
        Self {
            content: Arc::new(content),
            assets: Arc::new(assets),
            config: test_config(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn run(&self) -> MigrationRun {
        MigrationRun::new(
            self.config.clone(),
            self.content.clone(),
            self.assets.clone(),
            MatcherRegistry::default(),
            self.cancel.clone(),
        )
    }

    /// Parse and execute a document in a new run
    pub async fn migrate(&self, document: &Value) -> MaterializationReport {
        let run = self.run();
        let root = run.parse_document(document, None).expect("document parses");
        run.execute(&root).await
    }
}

/// Page with a hero banner (image attachment) and a text block (inline image)
pub fn sample_document() -> Value {
    json!({
        "entry": {
            "title": "Spring Sale",
            "page_id": "spring-sale",
            "url": "/spring-sale.html",
            "sections": [
                {
                    "_content_type_uid": "hero_banner",
                    "entry": {
                        "title": "Hero",
                        "image": {"url": HERO_IMAGE, "filename": "hero.png"}
                    }
                },
                {
                    "_content_type_uid": "text_block",
                    "entry": {
                        "title": "Intro",
                        "body": {
                            "rich_text_editor": format!("<p>Welcome</p><img src=\"{}\">", INLINE_IMAGE)
                        }
                    }
                }
            ]
        }
    })
}

/// Same page, with a button nested inside the text block
pub fn nested_document() -> Value {
    let mut document = sample_document();
    document["entry"]["sections"][1]["entry"]["cta"] = json!({
        "_content_type_uid": "button",
        "entry": {"title": "Shop now", "link": {"url": "/sale.html"}}
    });
    document
}

/// Page whose sections are `count` hero banners sharing one image
pub fn shared_image_document(count: usize) -> Value {
    let sections: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "_content_type_uid": "hero_banner",
                "entry": {
                    "title": format!("Hero {}", i),
                    "image": {"url": HERO_IMAGE, "filename": "hero.png"}
                }
            })
        })
        .collect();
    json!({
        "entry": {"title": "Gallery", "page_id": "gallery", "sections": sections}
    })
}
