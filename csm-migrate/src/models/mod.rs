//! Data models for csm-migrate
//!
//! - Content tree parsed from the input document
//! - Asset URL classification

pub mod asset_url;
pub mod content_node;

pub use asset_url::{mime_type_for, parse_asset_url, AssetUrl, ALLOWED_EXTENSIONS};
pub use content_node::{AssetRef, AssetRefKind, ChildSlot, ContentNode, FieldPath, ParseOptions, PathSegment};
