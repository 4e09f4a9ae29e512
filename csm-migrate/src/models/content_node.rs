//! Content tree model
//!
//! An input document is one root entry whose fields may embed further entries
//! (`{"_content_type_uid": ..., "entry": {...}}`) and asset references. Parsing
//! lifts the embedded entries out into [`ChildSlot`]s and records where every
//! asset reference sits, so materialization can work bottom-up and then patch
//! identifiers back into the parent's fields.

use crate::error::{MigrateError, MigrateResult};
use crate::models::asset_url::{absolutize, extension_of, hosted_attachment_id, is_allowed_extension, is_page_link};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Key naming an embedded entry's content type
pub const NESTED_TYPE_KEY: &str = "_content_type_uid";
/// Key holding an embedded entry's fields
pub const NESTED_ENTRY_KEY: &str = "entry";

/// Fields that hold HTML with inline images
const RICH_TEXT_FIELD: &str = "rich_text_editor";
/// Fields that hold markdown with inline images
const MARKDOWN_FIELD: &str = "markdown_text";

/// Keys that mark an object as a file attachment
const ATTACHMENT_KEYS: &[&str] = &["filename", "extension", "mimetype"];

static IMG_SRC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("valid img pattern")
});

static MARKDOWN_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"!\[[^\]]*\]\(\s*([^)\s]+)[^)]*\)"#).expect("valid markdown image pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Location of a value inside an entry's fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct FieldPath(Vec<PathSegment>);

impl FieldPath {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn key(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.to_string()));
        Self(segments)
    }

    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Top-level field the path starts in
    pub fn field_name(&self) -> Option<&str> {
        match self.0.first() {
            Some(PathSegment::Key(key)) => Some(key),
            _ => None,
        }
    }

    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.0.iter().try_fold(root, |value, segment| match segment {
            PathSegment::Key(key) => value.get(key.as_str()),
            PathSegment::Index(i) => value.get(*i),
        })
    }

    pub fn get_mut<'a>(&self, root: &'a mut Value) -> Option<&'a mut Value> {
        self.0.iter().try_fold(root, |value, segment| match segment {
            PathSegment::Key(key) => value.get_mut(key.as_str()),
            PathSegment::Index(i) => value.get_mut(*i),
        })
    }

    /// Replace the value at this path; false when the path does not exist
    pub fn set(&self, root: &mut Value, replacement: Value) -> bool {
        match self.get_mut(root) {
            Some(slot) => {
                *slot = replacement;
                true
            }
            None => false,
        }
    }

    /// Insert values into the array holding this path, right after its element
    pub fn insert_after(&self, root: &mut Value, values: Vec<Value>) -> bool {
        let Some((PathSegment::Index(i), parent)) = self.0.split_last() else {
            return false;
        };
        match FieldPath(parent.to_vec()).get_mut(root) {
            Some(Value::Array(items)) if *i < items.len() => {
                items.splice(i + 1..i + 1, values);
                true
            }
            _ => false,
        }
    }

    /// Remove the value at this path: arrays drop the element, objects the key
    pub fn remove(&self, root: &mut Value) -> Option<Value> {
        let (last, parent) = self.0.split_last()?;
        let container = FieldPath(parent.to_vec()).get_mut(root)?;
        match (last, container) {
            (PathSegment::Key(key), Value::Object(map)) => map.remove(key),
            (PathSegment::Index(i), Value::Array(items)) if *i < items.len() => Some(items.remove(*i)),
            _ => None,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if n == 0 => write!(f, "{}", key)?,
                PathSegment::Key(key) => write!(f, ".{}", key)?,
                PathSegment::Index(i) => write!(f, "[{}]", i)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetRefKind {
    /// Attachment object replaced wholesale by the stored asset reference
    Attachment,
    /// `<img src>` inside rich text
    InlineHtml,
    /// `![alt](url)` inside markdown
    InlineMarkdown,
}

/// A reference from an entry's own fields to a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    pub path: FieldPath,
    /// Absolute source URL
    pub url: String,
    /// URL text as written in the document
    pub raw_url: String,
    pub kind: AssetRefKind,
}

/// An embedded entry and where its reference goes in the parent
#[derive(Debug, Clone, PartialEq)]
pub struct ChildSlot {
    pub slot: FieldPath,
    pub node: ContentNode,
}

/// Parser settings
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// Base for root-relative asset URLs
    pub source_site_base_url: Option<String>,
}

/// One entry to create, with its embedded entries lifted out
#[derive(Debug, Clone, PartialEq)]
pub struct ContentNode {
    pub content_type: String,
    /// Entry fields; every child slot holds the reference stub
    /// (`{"_content_type_uid": ...}`) that receives the child's uid
    pub fields: Value,
    pub children: Vec<ChildSlot>,
    pub asset_refs: Vec<AssetRef>,
}

impl ContentNode {
    /// Parse an exported document: `{"entry": {...}}`
    pub fn from_document(
        document: &Value,
        root_content_type: &str,
        options: &ParseOptions,
    ) -> MigrateResult<Self> {
        let entry = document.get(NESTED_ENTRY_KEY).ok_or_else(|| {
            MigrateError::InvalidInput("document has no top-level \"entry\" object".to_string())
        })?;
        Self::parse(root_content_type, entry, options)
    }

    /// Parse one entry's fields
    pub fn parse(content_type: &str, entry: &Value, options: &ParseOptions) -> MigrateResult<Self> {
        if content_type.trim().is_empty() {
            return Err(MigrateError::InvalidInput(
                "entry has an empty content type".to_string(),
            ));
        }
        let mut fields = match entry {
            Value::Object(map) => map.clone(),
            other => {
                return Err(MigrateError::InvalidInput(format!(
                    "{} entry must be an object, got {}",
                    content_type,
                    json_kind(other)
                )))
            }
        };
        // Source-site URL of the entry itself; the content store assigns its own
        fields.remove("url");

        let mut node = ContentNode {
            content_type: content_type.to_string(),
            fields: Value::Null,
            children: Vec::new(),
            asset_refs: Vec::new(),
        };
        let mut root = Value::Object(fields);
        node.walk(&mut root, FieldPath::new(), options)?;
        node.fields = root;
        Ok(node)
    }

    pub fn title(&self) -> Option<&str> {
        self.fields
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// String value of a top-level field
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Nodes in this subtree, including this one
    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(|c| c.node.node_count())
            .sum::<usize>()
    }

    fn walk(&mut self, value: &mut Value, path: FieldPath, options: &ParseOptions) -> MigrateResult<()> {
        match value {
            Value::Object(map) => {
                if let Some(content_type) = nested_content_type(map) {
                    let entry = map.remove(NESTED_ENTRY_KEY).unwrap_or(Value::Null);
                    let child = ContentNode::parse(&content_type, &entry, options).map_err(|e| {
                        MigrateError::InvalidInput(format!("at {}: {}", path, e))
                    })?;
                    self.children.push(ChildSlot { slot: path, node: child });
                    return Ok(());
                }

                if let Some((raw, url)) = attachment_url(map, options) {
                    self.asset_refs.push(AssetRef {
                        path,
                        url,
                        raw_url: raw,
                        kind: AssetRefKind::Attachment,
                    });
                    return Ok(());
                }

                for (key, child) in map.iter_mut() {
                    let child_path = path.key(key);
                    match (key.as_str(), child) {
                        (RICH_TEXT_FIELD, Value::String(text)) => {
                            self.inline_refs(text, &IMG_SRC, child_path, AssetRefKind::InlineHtml, options)
                        }
                        (MARKDOWN_FIELD, Value::String(text)) => self.inline_refs(
                            text,
                            &MARKDOWN_IMAGE,
                            child_path,
                            AssetRefKind::InlineMarkdown,
                            options,
                        ),
                        (_, child) => self.walk(child, child_path, options)?,
                    }
                }
                Ok(())
            }
            Value::Array(items) => {
                for (i, item) in items.iter_mut().enumerate() {
                    self.walk(item, path.index(i), options)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn inline_refs(
        &mut self,
        text: &str,
        pattern: &Regex,
        path: FieldPath,
        kind: AssetRefKind,
        options: &ParseOptions,
    ) {
        for capture in pattern.captures_iter(text) {
            let Some(raw) = capture.get(1).map(|m| m.as_str()) else {
                continue;
            };
            if is_page_link(raw) {
                continue;
            }
            let url = absolutize(raw, options.source_site_base_url.as_deref());
            if !is_file_url(&url) {
                continue;
            }
            let already = self
                .asset_refs
                .iter()
                .any(|r| r.path == path && r.raw_url == raw);
            if !already {
                self.asset_refs.push(AssetRef {
                    path: path.clone(),
                    url,
                    raw_url: raw.to_string(),
                    kind,
                });
            }
        }
    }
}

/// Rewrite inline image URLs in rich text or markdown
///
/// Only the URL span of each image match changes, and only when the URL as
/// written has an entry in `replacements`.
pub fn rewrite_inline_urls(text: &str, kind: AssetRefKind, replacements: &HashMap<&str, &str>) -> String {
    let pattern: &Regex = match kind {
        AssetRefKind::InlineHtml => &IMG_SRC,
        AssetRefKind::InlineMarkdown => &MARKDOWN_IMAGE,
        AssetRefKind::Attachment => return text.to_string(),
    };
    pattern
        .replace_all(text, |caps: &Captures| {
            let whole = &caps[0];
            let (Some(matched), Some(url)) = (caps.get(0), caps.get(1)) else {
                return whole.to_string();
            };
            match replacements.get(url.as_str()) {
                Some(replacement) => {
                    let start = url.start() - matched.start();
                    let end = url.end() - matched.start();
                    format!("{}{}{}", &whole[..start], replacement, &whole[end..])
                }
                None => whole.to_string(),
            }
        })
        .into_owned()
}

/// Content type of an embedded entry object
fn nested_content_type(map: &Map<String, Value>) -> Option<String> {
    let content_type = map.get(NESTED_TYPE_KEY)?.as_str()?;
    if map.get(NESTED_ENTRY_KEY).map_or(false, Value::is_object) {
        Some(content_type.to_string())
    } else {
        None
    }
}

/// `(raw, absolute)` URL of an attachment object
fn attachment_url(map: &Map<String, Value>, options: &ParseOptions) -> Option<(String, String)> {
    let raw = map.get("url")?.as_str()?;
    if is_page_link(raw) {
        return None;
    }
    let url = absolutize(raw, options.source_site_base_url.as_deref());
    let looks_like_file = ATTACHMENT_KEYS.iter().any(|k| map.contains_key(*k)) || is_file_url(&url);
    looks_like_file.then(|| (raw.to_string(), url))
}

/// Allow-listed file, or a file already on the asset store's CDN
fn is_file_url(url: &str) -> bool {
    extension_of(url).map_or(false, |ext| is_allowed_extension(&ext)) || hosted_attachment_id(url).is_some()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(doc: Value) -> ContentNode {
        ContentNode::from_document(&doc, "feature_page", &ParseOptions::default()).unwrap()
    }

    #[test]
    fn test_nested_entries_become_child_slots() {
        let node = parse(json!({
            "entry": {
                "title": "Spring Sale",
                "url": "/spring-sale",
                "page_id": "spring-sale",
                "sections": [
                    {"_content_type_uid": "hero_banner", "entry": {"title": "Hero"}},
                    {"_content_type_uid": "content_divider", "entry": {}}
                ]
            }
        }));

        assert_eq!(node.content_type, "feature_page");
        assert_eq!(node.title(), Some("Spring Sale"));
        assert!(node.fields.get("url").is_none());
        assert_eq!(node.children.len(), 2);
        assert_eq!(node.children[0].slot.to_string(), "sections[0]");
        assert_eq!(node.children[0].node.content_type, "hero_banner");
        assert_eq!(node.node_count(), 3);

        // The slot keeps the reference stub without the embedded entry
        let stub = node.children[1].slot.get(&node.fields).unwrap();
        assert_eq!(stub, &json!({"_content_type_uid": "content_divider"}));
    }

    #[test]
    fn test_attachment_and_inline_asset_detection() {
        let node = ContentNode::from_document(
            &json!({
                "entry": {
                    "title": "Page",
                    "image": {"url": "/img/hero.png", "filename": "hero.png"},
                    "cta": {"title": "Shop", "url": "https://site/shop.html"},
                    "anchor": {"url": "#details"},
                    "video": {"url": "https://cdn/x/clip.mp4"},
                    "promo": {"url": "https://cdn.bfldr.com/ORG/at/abc123/promo"},
                    "body": {"rich_text_editor": "<p><img class=\"a\" src=\"https://site/a.jpg\"></p>"},
                    "notes": {"markdown_text": "![logo](https://site/logo.svg) and [link](https://site/p.pdf)"}
                }
            }),
            "feature_page",
            &ParseOptions {
                source_site_base_url: Some("https://site".to_string()),
            },
        )
        .unwrap();

        let urls: Vec<(&str, AssetRefKind)> = node
            .asset_refs
            .iter()
            .map(|r| (r.url.as_str(), r.kind))
            .collect();
        assert_eq!(urls.len(), 5, "{:?}", urls);
        assert!(urls.contains(&("https://cdn.bfldr.com/ORG/at/abc123/promo", AssetRefKind::Attachment)));
        assert!(urls.contains(&("https://site/img/hero.png", AssetRefKind::Attachment)));
        assert!(urls.contains(&("https://cdn/x/clip.mp4", AssetRefKind::Attachment)));
        assert!(urls.contains(&("https://site/a.jpg", AssetRefKind::InlineHtml)));
        assert!(urls.contains(&("https://site/logo.svg", AssetRefKind::InlineMarkdown)));

        let hero = node.asset_refs.iter().find(|r| r.url.ends_with("hero.png")).unwrap();
        assert_eq!(hero.raw_url, "/img/hero.png");
        assert_eq!(hero.path.field_name(), Some("image"));
    }

    #[test]
    fn test_assets_inside_children_belong_to_children() {
        let node = parse(json!({
            "entry": {
                "title": "Page",
                "hero": [{"_content_type_uid": "hero_banner", "entry": {
                    "title": "Hero",
                    "background": {"url": "https://site/bg.jpg"}
                }}]
            }
        }));
        assert!(node.asset_refs.is_empty());
        assert_eq!(node.children[0].node.asset_refs.len(), 1);
    }

    #[test]
    fn test_invalid_documents() {
        let opts = ParseOptions::default();
        assert!(matches!(
            ContentNode::from_document(&json!({"title": "x"}), "feature_page", &opts),
            Err(MigrateError::InvalidInput(_))
        ));
        assert!(matches!(
            ContentNode::from_document(&json!({"entry": []}), "feature_page", &opts),
            Err(MigrateError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_field_path_set_and_remove() {
        let mut value = json!({"a": [{"b": 1}, {"b": 2}, {"b": 3}], "c": {"d": true}});
        let path = FieldPath::new().key("a").index(1).key("b");
        assert_eq!(path.to_string(), "a[1].b");
        assert_eq!(path.get(&value), Some(&json!(2)));

        assert!(path.set(&mut value, json!(20)));
        assert_eq!(value["a"][1]["b"], json!(20));

        assert_eq!(FieldPath::new().key("a").index(0).remove(&mut value), Some(json!({"b": 1})));
        assert_eq!(value["a"].as_array().unwrap().len(), 2);
        assert_eq!(FieldPath::new().key("c").key("d").remove(&mut value), Some(json!(true)));
        assert_eq!(value["c"], json!({}));
        assert!(FieldPath::new().key("missing").index(3).remove(&mut value).is_none());
        assert!(!FieldPath::new().key("x").key("y").set(&mut value, json!(1)));

        let first = FieldPath::new().key("a").index(0);
        assert!(first.insert_after(&mut value, vec![json!("x"), json!("y")]));
        assert_eq!(value["a"], json!([{"b": 20}, "x", "y", {"b": 3}]));
        assert!(!FieldPath::new().key("c").insert_after(&mut value, vec![json!(1)]));
    }

    #[test]
    fn test_untitled_node() {
        let node = parse(json!({"entry": {"title": "   "}}));
        assert_eq!(node.title(), None);
    }
}
