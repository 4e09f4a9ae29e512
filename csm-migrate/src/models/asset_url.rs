//! Asset URL classification
//!
//! Decides whether a URL names a migratable file, normalizes relative URLs and
//! derives the filename, extension and MIME type sent to the stores.

use crate::error::AssetError;
use url::Url;

/// File extensions the asset store accepts
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "svg", "mp4", "mov", "avi", "wmv", "flv", "mkv",
    "webm", "pdf", "vtt",
];

/// MIME type recorded on the entry's asset reference
pub fn mime_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "pdf" => "application/pdf",
        "vtt" => "text/vtt",
        _ => "application/octet-stream",
    }
}

pub fn is_allowed_extension(extension: &str) -> bool {
    let lower = extension.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&lower.as_str())
}

/// Path part of a URL-ish string, without query or fragment
fn strip_query(raw: &str) -> &str {
    let end = raw.find(['?', '#']).unwrap_or(raw.len());
    &raw[..end]
}

/// Lowercased extension of the last path segment, if any
pub fn extension_of(raw: &str) -> Option<String> {
    let path = strip_query(raw);
    let last = path.rsplit('/').next()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Links that point at pages or in-page anchors rather than files
pub fn is_page_link(raw: &str) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return true;
    }
    let lower = trimmed.to_ascii_lowercase();
    if ["mailto:", "tel:", "javascript:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return true;
    }
    matches!(extension_of(&lower).as_deref(), Some("htm") | Some("html"))
}

/// Make a source URL absolute
///
/// Protocol-relative URLs get `https:`; root-relative URLs are joined onto
/// `base` when one is configured. Anything else is returned unchanged and
/// left for [`parse_asset_url`] to reject.
pub fn absolutize(raw: &str, base: Option<&str>) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("//") {
        return format!("https:{}", trimmed);
    }
    if trimmed.starts_with('/') {
        if let Some(base) = base {
            return format!("{}{}", base.trim_end_matches('/'), trimmed);
        }
    }
    trimmed.to_string()
}

/// CDN host serving files the asset store already holds
pub const HOSTED_CDN_HOST: &str = "cdn.bfldr.com";

/// Attachment id of a URL on the asset store's own CDN
///
/// Hosted file URLs look like `https://cdn.bfldr.com/<org>/at/<id>/<file>`.
pub fn hosted_attachment_id(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    if url.host_str() != Some(HOSTED_CDN_HOST) {
        return None;
    }
    let segments: Vec<&str> = url.path_segments()?.collect();
    segments
        .windows(3)
        .find(|w| w[0] == "at" && !w[1].is_empty() && w[1].chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|w| w[1].to_string())
}

/// A validated, absolute asset URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUrl {
    pub url: Url,
    pub filename: String,
    pub extension: String,
}

impl AssetUrl {
    pub fn mime_type(&self) -> &'static str {
        mime_type_for(&self.extension)
    }
}

/// Validate a source URL before any store call
pub fn parse_asset_url(raw: &str) -> Result<AssetUrl, AssetError> {
    let invalid = |reason: &str| AssetError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid("only http and https sources can be ingested"));
    }

    let filename = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| invalid("URL has no filename"))?;

    let extension = extension_of(url.path()).ok_or_else(|| AssetError::UnsupportedType {
        url: raw.to_string(),
        extension: String::new(),
    })?;
    if !is_allowed_extension(&extension) {
        return Err(AssetError::UnsupportedType {
            url: raw.to_string(),
            extension,
        });
    }

    Ok(AssetUrl {
        url,
        filename,
        extension,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_ignores_query_and_case() {
        assert_eq!(extension_of("https://x/a/Hero.JPG?w=200"), Some("jpg".into()));
        assert_eq!(extension_of("https://x/a/file"), None);
        assert_eq!(extension_of("https://x/.hidden"), None);
        assert_eq!(extension_of("/img/logo.svg#frag"), Some("svg".into()));
    }

    #[test]
    fn test_page_links() {
        assert!(is_page_link("#top"));
        assert!(is_page_link("https://site/page.html"));
        assert!(is_page_link("/about/index.HTM?x=1"));
        assert!(is_page_link("mailto:help@example.com"));
        assert!(!is_page_link("https://site/img.png"));
        assert!(!is_page_link("https://site/shop"));
    }

    #[test]
    fn test_absolutize() {
        assert_eq!(
            absolutize("/images/a.png", Some("https://www.example.com/")),
            "https://www.example.com/images/a.png"
        );
        assert_eq!(absolutize("/images/a.png", None), "/images/a.png");
        assert_eq!(absolutize("//cdn.example.com/a.png", None), "https://cdn.example.com/a.png");
        assert_eq!(absolutize(" https://x/a.png ", None), "https://x/a.png");
    }

    #[test]
    fn test_hosted_attachment_id() {
        assert_eq!(
            hosted_attachment_id("https://cdn.bfldr.com/56O3HXZ9/at/5bk5nnkbtx9v8wsrgfjx44/promo.mp4?auto=webp"),
            Some("5bk5nnkbtx9v8wsrgfjx44".into())
        );
        assert_eq!(hosted_attachment_id("https://cdn.bfldr.com/56O3HXZ9/at/5bk5nnkbtx9v8wsrgfjx44"), None);
        assert_eq!(hosted_attachment_id("https://cdn.bfldr.com/56O3HXZ9/as/abc/promo.mp4"), None);
        assert_eq!(hosted_attachment_id("https://cdn.example.com/x/at/abc/promo.mp4"), None);
        assert_eq!(hosted_attachment_id("/at/abc/promo.mp4"), None);
    }

    #[test]
    fn test_parse_asset_url() {
        let parsed = parse_asset_url("https://cdn.example.com/media/hero.webp?v=2").unwrap();
        assert_eq!(parsed.filename, "hero.webp");
        assert_eq!(parsed.extension, "webp");
        assert_eq!(parsed.mime_type(), "image/webp");

        assert!(matches!(
            parse_asset_url("/relative/a.png"),
            Err(AssetError::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse_asset_url("ftp://host/a.png"),
            Err(AssetError::InvalidUrl { .. })
        ));
        assert!(matches!(
            parse_asset_url("https://host/archive.zip"),
            Err(AssetError::UnsupportedType { ref extension, .. }) if extension == "zip"
        ));
        assert!(matches!(
            parse_asset_url("https://host/"),
            Err(AssetError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_mime_table() {
        assert_eq!(mime_type_for("JPEG"), "image/jpeg");
        assert_eq!(mime_type_for("mov"), "video/quicktime");
        assert_eq!(mime_type_for("vtt"), "text/vtt");
        assert_eq!(mime_type_for("xyz"), "application/octet-stream");
    }
}
