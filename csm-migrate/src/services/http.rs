//! Shared HTTP plumbing for the store clients

use crate::error::StoreError;
use reqwest::{Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

const USER_AGENT: &str = concat!("csm-migrate/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 60;

pub fn build_http_client() -> Result<reqwest::Client, StoreError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
        .map_err(|e| StoreError::Network(e.to_string()))
}

/// Map a non-success status to a [`StoreError`]
pub fn status_error(status: StatusCode, body: &str) -> StoreError {
    let message = error_message(body);
    match status.as_u16() {
        429 => StoreError::RateLimited,
        400 | 422 => StoreError::Validation(message),
        404 => StoreError::NotFound(message),
        409 | 412 | 423 => StoreError::Rejected(message),
        code => StoreError::Api {
            status: code,
            message,
        },
    }
}

/// Human-readable message from an error body
///
/// Understands `{"error_message": ..., "errors": {...}}` and
/// `{"errors": [{"detail": ...}]}`; falls back to the raw body.
pub fn error_message(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };

    let mut parts = Vec::new();
    if let Some(msg) = json.get("error_message").and_then(Value::as_str) {
        parts.push(msg.to_string());
    }
    match json.get("errors") {
        Some(Value::Object(fields)) => {
            for (field, problems) in fields {
                parts.push(format!("{}: {}", field, flatten(problems)));
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(detail) = item.get("detail").and_then(Value::as_str) {
                    parts.push(detail.to_string());
                } else {
                    parts.push(flatten(item));
                }
            }
        }
        _ => {}
    }

    if parts.is_empty() {
        body.trim().to_string()
    } else {
        parts.join("; ")
    }
}

fn flatten(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(flatten).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

/// JSON body of a successful response, or the mapped error
pub async fn json_or_error(response: Response) -> Result<Value, StoreError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, &body));
    }
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| StoreError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_error(StatusCode::TOO_MANY_REQUESTS, ""), StoreError::RateLimited);
        assert!(matches!(
            status_error(StatusCode::UNPROCESSABLE_ENTITY, "{}"),
            StoreError::Validation(_)
        ));
        assert!(matches!(status_error(StatusCode::BAD_REQUEST, ""), StoreError::Validation(_)));
        assert!(matches!(status_error(StatusCode::NOT_FOUND, ""), StoreError::NotFound(_)));
        assert!(matches!(status_error(StatusCode::CONFLICT, ""), StoreError::Rejected(_)));
        assert!(matches!(status_error(StatusCode::LOCKED, ""), StoreError::Rejected(_)));
        assert_eq!(
            status_error(StatusCode::BAD_GATEWAY, "upstream"),
            StoreError::Api {
                status: 502,
                message: "upstream".into()
            }
        );
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"error_message":"Entry creation failed.","errors":{"title":["is not unique"]}}"#;
        assert_eq!(error_message(body), "Entry creation failed.; title: is not unique");

        let body = r#"{"errors":[{"detail":"Attachment could not be fetched: 404"}]}"#;
        assert_eq!(error_message(body), "Attachment could not be fetched: 404");

        assert_eq!(error_message("  plain text "), "plain text");
    }
}
