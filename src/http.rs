//! Plumbing shared by the HTTP service clients.

use std::time::Duration;

use serde::Deserialize;

use crate::config::ServiceConfig;

const MAX_ERROR_BODY: usize = 200;

/// Client with the configured per-request timeout.
pub(crate) fn build_client(config: &ServiceConfig) -> reqwest::Client {
    client_with_timeout(config.timeout())
}

pub(crate) fn client_with_timeout(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Best-effort message from a non-2xx response.
pub(crate) async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    describe_failure(status.as_u16(), &body)
}

pub(crate) fn describe_failure(status: u16, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        return parsed.error;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("service returned HTTP {status}");
    }
    trimmed.chars().take(MAX_ERROR_BODY).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_error_field_wins() {
        assert_eq!(
            describe_failure(500, r#"{"error":"No audio file provided"}"#),
            "No audio file provided"
        );
    }

    #[test]
    fn empty_body_mentions_status() {
        assert_eq!(describe_failure(502, "  "), "service returned HTTP 502");
    }

    #[test]
    fn long_text_bodies_are_truncated() {
        let body = "x".repeat(1_000);
        assert_eq!(describe_failure(500, &body).len(), MAX_ERROR_BODY);
    }
}
