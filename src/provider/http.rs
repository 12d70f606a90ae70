//! Shared blocking HTTP client, SSE parsing, and auth headers.

use std::sync::OnceLock;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};

use crate::error::ChatLoopError;

// Never dropped: a blocking client must not be torn down on an async thread.
static SHARED_CLIENT: OnceLock<Client> = OnceLock::new();

/// Get (or create) the shared blocking client.
///
/// Must be called off the async scheduler; the bridge only calls providers
/// from the blocking pool.
pub fn shared_client() -> Result<&'static Client, ChatLoopError> {
    if let Some(client) = SHARED_CLIENT.get() {
        return Ok(client);
    }
    let client = Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .timeout(None::<Duration>)
        .pool_max_idle_per_host(10)
        .build()?;
    Ok(SHARED_CLIENT.get_or_init(|| client))
}

/// Build default headers for a Bearer-token streaming API.
pub fn bearer_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
    if let Ok(val) = HeaderValue::from_str(&format!("Bearer {api_key}")) {
        headers.insert(AUTHORIZATION, val);
    }
    headers
}

/// One parsed SSE line.
#[derive(Debug, PartialEq, Eq)]
pub enum SseLine<'a> {
    Data(&'a str),
    Done,
    Ignored,
}

/// Classify an SSE line. Comments, blank lines and non-data fields are ignored.
pub fn parse_sse_line(line: &str) -> SseLine<'_> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Ignored;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        SseLine::Done
    } else if data.is_empty() {
        SseLine::Ignored
    } else {
        SseLine::Data(data)
    }
}

/// Map a non-success HTTP status to an error.
pub fn status_to_error(status: u16, body: &str) -> ChatLoopError {
    match status {
        401 | 403 => ChatLoopError::Authentication(body.to_string()),
        429 => ChatLoopError::RateLimited {
            retry_after_ms: extract_retry_after(body),
        },
        _ => ChatLoopError::api(status, body),
    }
}

fn extract_retry_after(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .and_then(|r| r.as_f64())
                .map(|s| (s * 1000.0) as u64)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_lines_are_classified() {
        assert_eq!(parse_sse_line("data: {\"a\":1}\n"), SseLine::Data("{\"a\":1}"));
        assert_eq!(parse_sse_line("data:{\"a\":1}"), SseLine::Data("{\"a\":1}"));
        assert_eq!(parse_sse_line("data: [DONE]\r\n"), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseLine::Ignored);
        assert_eq!(parse_sse_line("event: message"), SseLine::Ignored);
        assert_eq!(parse_sse_line(""), SseLine::Ignored);
    }

    #[test]
    fn rate_limit_body_yields_retry_after() {
        let err = status_to_error(429, r#"{"error":{"retry_after":1.5}}"#);
        assert!(matches!(
            err,
            ChatLoopError::RateLimited {
                retry_after_ms: Some(1500)
            }
        ));
        assert!(matches!(status_to_error(403, "no"), ChatLoopError::Authentication(_)));
        assert!(matches!(
            status_to_error(500, "oops"),
            ChatLoopError::Api { status: 500, .. }
        ));
    }
}
