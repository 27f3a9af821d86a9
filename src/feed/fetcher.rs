use crate::feed::parser::{parse_feed, ParsedFeed};
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;

const MAX_RETRIES: u32 = 2;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Errors that can occur while fetching and parsing one feed.
///
/// Any of these skips the feed for this run; the remaining feeds are
/// still processed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the feed timeout
    #[error("Request timed out")]
    Timeout,
    /// Feed XML could not be parsed as RSS or Atom
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Fetches and parses a single feed.
///
/// # Behavior
///
/// - The request (headers and body) must complete within `timeout`
/// - HTTP 429 and 5xx responses are retried with exponential backoff
///   (1s, 2s), up to 2 retries
/// - 4xx responses fail immediately
/// - Response bodies are limited to 10MB
///
/// # Errors
///
/// - [`FeedError::Network`] - Connection or TLS errors
/// - [`FeedError::Timeout`] - Request exceeded `timeout`
/// - [`FeedError::HttpStatus`] - Non-2xx HTTP response
/// - [`FeedError::RateLimited`] - 429 response after max retries
/// - [`FeedError::ResponseTooLarge`] - Response exceeded 10MB
/// - [`FeedError::Parse`] - Invalid RSS/Atom document
pub async fn fetch_feed(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<ParsedFeed, FeedError> {
    let mut retry_count = 0;

    let bytes = loop {
        let attempt = async {
            let response = client.get(url).send().await.map_err(FeedError::Network)?;
            let status = response.status();
            if !status.is_success() {
                return Err(FeedError::HttpStatus(status.as_u16()));
            }
            read_limited_bytes(response, MAX_FEED_SIZE).await
        };

        let result = tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| FeedError::Timeout)?;

        match result {
            Ok(bytes) => break bytes,
            Err(FeedError::HttpStatus(status)) if status == 429 || status >= 500 => {
                if retry_count >= MAX_RETRIES {
                    if status == 429 {
                        return Err(FeedError::RateLimited(MAX_RETRIES));
                    }
                    return Err(FeedError::HttpStatus(status));
                }

                let delay_secs = 1u64 << retry_count; // 1s, 2s
                tracing::warn!(
                    feed = %url,
                    status = status,
                    retry = retry_count,
                    delay_secs = delay_secs,
                    "Feed request failed, retrying after delay"
                );

                tokio::time::sleep(Duration::from_secs(delay_secs)).await;
                retry_count += 1;
            }
            Err(e) => return Err(e),
        }
    };

    parse_feed(&bytes).map_err(|e| FeedError::Parse(e.to_string()))
}

async fn read_limited_bytes(response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FeedError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FeedError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FeedError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FeedError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FeedError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}
