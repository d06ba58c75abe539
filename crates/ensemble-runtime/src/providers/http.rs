//! Shared HTTP plumbing for the built-in adapters.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use super::ProviderError;

/// Build a client. Per-request timeouts come from `GenerationParams`.
pub(crate) fn build_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| ProviderError::NotConfigured(format!("failed to build HTTP client: {}", e)))
}

pub(crate) fn validate_base_url(config: &serde_json::Value, key: &str) -> Result<(), ProviderError> {
    if let Some(url) = config[key].as_str() {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ProviderError::NotConfigured(format!(
                "{} must start with http:// or https://",
                key
            )));
        }
    }
    Ok(())
}

/// Map a reqwest send failure.
pub(crate) fn send_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Transport(err.to_string())
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-success status onto the error taxonomy.
pub(crate) fn status_error(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: String,
    timeout: Duration,
) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::Auth(body),
        408 => ProviderError::Timeout(timeout),
        429 => ProviderError::RateLimited { retry_after },
        s if s >= 500 => ProviderError::Transport(format!("HTTP {}: {}", s, body)),
        s => ProviderError::InvalidRequest {
            status: s,
            message: body,
        },
    }
}

/// Check the status and decode a JSON body. Undecodable bodies are
/// transport errors; the next attempt may get a clean one.
pub(crate) async fn decode<T: DeserializeOwned>(
    response: Response,
    timeout: Duration,
) -> Result<T, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let retry_after = retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        return Err(status_error(status, retry_after, truncate(body), timeout));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| send_error_or_body(e, timeout))
}

fn send_error_or_body(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Transport(format!("malformed response body: {}", err))
    }
}

fn truncate(mut body: String) -> String {
    const MAX: usize = 512;
    if body.len() > MAX {
        let mut cut = MAX;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
