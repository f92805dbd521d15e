//! Shared HTTP plumbing for remote adapters.

use std::time::Duration;

use quill_protocol::ProviderError;
use reqwest::StatusCode;

const SNIPPET_CHARS: usize = 240;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn build_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|error| ProviderError::Unknown(format!("failed building HTTP client: {error}")))
}

/// Map a non-success status to the provider error taxonomy.
pub fn classify_status(status: StatusCode, provider: &str, body: &str) -> ProviderError {
    let message = format!("{provider}: HTTP {}: {}", status.as_u16(), snippet(body));
    match status.as_u16() {
        401 | 403 => ProviderError::Unauthorized(message),
        429 => ProviderError::RateLimited(message),
        408 | 504 => ProviderError::Timeout(message),
        500..=599 => ProviderError::Unreachable(message),
        _ => ProviderError::Unknown(message),
    }
}

/// Map a transport failure to the provider error taxonomy.
pub fn classify_transport(error: &reqwest::Error, provider: &str) -> ProviderError {
    let message = format!("{provider}: {error}");
    if error.is_timeout() {
        ProviderError::Timeout(message)
    } else if error.is_connect() || error.is_request() {
        ProviderError::Unreachable(message)
    } else if error.is_decode() || error.is_body() {
        ProviderError::MalformedResponse(message)
    } else if let Some(status) = error.status() {
        classify_status(status, provider, "")
    } else {
        ProviderError::Unknown(message)
    }
}

pub(crate) fn snippet(body: &str) -> String {
    body.chars().take(SNIPPET_CHARS).collect()
}
