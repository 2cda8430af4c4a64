//! Shared HTTP plumbing for remote adapters

use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::FETCH_TIMEOUT;

/// User agent sent by every adapter
pub const USER_AGENT: &str = concat!("quotabar/", env!("CARGO_PKG_VERSION"));

/// Build a client with the adapter timeout applied
pub fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Map a non-success HTTP status onto the provider error taxonomy
pub fn status_error(status: StatusCode) -> Option<ProviderError> {
    if status.is_success() {
        return None;
    }
    Some(match status.as_u16() {
        401 => ProviderError::AuthenticationRequired,
        403 => ProviderError::NetworkError(
            "forbidden (HTTP 403): the key lacks organization/admin access".to_string(),
        ),
        429 => ProviderError::NetworkError("rate limited (HTTP 429)".to_string()),
        code => ProviderError::NetworkError(format!("HTTP {code}")),
    })
}

/// Send a request and decode a JSON body, mapping status codes first
pub async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, ProviderError> {
    let response = request.send().await?;
    let status = response.status();
    if let Some(err) = status_error(status) {
        debug!("Request to {} failed with {}", response.url(), status);
        return Err(err);
    }
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(ProviderError::from)
}
