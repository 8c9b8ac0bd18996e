//! Shared HTTP plumbing for provider clients.

use parley_core::error::ProviderError;
use parley_core::message::ImageRef;
use std::time::Duration;
use tracing::warn;

/// Build a client with a per-request timeout.
pub(crate) fn client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// Classify a transport-level failure.
pub(crate) fn send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::Network(e.to_string())
    }
}

/// Turn a non-success status into the matching [`ProviderError`].
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(
            "Invalid API key or insufficient permissions".into(),
        ));
    }

    if !(200..300).contains(&status) {
        let error_body = response.text().await.unwrap_or_default();
        warn!(provider, status, body = %error_body, "Provider returned error");
        if status == 404 {
            return Err(ProviderError::ModelNotFound(error_body));
        }
        return Err(ProviderError::ApiError {
            status_code: status,
            message: error_body,
        });
    }

    Ok(response)
}

/// Encode an image as a base64 payload, preferring bytes already in memory.
pub(crate) async fn image_base64(image: &ImageRef) -> Result<String, ProviderError> {
    use base64::Engine as _;
    let encode = |bytes: &[u8]| base64::engine::general_purpose::STANDARD.encode(bytes);
    if let Some(bytes) = image.data() {
        return Ok(encode(bytes));
    }
    let bytes = tokio::fs::read(&image.path).await.map_err(|e| {
        ProviderError::Unsupported(format!("cannot read image {}: {e}", image.path.display()))
    })?;
    Ok(encode(&bytes))
}
