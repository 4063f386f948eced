#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "ollama")]
pub mod ollama;

#[cfg(any(feature = "openai", feature = "ollama"))]
use crate::utils::error::PlanweaveError;

/// Map a non-success HTTP status to the error taxonomy.
///
/// 429 becomes `RateLimited` (transient, retried with backoff) regardless
/// of backend, so retry behavior stays uniform across providers;
/// everything else is a backend error that surfaces immediately.
#[cfg(any(feature = "openai", feature = "ollama"))]
pub(crate) async fn ensure_success(
    backend: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, PlanweaveError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status.as_u16() == 429 {
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(std::time::Duration::from_secs);
        return Err(PlanweaveError::RateLimited {
            backend: backend.to_string(),
            retry_after,
        });
    }

    let body = response.text().await.unwrap_or_default();
    Err(PlanweaveError::Backend {
        backend: backend.to_string(),
        message: format!("HTTP {}: {}", status, body),
    })
}
