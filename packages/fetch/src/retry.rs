//! HTTP retry helpers for transient errors.
//!
//! Every request to the GIS server goes through [`send_json`] so that
//! connection failures, timeouts, rate limiting, and server errors get
//! retried with exponential backoff (1s, 2s, 4s, ...).
//!
//! ```ignore
//! let body = retry::send_json(|| client.get(&url), 2).await?;
//! let body = retry::send_json(|| client.post(&url).json(&payload), 2).await?;
//! ```

use std::time::Duration;

use crate::FetchFailure;

/// Maximum length of the response body preview included in error logs.
const BODY_PREVIEW_LEN: usize = 300;

/// How a response status is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusClass {
    /// 2xx.
    Success,
    /// 429 and 5xx.
    Transient,
    /// Anything else, including redirects the client did not follow.
    Permanent,
}

pub(crate) fn classify(status: reqwest::StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Success
    } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StatusClass::Transient
    } else {
        StatusClass::Permanent
    }
}

/// Sends an HTTP request and parses the response body as JSON.
///
/// `build_request` is called on each attempt to build a fresh
/// [`reqwest::RequestBuilder`], since builders are consumed by `send()`.
///
/// # Errors
///
/// * [`FetchFailure::Network`] if the request still fails after
///   `max_retries` retries
/// * [`FetchFailure::Status`] for any other non-2xx status, or a 429/5xx
///   status that outlives the retries
/// * [`FetchFailure::Payload`] if the body is not JSON
#[allow(clippy::future_not_send)]
pub async fn send_json<F>(build_request: F, max_retries: u32) -> Result<serde_json::Value, FetchFailure>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let response = send_inner(&build_request, max_retries).await?;

    let url = response.url().to_string();
    let status = response.status();
    let text = response.text().await?;

    serde_json::from_str(&text).map_err(|e| {
        let preview: String = text.chars().take(BODY_PREVIEW_LEN).collect();
        log::error!(
            "JSON parse failed\n  \
             url: {url}\n  \
             status: {status}\n  \
             received: {} bytes\n  \
             parse error: {e}\n  \
             body preview: {preview}",
            text.len(),
        );
        FetchFailure::Payload {
            message: format!("response is not JSON: {e}"),
        }
    })
}

/// Core retry loop. Returns the first 2xx response.
#[allow(clippy::future_not_send)]
async fn send_inner<F>(build_request: &F, max_retries: u32) -> Result<reqwest::Response, FetchFailure>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = Duration::from_secs(1u64 << (attempt - 1).min(5));
            log::warn!("  retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) => {
                if is_transient(&e) && attempt < max_retries {
                    log::warn!("  transient error: {e}");
                    attempt += 1;
                    continue;
                }
                return Err(FetchFailure::Network(e));
            }
            Ok(response) => {
                let status = response.status();
                match classify(status) {
                    StatusClass::Success => return Ok(response),
                    StatusClass::Transient if attempt < max_retries => {
                        log::warn!("  HTTP {status} from {}", response.url());
                        attempt += 1;
                    }
                    StatusClass::Transient | StatusClass::Permanent => {
                        return Err(FetchFailure::Status {
                            status: status.as_u16(),
                        });
                    }
                }
            }
        }
    }
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
}
