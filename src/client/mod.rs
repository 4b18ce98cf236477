pub mod limiter;
pub mod retry;
pub mod transport;

#[cfg(test)]
pub mod fake;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{AppError, Result};

pub use limiter::RateLimiter;
pub use retry::RetryPolicy;
pub use transport::{HttpResponse, Method, Request, ReqwestTransport, Transport};

/// HTTP client for one upstream source: its own token bucket, a shared retry
/// policy, and a hard per-attempt timeout.
pub struct RateLimitedClient {
    source: String,
    base_url: String,
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    timeout: Duration,
    attempts: AtomicU64,
}

impl RateLimitedClient {
    pub fn new(
        source: &str,
        base_url: &str,
        transport: Arc<dyn Transport>,
        limiter: RateLimiter,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            source: source.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            transport,
            limiter,
            retry,
            timeout,
            attempts: AtomicU64::new(0),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Number of upstream attempts made so far, retries included.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let request = self.build(Method::Get, endpoint, params, None);
        self.request(&request).await
    }

    pub async fn post_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let request = self.build(Method::Post, endpoint, &[], Some(body));
        self.request(&request).await
    }

    fn build(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Request {
        Request {
            method,
            url: format!("{}/{}", self.base_url, endpoint.trim_start_matches('/')),
            query: params
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            body,
        }
    }

    /// Send with rate limiting and retries.
    ///
    /// 429, 5xx, timeouts and transport failures are retried up to
    /// `max_attempts`, then surface as [`AppError::Transient`]. Any other 4xx
    /// is returned immediately as [`AppError::Permanent`].
    pub async fn request<T: DeserializeOwned>(&self, request: &Request) -> Result<T> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.limiter.acquire().await;
            self.attempts.fetch_add(1, Ordering::Relaxed);

            let err = match self.attempt_once(request).await {
                Ok(body) => return Ok(serde_json::from_str(&body)?),
                Err(e) => e,
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= max_attempts {
                warn!(
                    source = %self.source,
                    url = %request.url,
                    "[Retry] giving up after {attempt} attempts: {err}"
                );
                return Err(AppError::transient(
                    &self.source,
                    format!("{} failed after {attempt} attempts: {err}", request.url),
                ));
            }

            let delay = self.retry.delay_for(attempt);
            debug!(
                source = %self.source,
                "[Retry] {} attempt {attempt}/{max_attempts} failed ({err}), retrying in {:?}",
                request.url,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt_once(&self, request: &Request) -> Result<String> {
        let resp = match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
            Ok(r) => r?,
            Err(_) => {
                return Err(AppError::transient(
                    &self.source,
                    format!("timed out after {:?}", self.timeout),
                ))
            }
        };

        match resp.status {
            200..=299 => Ok(resp.body),
            429 => Err(AppError::transient(&self.source, "HTTP 429 rate limited")),
            500..=599 => Err(AppError::transient(
                &self.source,
                format!("HTTP {}", resp.status),
            )),
            status => Err(AppError::permanent(
                &self.source,
                status,
                truncate(&resp.body, 200),
            )),
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}
