use crate::config::ReliabilityConfig;
use crate::error::TransportError;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Suspension point between attempts. Swapped out in tests to observe the
/// backoff schedule without real sleeping.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(reliability: &ReliabilityConfig) -> Self {
        Self {
            max_attempts: reliability.max_attempts.max(1),
            base_backoff: Duration::from_secs(reliability.base_backoff_secs),
        }
    }

    /// Delay after the failed attempt with zero-based index `attempt`:
    /// `base * 2^attempt`, no jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 7,
            base_backoff: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Transient,
    Permanent,
}

/// 304 counts as success: the caller treats it as "unchanged".
pub fn classify_status(status: StatusCode) -> StatusClass {
    match status.as_u16() {
        200 | 206 | 304 | 404 => StatusClass::Success,
        408 | 429 | 500 | 502 | 503 | 504 => StatusClass::Transient,
        _ => StatusClass::Permanent,
    }
}

/// Connect failures and timeouts are the transport errors worth another try.
/// Anything else (bad scheme, builder failure, redirect loop) is permanent.
fn is_retryable_transport(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Issues one logical request with exponential-backoff retry over transient
/// failures.
pub struct RetryingClient {
    client: Client,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryingClient {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self::with_sleeper(client, policy, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(client: Client, policy: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            client,
            policy,
            sleeper,
        }
    }

    /// Send the request produced by `build` until it succeeds, fails
    /// permanently, or the attempt budget runs out. `build` is invoked once per
    /// attempt and may embed `change_token` for conditional semantics.
    pub async fn fetch<F>(
        &self,
        build: F,
        change_token: Option<&str>,
    ) -> Result<Response, TransportError>
    where
        F: Fn(&Client, Option<&str>) -> RequestBuilder,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..max_attempts {
            let request = build(&self.client, change_token)
                .build()
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            let url = request.url().to_string();

            match self.client.execute(request).await {
                Ok(response) => {
                    let status = response.status();
                    match classify_status(status) {
                        StatusClass::Success => {
                            if attempt > 0 {
                                tracing::info!(%url, attempt = attempt + 1, "request recovered after retries");
                            }
                            return Ok(response);
                        }
                        StatusClass::Permanent => {
                            tracing::warn!(%url, status = status.as_u16(), "non-retryable status");
                            return Err(TransportError::PermanentStatus {
                                url,
                                status: status.as_u16(),
                            });
                        }
                        StatusClass::Transient => {
                            drop(response);
                            tracing::warn!(
                                %url,
                                status = status.as_u16(),
                                attempt = attempt + 1,
                                max_attempts,
                                "transient status, retrying"
                            );
                            last_error = Some(TransportError::RetriesExhausted {
                                url,
                                status: status.as_u16(),
                                attempts: attempt + 1,
                            });
                        }
                    }
                }
                Err(err) if is_retryable_transport(&err) => {
                    tracing::warn!(
                        %url,
                        attempt = attempt + 1,
                        max_attempts,
                        error = %err,
                        "transport error, retrying"
                    );
                    last_error = Some(TransportError::Request(err));
                }
                Err(err) => {
                    tracing::warn!(%url, error = %err, "permanent transport error");
                    return Err(TransportError::Request(err));
                }
            }

            if attempt + 1 < max_attempts {
                self.sleeper.sleep(self.policy.backoff(attempt)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TransportError::InvalidRequest("retry budget allowed no attempts".into())
        }))
    }
}
