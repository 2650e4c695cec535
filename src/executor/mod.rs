//! Retrying, cancellable HTTP execution shared by every provider adapter.
//!
//! [`RequestExecutor`] owns the retry loop: it re-sends a prepared request while the
//! transport fails or the response status is in the policy's retryable set, sleeping
//! an exponentially growing, jittered delay in between. Non-retryable responses are
//! handed back untouched; interpreting their bodies is the job of
//! [`crate::classify`].

mod policy;
mod retry_after;

use std::collections::HashMap;
use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{CancelStage, LLMError, ProviderError, RateLimitError};
use crate::http::{DynHttpTransport, HttpRequest, HttpResponse, HttpStreamResponse};

pub use policy::{JITTER_RANGE, RETRYABLE_STATUS_CODES, RetryPolicy, default_retry_policy};
pub use retry_after::parse_retry_after;
pub(crate) use retry_after::retry_after_from_headers;

/// Status and headers of an attempt, whichever body shape it carries.
trait AttemptResponse: Send {
    fn status(&self) -> u16;
    fn headers(&self) -> &HashMap<String, String>;
}

impl AttemptResponse for HttpResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }
}

impl AttemptResponse for HttpStreamResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }
}

/// Executes requests against a shared transport under a [`RetryPolicy`].
///
/// The executor holds no per-call state and can be shared by concurrent calls.
#[derive(Clone)]
pub struct RequestExecutor {
    provider: String,
    transport: DynHttpTransport,
    policy: RetryPolicy,
}

impl RequestExecutor {
    pub fn new(provider: impl Into<String>, transport: DynHttpTransport, policy: RetryPolicy) -> Self {
        Self {
            provider: provider.into(),
            transport,
            policy,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &DynHttpTransport {
        &self.transport
    }

    /// Sends `request` and buffers the response body.
    ///
    /// Returns the first response whose status is not retryable, whether it is a
    /// success or not.
    ///
    /// # Errors
    ///
    /// - [`LLMError::Cancelled`] when `cancel` fires before an attempt, while waiting on
    ///   the network, or during backoff.
    /// - [`LLMError::RetriesExhausted`] wrapping the last failure once every attempt was
    ///   used.
    /// - Non-retryable transport errors (e.g. an invalid header) immediately.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        request: HttpRequest,
    ) -> Result<HttpResponse, LLMError> {
        self.run(cancel, request, |request| self.transport.send(request))
            .await
    }

    /// Same retry loop as [`RequestExecutor::execute`], returning the body as a stream.
    ///
    /// Retryable responses have their bodies dropped unread before the next attempt.
    pub async fn execute_stream(
        &self,
        cancel: &CancellationToken,
        request: HttpRequest,
    ) -> Result<HttpStreamResponse, LLMError> {
        self.run(cancel, request, |request| self.transport.send_stream(request))
            .await
    }

    /// Releases idle pooled connections; in-flight calls are left alone.
    pub fn close(&self) {
        self.transport.close_idle_connections();
    }

    async fn run<R, F, Fut>(
        &self,
        cancel: &CancellationToken,
        request: HttpRequest,
        send: F,
    ) -> Result<R, LLMError>
    where
        R: AttemptResponse,
        F: Fn(HttpRequest) -> Fut,
        Fut: Future<Output = Result<R, LLMError>>,
    {
        let max_retries = self.policy.max_retries();
        let mut pending: Option<LLMError> = None;

        for attempt in 0..=max_retries {
            if cancel.is_cancelled() {
                return Err(LLMError::cancelled(CancelStage::BeforeRequest));
            }
            if attempt > 0 {
                tracing::debug!(
                    provider = %self.provider,
                    attempt,
                    max_retries,
                    method = request.method.as_str(),
                    url = %request.url,
                    "retrying request"
                );
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(LLMError::cancelled(CancelStage::InFlight));
                }
                outcome = send(request.clone()) => outcome,
            };

            match outcome {
                Ok(response) if !self.policy.is_retryable(response.status()) => {
                    return Ok(response);
                }
                Ok(response) => {
                    pending = Some(self.status_failure(&response));
                    drop(response);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    tracing::error!(provider = %self.provider, error = %err, "request failed");
                    pending = Some(err);
                }
            }

            if attempt < max_retries {
                let delay = self.policy.backoff_for_attempt(attempt);
                tracing::debug!(provider = %self.provider, ?delay, "backing off before retry");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(LLMError::cancelled(CancelStage::Backoff));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        tracing::error!(
            provider = %self.provider,
            retries = max_retries,
            "request failed after exhausting retries"
        );
        let last = pending.unwrap_or_else(|| {
            LLMError::provider(self.provider.clone(), None, "no attempt was made")
        });
        Err(LLMError::RetriesExhausted {
            retries: max_retries,
            source: Box::new(last),
        })
    }

    fn status_failure(&self, response: &impl AttemptResponse) -> LLMError {
        let status = response.status();
        if status == 429 {
            let retry_after = retry_after_from_headers(response.headers());
            tracing::warn!(
                provider = %self.provider,
                retry_after = retry_after.unwrap_or(0),
                "rate limited by provider"
            );
            return LLMError::RateLimited(RateLimitError {
                provider: self.provider.clone(),
                retry_after,
                ..RateLimitError::default()
            });
        }
        LLMError::Provider(
            ProviderError::new(
                self.provider.clone(),
                None,
                format!("request failed with status {status}"),
            )
            .with_status(status),
        )
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("provider", &self.provider)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
