use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Boxed, thread-safe error used as the cause of wrapped failures.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Invalid, expired or missing credentials.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("authentication failed for provider {provider:?}: {reason}")]
pub struct AuthenticationError {
    pub provider: String,
    pub reason: String,
}

/// The provider throttled the request.
///
/// `retry_after` mirrors the `Retry-After` header (in whole seconds) when the vendor sent
/// one, so callers can schedule independently of the executor's blind backoff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitError {
    pub provider: String,
    pub retry_after: Option<u64>,
    /// Which quota was hit, e.g. `requests` or `tokens`.
    pub limit_type: Option<String>,
    pub usage: Option<u64>,
    pub limit: Option<u64>,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rate limit exceeded for provider {:?}", self.provider)?;
        if let Some(seconds) = self.retry_after.filter(|s| *s > 0) {
            return write!(f, ": retry after {seconds} seconds");
        }
        if let Some(limit_type) = &self.limit_type {
            write!(f, ": {limit_type} limit reached")?;
            if let (Some(usage), Some(limit)) = (self.usage, self.limit) {
                write!(f, " ({usage}/{limit})")?;
            }
        }
        Ok(())
    }
}

impl StdError for RateLimitError {}

/// The prompt plus requested completion does not fit in the model's context window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextLengthError {
    pub provider: String,
    pub model: String,
    pub requested_tokens: Option<u64>,
    pub max_tokens: Option<u64>,
}

impl fmt::Display for ContextLengthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "context length exceeded for provider {:?} model {:?}",
            self.provider, self.model
        )?;
        if let (Some(requested), Some(max)) = (self.requested_tokens, self.max_tokens) {
            write!(f, ": {requested} tokens exceeds maximum of {max}")?;
        }
        Ok(())
    }
}

impl StdError for ContextLengthError {}

/// The requested model identifier is unknown to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidModelError {
    pub provider: String,
    pub model: String,
    pub supported_models: Vec<String>,
}

impl fmt::Display for InvalidModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid model {:?} for provider {:?}",
            self.model, self.provider
        )?;
        if !self.supported_models.is_empty() {
            write!(
                f,
                ": supported models are {}",
                self.supported_models.join(", ")
            )?;
        }
        Ok(())
    }
}

impl StdError for InvalidModelError {}

/// Streaming was requested for a provider or model that cannot stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingUnsupportedError {
    pub provider: String,
    pub model: String,
    pub reason: String,
}

impl fmt::Display for StreamingUnsupportedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "streaming not supported for provider {:?}", self.provider)?;
        if !self.model.is_empty() {
            write!(f, " model {:?}", self.model)?;
        }
        if !self.reason.is_empty() {
            write!(f, ": {}", self.reason)?;
        }
        Ok(())
    }
}

impl StdError for StreamingUnsupportedError {}

/// Transport-level failure: DNS, refused connection, timeout, broken body.
#[derive(Debug, Error)]
#[error("connection to {endpoint} failed: {cause}")]
pub struct ConnectionError {
    pub endpoint: String,
    #[source]
    pub cause: BoxError,
}

impl ConnectionError {
    pub fn new(endpoint: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self {
            endpoint: endpoint.into(),
            cause: cause.into(),
        }
    }
}

/// Vendor failure that does not fit any more specific kind.
///
/// `status` carries the HTTP status when the failure came from a response, so a caller
/// can still tell a 500 from a 400 after classification gave up.
#[derive(Debug)]
pub struct ProviderError {
    pub provider: String,
    pub model: Option<String>,
    pub status: Option<u16>,
    pub cause: BoxError,
}

impl ProviderError {
    pub fn new(
        provider: impl Into<String>,
        model: Option<String>,
        cause: impl Into<BoxError>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.filter(|m| !m.is_empty()),
            status: None,
            cause: cause.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(
                f,
                "provider {:?} (model {:?}): {}",
                self.provider, model, self.cause
            ),
            None => write!(f, "provider {:?}: {}", self.provider, self.cause),
        }
    }
}

impl StdError for ProviderError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.cause.as_ref())
    }
}

/// Point at which a call observed cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelStage {
    /// Cancelled before an attempt was issued.
    BeforeRequest,
    /// Cancelled while waiting on the network.
    InFlight,
    /// Cancelled while sleeping between attempts.
    Backoff,
    /// Cancelled while a stream was being drained.
    Streaming,
}

impl fmt::Display for CancelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CancelStage::BeforeRequest => "request cancelled",
            CancelStage::InFlight => "request cancelled in flight",
            CancelStage::Backoff => "request cancelled during backoff",
            CancelStage::Streaming => "stream cancelled",
        };
        f.write_str(text)
    }
}

/// Coarse discriminant of [`LLMError`], handy for tables and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    RateLimited,
    ContextTooLong,
    InvalidModel,
    StreamingUnsupported,
    ConnectionFailed,
    Provider,
    Cancelled,
    RetriesExhausted,
    Signing,
    Validation,
    InvalidConfig,
}

/// Aggregates every failure mode exposed by the client core.
///
/// The first seven variants form the closed classification set; each wraps its own
/// carrier type so callers match on exactly the fields relevant to that failure. The
/// remaining variants come from the executor, the signer and local validation.
#[derive(Debug, Error)]
pub enum LLMError {
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    #[error(transparent)]
    ContextTooLong(#[from] ContextLengthError),
    #[error(transparent)]
    InvalidModel(#[from] InvalidModelError),
    #[error(transparent)]
    StreamingUnsupported(#[from] StreamingUnsupportedError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// The call-scoped cancellation token fired.
    #[error("{stage}")]
    Cancelled { stage: CancelStage },
    /// Every attempt failed; `source` is the last pending error.
    #[error("request failed after {retries} retries: {source}")]
    RetriesExhausted {
        retries: u32,
        #[source]
        source: Box<LLMError>,
    },
    /// SigV4 signing could not derive the canonical request.
    #[error("failed to sign request: {message}")]
    Signing { message: String },
    /// The request payload was rejected locally before reaching the network.
    #[error("invalid request: {message}")]
    Validation { message: String },
    /// Raised when building or validating configuration fails.
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig { field: String, reason: String },
}

impl LLMError {
    /// Wraps a transport failure against `endpoint`.
    ///
    /// # Examples
    ///
    /// ```
    /// use relaycore::error::{ErrorKind, LLMError};
    ///
    /// let err = LLMError::connection("https://example.com", "dns lookup failed");
    /// assert_eq!(err.kind(), ErrorKind::ConnectionFailed);
    /// ```
    pub fn connection(endpoint: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::Connection(ConnectionError::new(endpoint, cause))
    }

    /// Creates a generic provider error with a free-text cause.
    ///
    /// # Examples
    ///
    /// ```
    /// use relaycore::error::LLMError;
    ///
    /// let err = LLMError::provider("openai", Some("gpt-4".into()), "bad JSON payload");
    /// assert!(err.to_string().contains("bad JSON payload"));
    /// ```
    pub fn provider(
        provider: impl Into<String>,
        model: Option<String>,
        cause: impl Into<BoxError>,
    ) -> Self {
        Self::Provider(ProviderError::new(provider, model, cause))
    }

    pub fn cancelled(stage: CancelStage) -> Self {
        Self::Cancelled { stage }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LLMError::Authentication(_) => ErrorKind::Authentication,
            LLMError::RateLimited(_) => ErrorKind::RateLimited,
            LLMError::ContextTooLong(_) => ErrorKind::ContextTooLong,
            LLMError::InvalidModel(_) => ErrorKind::InvalidModel,
            LLMError::StreamingUnsupported(_) => ErrorKind::StreamingUnsupported,
            LLMError::Connection(_) => ErrorKind::ConnectionFailed,
            LLMError::Provider(_) => ErrorKind::Provider,
            LLMError::Cancelled { .. } => ErrorKind::Cancelled,
            LLMError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            LLMError::Signing { .. } => ErrorKind::Signing,
            LLMError::Validation { .. } => ErrorKind::Validation,
            LLMError::InvalidConfig { .. } => ErrorKind::InvalidConfig,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LLMError::Cancelled { .. })
    }

    /// Returns `true` when repeating the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            LLMError::RateLimited(_) | LLMError::Connection(_) => true,
            LLMError::Provider(err) => matches!(err.status, Some(status) if status >= 500),
            LLMError::RetriesExhausted { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Wait suggested by the provider, if any, looking through retry wrapping.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LLMError::RateLimited(err) => err.retry_after.map(Duration::from_secs),
            LLMError::RetriesExhausted { source, .. } => source.retry_after(),
            _ => None,
        }
    }

    /// Walks the cause chain starting at the classified carrier.
    ///
    /// Classified variants yield their carrier struct first, so `downcast_ref` on the
    /// first element reaches e.g. [`ProviderError`] directly. Nested [`LLMError`]s (from
    /// retry exhaustion) are unfolded the same way.
    pub fn chain(&self) -> impl Iterator<Item = &(dyn StdError + 'static)> {
        std::iter::successors(Some(self.as_dyn()), |err| (*err).source().map(unfold))
    }

    /// `As`-style lookup of a specific error type anywhere in the chain.
    ///
    /// # Examples
    ///
    /// ```
    /// use relaycore::error::{LLMError, RateLimitError};
    ///
    /// let inner = LLMError::RateLimited(RateLimitError {
    ///     provider: "bedrock".into(),
    ///     retry_after: Some(7),
    ///     ..Default::default()
    /// });
    /// let err = LLMError::RetriesExhausted { retries: 3, source: Box::new(inner) };
    /// let found = err.find_cause::<RateLimitError>().expect("rate limit in chain");
    /// assert_eq!(found.retry_after, Some(7));
    /// ```
    pub fn find_cause<T: StdError + 'static>(&self) -> Option<&T> {
        self.chain().find_map(|err| err.downcast_ref::<T>())
    }

    fn as_dyn(&self) -> &(dyn StdError + 'static) {
        match self {
            LLMError::Authentication(err) => err,
            LLMError::RateLimited(err) => err,
            LLMError::ContextTooLong(err) => err,
            LLMError::InvalidModel(err) => err,
            LLMError::StreamingUnsupported(err) => err,
            LLMError::Connection(err) => err,
            LLMError::Provider(err) => err,
            other => other,
        }
    }
}

fn unfold<'a>(err: &'a (dyn StdError + 'static)) -> &'a (dyn StdError + 'static) {
    if let Some(inner) = err.downcast_ref::<LLMError>() {
        return inner.as_dyn();
    }
    if let Some(inner) = err.downcast_ref::<Box<LLMError>>() {
        return inner.as_dyn();
    }
    err
}
