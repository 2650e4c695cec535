use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::{AuthenticationError, LLMError};
use crate::executor::{RequestExecutor, RetryPolicy, default_retry_policy};
use crate::http::{DynHttpTransport, HttpRequest};
use crate::provider::{LLMProvider, ensure_stream_success, ensure_success, validate_model};
use crate::sigv4::{SigningContext, sign};
use crate::stream::{EventStream, normalize, vendors};
use crate::types::{ChatOption, ChatOptions, Message, Response};

use super::request::build_body;
use super::types::ConverseResponse;

const PROVIDER: &str = "bedrock";

/// Claude models served through Bedrock.
pub const SUPPORTED_MODELS: &[&str] = &[
    "anthropic.claude-3-5-sonnet-20241022-v2:0",
    "anthropic.claude-3-opus-20240229-v1:0",
    "anthropic.claude-3-sonnet-20240229-v1:0",
    "anthropic.claude-3-haiku-20240307-v1:0",
    "anthropic.claude-v2",
    "anthropic.claude-instant-v1",
];

/// `https://bedrock-runtime.{region}.amazonaws.com`
pub fn runtime_endpoint(region: &str) -> String {
    format!("https://bedrock-runtime.{region}.amazonaws.com")
}

/// Bedrock converse adapter.
///
/// Every request is signed once with [`sign`] before it reaches the executor. Streams
/// are read as one JSON event per line and decoded with [`vendors::bedrock`].
#[derive(Debug, Clone)]
pub struct BedrockProvider {
    executor: RequestExecutor,
    signing: SigningContext,
    endpoint: String,
    default_model: Option<String>,
    models: Vec<String>,
}

impl BedrockProvider {
    /// Builds an adapter for `signing.region`.
    ///
    /// # Errors
    ///
    /// - [`LLMError::InvalidConfig`] when the region is empty.
    /// - [`LLMError::Authentication`] when either key is empty.
    pub fn new(transport: DynHttpTransport, signing: SigningContext) -> Result<Self, LLMError> {
        if signing.region.trim().is_empty() {
            return Err(LLMError::InvalidConfig {
                field: "region".to_string(),
                reason: "AWS region is required".to_string(),
            });
        }
        if signing.access_key_id.is_empty() || signing.secret_access_key.is_empty() {
            return Err(AuthenticationError {
                provider: PROVIDER.to_string(),
                reason: "AWS access key and secret key are required".to_string(),
            }
            .into());
        }
        Ok(Self {
            executor: RequestExecutor::new(PROVIDER, transport, default_retry_policy()),
            endpoint: runtime_endpoint(&signing.region),
            signing,
            default_model: None,
            models: SUPPORTED_MODELS.iter().map(|m| m.to_string()).collect(),
        })
    }

    /// Overrides the runtime endpoint, e.g. for a VPC endpoint or a local mock.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Model used when a call carries no [`ChatOption::Model`].
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Replaces the accepted model list; an empty list accepts any model.
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.executor = RequestExecutor::new(PROVIDER, self.executor.transport().clone(), policy);
        self
    }

    pub fn region(&self) -> &str {
        &self.signing.region
    }

    fn resolve_model(&self, options: &mut ChatOptions) -> Result<(), LLMError> {
        if options.model.is_empty() {
            options.model = self.default_model.clone().unwrap_or_default();
        }
        validate_model(PROVIDER, &options.model, &self.models)
    }

    pub(crate) fn invoke_url(&self, model: &str, stream: bool) -> String {
        let action = if stream { "converse-stream" } else { "converse" };
        format!(
            "{}/model/{}/{action}",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(model)
        )
    }

    fn signed_request(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<HttpRequest, LLMError> {
        let body = build_body(messages, options)?;
        let mut request =
            HttpRequest::post_json(self.invoke_url(&options.model, options.stream), body);
        if options.stream {
            request.set_header("Accept", "application/vnd.amazon.eventstream");
        }
        let payload = request.body_bytes().to_vec();
        sign(&mut request, &payload, Utc::now(), &self.signing)?;
        Ok(request)
    }
}

#[async_trait]
impl LLMProvider for BedrockProvider {
    async fn chat(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        options: &[ChatOption],
    ) -> Result<Response, LLMError> {
        let mut options = ChatOptions::resolve(options);
        self.resolve_model(&mut options)?;
        let request = self.signed_request(messages, &options)?;

        let response = self.executor.execute(cancel, request).await?;
        let response = ensure_success(response, PROVIDER, &options.model)?;
        let parsed: ConverseResponse = serde_json::from_slice(&response.body).map_err(|err| {
            LLMError::provider(
                PROVIDER,
                Some(options.model.clone()),
                format!("failed to parse response: {err}"),
            )
        })?;
        Ok(parsed.into_response(&options.model))
    }

    async fn stream(
        &self,
        cancel: CancellationToken,
        messages: &[Message],
        options: &[ChatOption],
    ) -> Result<EventStream, LLMError> {
        let mut options = ChatOptions::resolve_stream(options);
        self.resolve_model(&mut options)?;
        let request = self.signed_request(messages, &options)?;

        let response = self.executor.execute_stream(&cancel, request).await?;
        let response = ensure_stream_success(response, PROVIDER, &options.model).await?;
        let decoder = vendors::bedrock().with_model(options.model);
        Ok(normalize(cancel, response.body, decoder))
    }

    fn name(&self) -> &str {
        PROVIDER
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }

    fn close(&self) {
        self.executor.close();
        tracing::debug!(provider = PROVIDER, "closed provider");
    }
}
