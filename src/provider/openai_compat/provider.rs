use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::executor::{RequestExecutor, RetryPolicy, default_retry_policy};
use crate::http::{DynHttpTransport, HttpRequest};
use crate::provider::{LLMProvider, ensure_stream_success, ensure_success, validate_model};
use crate::stream::{EventStream, normalize, vendors};
use crate::types::{ChatOption, ChatOptions, Message, Response};

use super::request::build_body;
use super::types::ChatCompletionResponse;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_NAME: &str = "openai";

/// OpenAI chat-completions adapter, also usable for compatible gateways.
///
/// Requests carry `Authorization: Bearer <key>`; streams are decoded with
/// [`vendors::openai_chat`].
#[derive(Debug, Clone)]
pub struct OpenAiCompatProvider {
    executor: RequestExecutor,
    api_key: String,
    base_url: String,
    organization: Option<String>,
    default_model: Option<String>,
    models: Vec<String>,
}

impl OpenAiCompatProvider {
    pub fn new(transport: DynHttpTransport, api_key: impl Into<String>) -> Self {
        Self {
            executor: RequestExecutor::new(DEFAULT_NAME, transport, default_retry_policy()),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            organization: None,
            default_model: None,
            models: Vec::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sends `OpenAI-Organization` with every request.
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Restricts accepted models; other models fail with `InvalidModel`.
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Relabels errors and logs, e.g. for a self-hosted gateway.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.executor = RequestExecutor::new(
            name,
            self.executor.transport().clone(),
            self.executor.policy().clone(),
        );
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.executor = RequestExecutor::new(
            self.executor.provider().to_string(),
            self.executor.transport().clone(),
            policy,
        );
        self
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn resolve_model(&self, options: &ChatOptions) -> Result<String, LLMError> {
        let model = if options.model.is_empty() {
            self.default_model.clone().unwrap_or_default()
        } else {
            options.model.clone()
        };
        validate_model(self.name(), &model, &self.models)?;
        Ok(model)
    }

    fn build_request(
        &self,
        messages: &[Message],
        options: &ChatOptions,
        model: &str,
    ) -> Result<HttpRequest, LLMError> {
        let body = build_body(messages, options, model)?;
        let mut request = HttpRequest::post_json(self.endpoint(), body);
        request.set_header("Authorization", format!("Bearer {}", self.api_key));
        request.set_header(
            "Accept",
            if options.stream {
                "text/event-stream"
            } else {
                "application/json"
            },
        );
        if let Some(organization) = &self.organization {
            request.set_header("OpenAI-Organization", organization.clone());
        }
        Ok(request)
    }
}

#[async_trait]
impl LLMProvider for OpenAiCompatProvider {
    async fn chat(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        options: &[ChatOption],
    ) -> Result<Response, LLMError> {
        let options = ChatOptions::resolve(options);
        let model = self.resolve_model(&options)?;
        let request = self.build_request(messages, &options, &model)?;

        let response = self.executor.execute(cancel, request).await?;
        let response = ensure_success(response, self.name(), &model)?;
        let parsed: ChatCompletionResponse =
            serde_json::from_slice(&response.body).map_err(|err| {
                LLMError::provider(
                    self.name(),
                    Some(model.clone()),
                    format!("failed to parse response: {err}"),
                )
            })?;
        parsed.into_response(self.name(), &model)
    }

    async fn stream(
        &self,
        cancel: CancellationToken,
        messages: &[Message],
        options: &[ChatOption],
    ) -> Result<EventStream, LLMError> {
        let options = ChatOptions::resolve_stream(options);
        let model = self.resolve_model(&options)?;
        let request = self.build_request(messages, &options, &model)?;

        let response = self.executor.execute_stream(&cancel, request).await?;
        let response = ensure_stream_success(response, self.name(), &model).await?;
        let decoder = vendors::openai_chat()
            .with_provider(self.name())
            .with_model(model);
        Ok(normalize(cancel, response.body, decoder))
    }

    fn name(&self) -> &str {
        self.executor.provider()
    }

    fn models(&self) -> Vec<String> {
        self.models.clone()
    }

    fn close(&self) {
        self.executor.close();
        tracing::debug!(provider = self.name(), "closed provider");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::http::testing::{ScriptedTransport, Step};
    use crate::stream::Event;

    fn provider(transport: Arc<ScriptedTransport>) -> OpenAiCompatProvider {
        OpenAiCompatProvider::new(transport, "sk-test").with_default_model("gpt-4")
    }

    #[test]
    fn endpoint_accepts_base_with_or_without_version() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let with_v1 = provider(transport.clone()).with_base_url("http://localhost:8080/v1/");
        assert_eq!(with_v1.endpoint(), "http://localhost:8080/v1/chat/completions");
        let bare = provider(transport).with_base_url("http://localhost:8080");
        assert_eq!(bare.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[tokio::test]
    async fn chat_sends_bearer_auth_and_maps_response() {
        let transport = Arc::new(ScriptedTransport::new(vec![Step::body(
            200,
            r#"{"model":"gpt-4-0613","choices":[{"message":{"role":"assistant","content":"Hi!"}}],
                "usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
        )]));
        let provider = provider(transport.clone()).with_organization("org-1");

        let response = provider
            .chat(&CancellationToken::new(), &[Message::user("Hello")], &[])
            .await
            .expect("chat");

        assert_eq!(response.content, "Hi!");
        assert_eq!(response.model, "gpt-4-0613");
        assert_eq!(response.usage.total_tokens, 5);

        let requests = transport.requests();
        assert_eq!(requests[0].header("authorization"), Some("Bearer sk-test"));
        assert_eq!(requests[0].header("openai-organization"), Some("org-1"));
    }

    #[tokio::test]
    async fn empty_choices_is_a_provider_error() {
        let transport = Arc::new(ScriptedTransport::new(vec![Step::body(
            200,
            r#"{"choices":[]}"#,
        )]));
        let err = provider(transport)
            .chat(&CancellationToken::new(), &[Message::user("Hello")], &[])
            .await
            .expect_err("no choices");
        match err {
            LLMError::Provider(err) => assert!(err.to_string().contains("no choices")),
            other => panic!("unexpected error type: {other:?}"),
        }
    }

    #[tokio::test]
    async fn terminal_status_is_classified() {
        let transport = Arc::new(ScriptedTransport::new(vec![Step::body(
            401,
            r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#,
        )]));
        let err = provider(transport)
            .chat(&CancellationToken::new(), &[Message::user("Hello")], &[])
            .await
            .expect_err("401");
        match err {
            LLMError::Authentication(err) => assert_eq!(err.provider, "openai"),
            other => panic!("unexpected error type: {other:?}"),
        }
    }

    #[tokio::test]
    async fn model_outside_configured_list_is_rejected_before_sending() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        let provider = provider(transport.clone()).with_models(["gpt-4"]);

        let err = provider
            .chat(
                &CancellationToken::new(),
                &[Message::user("Hello")],
                &[ChatOption::Model("gpt-5".into())],
            )
            .await
            .expect_err("invalid model");
        assert!(matches!(err, LLMError::InvalidModel(_)));
        assert_eq!(transport.attempts(), 0);
    }

    #[tokio::test]
    async fn stream_normalizes_sse_chunks() {
        let transport = Arc::new(ScriptedTransport::new(vec![Step::chunks(
            200,
            &[
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n",
            ],
        )]));
        let provider = provider(transport.clone());

        let mut stream = provider
            .stream(CancellationToken::new(), &[Message::user("Hi")], &[])
            .await
            .expect("stream");

        let mut events = Vec::new();
        while let Some(event) = stream.recv().await {
            events.push(event);
        }
        assert!(matches!(events[0], Event::Start));
        assert_eq!(events.last().map(Event::content), Some("Hello"));
        assert!(events.last().is_some_and(Event::is_done));

        let requests = transport.requests();
        assert_eq!(requests[0].header("accept"), Some("text/event-stream"));
        let body: serde_json::Value =
            serde_json::from_slice(requests[0].body_bytes()).expect("json");
        assert_eq!(body["stream"], true);
    }

    #[tokio::test]
    async fn stream_error_status_is_classified_before_normalizing() {
        let transport = Arc::new(ScriptedTransport::new(vec![Step::body(
            404,
            r#"{"error":{"message":"The model `gpt-9` does not exist","type":"invalid_request_error"}}"#,
        )]));
        let err = provider(transport)
            .stream(CancellationToken::new(), &[Message::user("Hi")], &[])
            .await
            .expect_err("404");
        assert!(matches!(err, LLMError::InvalidModel(_)));
    }

    #[test]
    fn close_releases_idle_connections() {
        let transport = Arc::new(ScriptedTransport::new(Vec::new()));
        provider(transport.clone()).close();
        assert_eq!(transport.closed(), 1);
    }
}
