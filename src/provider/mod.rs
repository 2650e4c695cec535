use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::classify::classify_response;
use crate::error::{InvalidModelError, LLMError};
use crate::http::{HttpResponse, HttpStreamResponse};
use crate::stream::EventStream;
use crate::types::{ChatOption, Message, Response};

pub mod bedrock;
pub mod openai_compat;

pub use bedrock::BedrockProvider;
pub use openai_compat::OpenAiCompatProvider;

/// Contract every vendor adapter implements.
///
/// Adapters map messages and options onto their vendor schema, run the request through
/// a [`crate::executor::RequestExecutor`] and, for streams, hand the body to
/// [`crate::stream::normalize`]. Instances are shared across concurrent calls.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Sends the conversation and waits for the complete reply.
    async fn chat(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        options: &[ChatOption],
    ) -> Result<Response, LLMError>;

    /// Sends the conversation and returns the normalized event stream.
    ///
    /// Errors before the first byte (classification, retries, cancellation) are returned
    /// directly; later failures arrive as the stream's terminal `Error` event.
    async fn stream(
        &self,
        cancel: CancellationToken,
        messages: &[Message],
        options: &[ChatOption],
    ) -> Result<EventStream, LLMError>;

    fn name(&self) -> &str;

    /// Models the adapter accepts; empty means any.
    fn models(&self) -> Vec<String>;

    /// Releases pooled connections without cancelling in-flight calls.
    fn close(&self);
}

/// Thread-safe provider handle.
pub type DynProvider = Arc<dyn LLMProvider>;

/// Rejects empty models, and models outside `supported` when that list is non-empty.
pub(crate) fn validate_model(
    provider: &str,
    model: &str,
    supported: &[String],
) -> Result<(), LLMError> {
    if model.is_empty() || (!supported.is_empty() && !supported.iter().any(|m| m == model)) {
        return Err(InvalidModelError {
            provider: provider.to_string(),
            model: model.to_string(),
            supported_models: supported.to_vec(),
        }
        .into());
    }
    Ok(())
}

pub(crate) fn to_json_body<T: Serialize>(body: &T) -> Result<Vec<u8>, LLMError> {
    serde_json::to_vec(body).map_err(|err| LLMError::Validation {
        message: format!("failed to serialize request: {err}"),
    })
}

/// Passes successful responses through and classifies everything else.
pub(crate) fn ensure_success(
    response: HttpResponse,
    provider: &str,
    model: &str,
) -> Result<HttpResponse, LLMError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(classify_response(&response, provider, model))
    }
}

/// Streaming counterpart of [`ensure_success`]; error bodies are drained before
/// classification.
pub(crate) async fn ensure_stream_success(
    response: HttpStreamResponse,
    provider: &str,
    model: &str,
) -> Result<HttpStreamResponse, LLMError> {
    if response.is_success() {
        return Ok(response);
    }
    let buffered = response.into_buffered().await?;
    Err(classify_response(&buffered, provider, model))
}
