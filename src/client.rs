use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::provider::DynProvider;
use crate::stream::EventStream;
use crate::types::{ChatOption, Message, Response};

/// Entry point routing calls to registered providers by handle.
pub struct LLMClient {
    providers: HashMap<String, DynProvider>,
}

impl LLMClient {
    pub fn builder() -> LLMClientBuilder {
        LLMClientBuilder {
            providers: HashMap::new(),
        }
    }

    pub async fn chat(
        &self,
        handle: &str,
        cancel: &CancellationToken,
        messages: &[Message],
        options: &[ChatOption],
    ) -> Result<Response, LLMError> {
        let provider = self.get_provider(handle)?;
        provider.chat(cancel, messages, options).await
    }

    pub async fn stream(
        &self,
        handle: &str,
        cancel: CancellationToken,
        messages: &[Message],
        options: &[ChatOption],
    ) -> Result<EventStream, LLMError> {
        let provider = self.get_provider(handle)?;
        provider.stream(cancel, messages, options).await
    }

    /// Registered handles in lexicographic order.
    pub fn handles(&self) -> Vec<String> {
        let mut handles: Vec<String> = self.providers.keys().cloned().collect();
        handles.sort();
        handles
    }

    /// Models accepted by the provider behind `handle`.
    pub fn models(&self, handle: &str) -> Result<Vec<String>, LLMError> {
        Ok(self.get_provider(handle)?.models())
    }

    /// Closes every provider's idle connections. In-flight calls are not cancelled.
    pub fn shutdown(&self) {
        for (handle, provider) in &self.providers {
            tracing::debug!(%handle, "shutting down provider");
            provider.close();
        }
    }

    fn get_provider(&self, handle: &str) -> Result<DynProvider, LLMError> {
        self.providers
            .get(handle)
            .cloned()
            .ok_or_else(|| LLMError::Validation {
                message: format!("unknown model handle: {handle}"),
            })
    }
}

/// Collects handle registrations for [`LLMClient`].
pub struct LLMClientBuilder {
    providers: HashMap<String, DynProvider>,
}

impl LLMClientBuilder {
    /// Registers `provider` under `handle`, replacing any earlier registration.
    pub fn register_handle<S: Into<String>>(mut self, handle: S, provider: DynProvider) -> Self {
        self.providers.insert(handle.into(), provider);
        self
    }

    pub fn build(self) -> LLMClient {
        LLMClient {
            providers: self.providers,
        }
    }
}
