use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::LLMClient;
use crate::error::{AuthenticationError, LLMError};
use crate::executor::{RetryPolicy, default_retry_policy};
use crate::http::DynHttpTransport;
use crate::provider::{BedrockProvider, DynProvider, OpenAiCompatProvider};
use crate::sigv4::SigningContext;

/// Describes one callable backend.
///
/// Loading these records (from files, environment, a secrets store) is the caller's
/// job; this crate only turns them into providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Caller-chosen handle, e.g. `default-openai`.
    pub handle: String,
    pub provider: ProviderKind,
    pub credential: Credential,
    pub default_model: Option<String>,
    /// Overrides the vendor endpoint.
    pub base_url: Option<String>,
    /// Accepted models; empty keeps the provider's own list.
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub retry: Option<RetrySettings>,
    /// Vendor-specific settings such as `organization`.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(rename = "openai_compat")]
    OpenAiCompat,
    Bedrock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credential {
    ApiKey {
        key: String,
    },
    Bearer {
        token: String,
    },
    /// Static or temporary AWS credentials.
    Aws {
        region: String,
        access_key_id: String,
        secret_access_key: String,
        #[serde(default)]
        session_token: Option<String>,
    },
    None,
}

/// Partial [`RetryPolicy`] overrides; unset fields keep the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub multiplier: Option<f64>,
    pub retryable_status_codes: Option<Vec<u16>>,
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        let mut policy = default_retry_policy();
        if let Some(max_retries) = self.max_retries {
            policy = policy.with_max_retries(max_retries);
        }
        if let Some(ms) = self.initial_backoff_ms {
            policy = policy.with_initial_backoff(Duration::from_millis(ms));
        }
        if let Some(ms) = self.max_backoff_ms {
            policy = policy.with_max_backoff(Duration::from_millis(ms));
        }
        if let Some(multiplier) = self.multiplier {
            policy = policy.with_multiplier(multiplier);
        }
        if let Some(codes) = &self.retryable_status_codes {
            policy = policy.with_retryable_status_codes(codes.iter().copied());
        }
        policy
    }
}

/// Builds an [`LLMClient`] with one provider per config, all sharing `transport`.
pub fn build_client_from_configs(
    configs: &[ModelConfig],
    transport: DynHttpTransport,
) -> Result<LLMClient, LLMError> {
    let mut builder = LLMClient::builder();

    for config in configs {
        let provider = build_provider_from_config(config, transport.clone())?;
        builder = builder.register_handle(config.handle.clone(), provider);
    }

    Ok(builder.build())
}

fn build_provider_from_config(
    config: &ModelConfig,
    transport: DynHttpTransport,
) -> Result<DynProvider, LLMError> {
    let policy = config
        .retry
        .as_ref()
        .map(RetrySettings::to_policy)
        .unwrap_or_default();

    let provider: DynProvider = match config.provider {
        ProviderKind::OpenAiCompat => {
            let api_key = extract_api_key(&config.credential, "openai")?;
            let mut provider =
                OpenAiCompatProvider::new(transport, api_key).with_retry_policy(policy);

            if let Some(base_url) = &config.base_url {
                provider = provider.with_base_url(base_url.clone());
            }
            if let Some(model) = &config.default_model {
                provider = provider.with_default_model(model.clone());
            }
            if !config.models.is_empty() {
                provider = provider.with_models(config.models.clone());
            }
            if let Some(Value::String(org)) = config.extra.get("organization") {
                provider = provider.with_organization(org.clone());
            }
            if let Some(Value::String(name)) = config.extra.get("name") {
                provider = provider.with_name(name.clone());
            }

            Arc::new(provider)
        }
        ProviderKind::Bedrock => {
            let Credential::Aws {
                region,
                access_key_id,
                secret_access_key,
                session_token,
            } = &config.credential
            else {
                return Err(missing_credential("bedrock", "AWS credentials"));
            };
            let mut signing =
                SigningContext::new(region.clone(), access_key_id.clone(), secret_access_key.clone());
            if let Some(token) = session_token {
                signing = signing.with_session_token(token.clone());
            }
            let mut provider = BedrockProvider::new(transport, signing)?.with_retry_policy(policy);

            if let Some(base_url) = &config.base_url {
                provider = provider.with_endpoint(base_url.clone());
            }
            if let Some(model) = &config.default_model {
                provider = provider.with_default_model(model.clone());
            }
            if !config.models.is_empty() {
                provider = provider.with_models(config.models.clone());
            }

            Arc::new(provider)
        }
    };

    Ok(provider)
}

fn extract_api_key(credential: &Credential, provider: &'static str) -> Result<String, LLMError> {
    match credential {
        Credential::ApiKey { key } => Ok(key.clone()),
        Credential::Bearer { token } => Ok(token.clone()),
        Credential::Aws { .. } | Credential::None => Err(missing_credential(provider, "an API key")),
    }
}

fn missing_credential(provider: &str, what: &str) -> LLMError {
    AuthenticationError {
        provider: provider.to_string(),
        reason: format!("provider {provider} requires {what}"),
    }
    .into()
}
