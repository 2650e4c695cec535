use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LLMError;
use crate::types::{Response, Usage};

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    pub(crate) model: &'a str,
    pub(crate) messages: Vec<WireMessage<'a>>,
    pub(crate) stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) top_p: Option<f32>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub(crate) stop: &'a [String],
}

#[derive(Debug, Serialize)]
pub(crate) struct WireMessage<'a> {
    pub(crate) role: &'a str,
    pub(crate) content: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    pub(crate) model: Option<String>,
    #[serde(default)]
    pub(crate) choices: Vec<Choice>,
    #[serde(default)]
    pub(crate) usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Choice {
    #[serde(default)]
    pub(crate) message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChoiceMessage {
    #[serde(default)]
    pub(crate) content: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireUsage {
    #[serde(default)]
    pub(crate) prompt_tokens: u64,
    #[serde(default)]
    pub(crate) completion_tokens: u64,
    #[serde(default)]
    pub(crate) total_tokens: Option<u64>,
}

impl ChatCompletionResponse {
    pub(crate) fn into_response(self, provider: &str, model: &str) -> Result<Response, LLMError> {
        let Some(choice) = self.choices.into_iter().next() else {
            return Err(LLMError::provider(
                provider,
                Some(model.to_string()),
                "no choices in response",
            ));
        };
        let content = choice
            .message
            .and_then(|message| message.content)
            .map(content_text)
            .unwrap_or_default();
        let usage = self
            .usage
            .map(|usage| {
                let mut mapped = Usage::new(usage.prompt_tokens, usage.completion_tokens);
                if let Some(total) = usage.total_tokens {
                    mapped.total_tokens = total;
                }
                mapped
            })
            .unwrap_or_default();
        Ok(Response {
            content,
            model: self.model.unwrap_or_else(|| model.to_string()),
            usage,
        })
    }
}

/// Plain string content, or the concatenated `text` of multi-part content.
fn content_text(content: Value) -> String {
    match content {
        Value::String(text) => text,
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect(),
        _ => String::new(),
    }
}
