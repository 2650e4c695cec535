use crate::error::LLMError;
use crate::provider::to_json_body;
use crate::types::{ChatOptions, Message, Role};

use super::types::{ChatCompletionRequest, WireMessage};

/// Serializes the chat-completions body.
///
/// The system prompt option becomes a leading system message. Sampling parameters are
/// only sent when they differ from the vendor's neutral values.
pub(crate) fn build_body(
    messages: &[Message],
    options: &ChatOptions,
    model: &str,
) -> Result<Vec<u8>, LLMError> {
    let mut wire = Vec::with_capacity(messages.len() + 1);
    if let Some(prompt) = options.system_prompt.as_deref().filter(|p| !p.is_empty()) {
        wire.push(WireMessage {
            role: Role::System.as_str(),
            content: prompt,
        });
    }
    wire.extend(messages.iter().map(|message| WireMessage {
        role: message.role.as_str(),
        content: &message.content,
    }));

    let body = ChatCompletionRequest {
        model,
        messages: wire,
        stream: options.stream,
        max_tokens: (options.max_tokens > 0).then_some(options.max_tokens),
        temperature: (options.temperature > 0.0).then_some(options.temperature),
        top_p: (options.top_p > 0.0 && options.top_p < 1.0).then_some(options.top_p),
        stop: &options.stop_sequences,
    };
    to_json_body(&body)
}
