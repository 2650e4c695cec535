use crate::error::LLMError;
use crate::provider::to_json_body;
use crate::types::{ChatOptions, Message, Role};

use super::types::{ConverseMessage, ConverseRequest, InferenceConfig, TextBlock};

/// Serializes a converse body.
///
/// System messages and the system prompt option move into the top-level `system` list;
/// the remaining turns keep their order.
pub(crate) fn build_body(messages: &[Message], options: &ChatOptions) -> Result<Vec<u8>, LLMError> {
    let mut system = Vec::new();
    if let Some(prompt) = options.system_prompt.as_deref().filter(|p| !p.is_empty()) {
        system.push(TextBlock { text: prompt });
    }
    let mut turns = Vec::with_capacity(messages.len());
    for message in messages {
        match message.role {
            Role::System => system.push(TextBlock {
                text: &message.content,
            }),
            Role::User | Role::Assistant => turns.push(ConverseMessage {
                role: message.role.as_str(),
                content: vec![TextBlock {
                    text: &message.content,
                }],
            }),
        }
    }

    let body = ConverseRequest {
        messages: turns,
        system,
        inference_config: InferenceConfig {
            max_tokens: options.max_tokens,
            temperature: (options.temperature > 0.0).then_some(options.temperature),
            top_p: (options.top_p > 0.0 && options.top_p < 1.0).then_some(options.top_p),
            stop_sequences: &options.stop_sequences,
        },
    };
    to_json_body(&body)
}
