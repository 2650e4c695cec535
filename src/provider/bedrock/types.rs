use serde::{Deserialize, Serialize};

use crate::types::{Response, Usage};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConverseRequest<'a> {
    pub(crate) messages: Vec<ConverseMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) system: Vec<TextBlock<'a>>,
    pub(crate) inference_config: InferenceConfig<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ConverseMessage<'a> {
    pub(crate) role: &'a str,
    pub(crate) content: Vec<TextBlock<'a>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TextBlock<'a> {
    pub(crate) text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InferenceConfig<'a> {
    pub(crate) max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) top_p: Option<f32>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub(crate) stop_sequences: &'a [String],
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ConverseResponse {
    #[serde(default)]
    pub(crate) output: Output,
    #[serde(default)]
    pub(crate) usage: WireUsage,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Output {
    #[serde(default)]
    pub(crate) message: OutputMessage,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct OutputMessage {
    #[serde(default)]
    pub(crate) content: Vec<OutputContent>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct OutputContent {
    #[serde(default)]
    pub(crate) text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireUsage {
    #[serde(default)]
    pub(crate) input_tokens: u64,
    #[serde(default)]
    pub(crate) output_tokens: u64,
}

impl ConverseResponse {
    /// Text blocks joined by newlines; the model is the one that was requested.
    pub(crate) fn into_response(self, model: &str) -> Response {
        let content = self
            .output
            .message
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");
        Response {
            content,
            model: model.to_string(),
            usage: Usage::new(self.usage.input_tokens, self.usage.output_tokens),
        }
    }
}
