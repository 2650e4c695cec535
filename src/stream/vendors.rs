//! Built-in [`VendorDecoder`]s for the wire formats the adapters speak.

use serde_json::Value;

use crate::classify::{VendorErrorBody, error_body_from_value};

use super::decode::{DecodeError, Decoded, VendorDecoder};
use super::framing::{Frame, Framing};

/// OpenAI chat-completions chunks; also spoken by Azure OpenAI and Meta Llama.
pub fn openai_chat() -> VendorDecoder {
    VendorDecoder::new("openai", Framing::Sse, decode_openai_chat)
}

/// Anthropic Messages API events.
pub fn anthropic_messages() -> VendorDecoder {
    VendorDecoder::new("anthropic", Framing::Sse, decode_anthropic)
}

/// Google Gemini `streamGenerateContent?alt=sse` responses.
pub fn gemini() -> VendorDecoder {
    VendorDecoder::new("gemini", Framing::Sse, decode_gemini)
}

/// Ollama `/api/chat` and `/api/generate` NDJSON lines.
pub fn ollama() -> VendorDecoder {
    VendorDecoder::new("ollama", Framing::Lines, decode_ollama)
}

/// AWS Bedrock converse-stream events, one JSON object per line.
pub fn bedrock() -> VendorDecoder {
    VendorDecoder::new("bedrock", Framing::Lines, decode_bedrock)
}

/// Minimal `{"text": "..."}` SSE payloads, terminated by `[DONE]`.
pub fn plain_text() -> VendorDecoder {
    VendorDecoder::new("text", Framing::Sse, decode_plain_text)
}

fn parse(frame: &Frame) -> Result<Value, DecodeError> {
    serde_json::from_str(&frame.data).map_err(DecodeError::malformed)
}

fn vendor_error(value: &Value) -> DecodeError {
    DecodeError::Vendor(error_body_from_value(value).unwrap_or_else(|| VendorErrorBody {
        message: value.to_string(),
        ..VendorErrorBody::default()
    }))
}

fn text_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn decode_openai_chat(frame: &Frame) -> Result<Decoded, DecodeError> {
    let value = parse(frame)?;
    if value.get("error").is_some() {
        return Err(vendor_error(&value));
    }
    let Some(choice) = value.pointer("/choices/0") else {
        return Ok(Decoded::empty());
    };

    let mut decoded = Decoded::empty();
    if let Some(text) = text_at(choice, "/delta/content") {
        decoded.deltas.push(text.to_string());
    }
    match choice.get("finish_reason").and_then(Value::as_str) {
        Some("content_filter") => {
            decoded.blocked = Some("response blocked by content filter".to_string());
        }
        Some(reason) if !reason.is_empty() => decoded.terminal = true,
        _ => {}
    }
    Ok(decoded)
}

fn decode_anthropic(frame: &Frame) -> Result<Decoded, DecodeError> {
    let value = parse(frame)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .or(frame.event.as_deref())
        .unwrap_or_default();

    match kind {
        "content_block_delta" => Ok(text_at(&value, "/delta/text")
            .map(Decoded::delta)
            .unwrap_or_default()),
        "message_delta" => match text_at(&value, "/delta/stop_reason") {
            Some("refusal") => Ok(Decoded::blocked("response refused by safety filters")),
            _ => Ok(Decoded::empty()),
        },
        "message_stop" => Ok(Decoded::terminal()),
        "error" => Err(vendor_error(&value)),
        _ => Ok(Decoded::empty()),
    }
}

fn decode_gemini(frame: &Frame) -> Result<Decoded, DecodeError> {
    let value = parse(frame)?;
    if value.get("error").is_some() {
        return Err(vendor_error(&value));
    }
    if let Some(reason) = text_at(&value, "/promptFeedback/blockReason").filter(|r| !r.is_empty()) {
        return Ok(Decoded::blocked(format!("prompt blocked: {reason}")));
    }
    let Some(candidate) = value.pointer("/candidates/0") else {
        return Ok(Decoded::empty());
    };

    let mut decoded = Decoded::empty();
    if let Some(parts) = candidate.pointer("/content/parts").and_then(Value::as_array) {
        decoded.deltas.extend(
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .map(str::to_string),
        );
    }
    match candidate.get("finishReason").and_then(Value::as_str) {
        Some("SAFETY") => {
            decoded.blocked = Some("response blocked due to safety settings".to_string());
        }
        Some(reason) if !reason.is_empty() => decoded.terminal = true,
        _ => {}
    }
    Ok(decoded)
}

fn decode_ollama(frame: &Frame) -> Result<Decoded, DecodeError> {
    let value = parse(frame)?;
    if value.get("error").is_some() {
        return Err(vendor_error(&value));
    }
    let mut decoded = Decoded::empty();
    if let Some(text) =
        text_at(&value, "/message/content").or_else(|| text_at(&value, "/response"))
    {
        decoded.deltas.push(text.to_string());
    }
    decoded.terminal = value.get("done").and_then(Value::as_bool).unwrap_or(false);
    Ok(decoded)
}

fn decode_bedrock(frame: &Frame) -> Result<Decoded, DecodeError> {
    let value = parse(frame)?;
    let Some(object) = value.as_object() else {
        return Err(DecodeError::malformed("bedrock event is not an object"));
    };

    if let Some(delta) = object.get("contentBlockDelta") {
        return Ok(text_at(delta, "/delta/text")
            .map(Decoded::delta)
            .unwrap_or_default());
    }
    if let Some(stop) = object.get("messageStop") {
        return Ok(match text_at(stop, "/stopReason") {
            Some("guardrail_intervened" | "content_filtered") => {
                Decoded::blocked("response blocked by guardrail")
            }
            _ => Decoded::terminal(),
        });
    }
    if object.contains_key("error") {
        return Err(vendor_error(&value));
    }
    // Exception events are keyed by their type, e.g. `{"throttlingException": {...}}`.
    if let Some((name, body)) = object.iter().find(|(key, _)| key.ends_with("Exception")) {
        return Err(DecodeError::Vendor(VendorErrorBody {
            message: text_at(body, "/message").unwrap_or(name).to_string(),
            error_type: Some(name.clone()),
            code: None,
        }));
    }
    Ok(Decoded::empty())
}

fn decode_plain_text(frame: &Frame) -> Result<Decoded, DecodeError> {
    let value = parse(frame)?;
    let mut decoded = text_at(&value, "/text")
        .map(Decoded::delta)
        .unwrap_or_default();
    decoded.terminal = value.get("done").and_then(Value::as_bool).unwrap_or(false);
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: &str) -> Frame {
        Frame::data(data)
    }

    #[test]
    fn openai_chunks_yield_content_and_finish() {
        let decoder = openai_chat();
        let decoded = decoder
            .decode(&frame(r#"{"choices":[{"delta":{"role":"assistant","content":"Hi"},"finish_reason":null}]}"#))
            .expect("decoded");
        assert_eq!(decoded, Decoded::delta("Hi"));

        let decoded = decoder
            .decode(&frame(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#))
            .expect("decoded");
        assert!(decoded.terminal);
        assert!(decoded.deltas.is_empty());

        let decoded = decoder
            .decode(&frame(r#"{"choices":[{"delta":{},"finish_reason":"content_filter"}]}"#))
            .expect("decoded");
        assert!(decoded.blocked.is_some());
    }

    #[test]
    fn openai_error_chunk_is_vendor_error() {
        match openai_chat().decode(&frame(
            r#"{"error":{"message":"Rate limit reached","type":"rate_limit_exceeded"}}"#,
        )) {
            Err(DecodeError::Vendor(body)) => {
                assert_eq!(body.message, "Rate limit reached");
                assert_eq!(body.error_type.as_deref(), Some("rate_limit_exceeded"));
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn anthropic_events_follow_type_field() {
        let decoder = anthropic_messages();
        let delta = decoder
            .decode(&frame(
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
            ))
            .expect("delta");
        assert_eq!(delta, Decoded::delta("Hel"));

        let start = decoder
            .decode(&frame(r#"{"type":"message_start","message":{"id":"msg_1"}}"#))
            .expect("start");
        assert_eq!(start, Decoded::empty());

        let stop = decoder
            .decode(&frame(r#"{"type":"message_stop"}"#))
            .expect("stop");
        assert!(stop.terminal);

        match decoder.decode(&frame(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )) {
            Err(DecodeError::Vendor(body)) => {
                assert_eq!(body.error_type.as_deref(), Some("overloaded_error"))
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn gemini_safety_signals_become_blocks() {
        let decoder = gemini();
        let prompt = decoder
            .decode(&frame(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#))
            .expect("decoded");
        assert_eq!(prompt.blocked.as_deref(), Some("prompt blocked: SAFETY"));

        let response = decoder
            .decode(&frame(
                r#"{"candidates":[{"content":{"parts":[]},"finishReason":"SAFETY"}]}"#,
            ))
            .expect("decoded");
        assert_eq!(
            response.blocked.as_deref(),
            Some("response blocked due to safety settings")
        );
        assert!(!response.terminal);

        let normal = decoder
            .decode(&frame(
                r#"{"candidates":[{"content":{"parts":[{"text":"a"},{"text":"b"}]},"finishReason":"STOP"}]}"#,
            ))
            .expect("decoded");
        assert_eq!(normal.deltas, vec!["a", "b"]);
        assert!(normal.terminal);
    }

    #[test]
    fn ollama_lines_end_on_done() {
        let decoder = ollama();
        assert_eq!(decoder.framing(), Framing::Lines);
        let chunk = decoder
            .decode(&frame(r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#))
            .expect("chunk");
        assert_eq!(chunk, Decoded::delta("Hel"));

        let last = decoder
            .decode(&frame(r#"{"response":"","done":true}"#))
            .expect("last");
        assert!(last.terminal);

        assert!(matches!(
            decoder.decode(&frame(r#"{"error":"model 'x' not found"}"#)),
            Err(DecodeError::Vendor(_))
        ));
    }

    #[test]
    fn bedrock_events_map_by_key() {
        let decoder = bedrock();
        assert_eq!(
            decoder
                .decode(&frame(r#"{"contentBlockDelta":{"delta":{"text":"Hi"},"contentBlockIndex":0}}"#))
                .expect("delta"),
            Decoded::delta("Hi")
        );
        assert_eq!(
            decoder
                .decode(&frame(r#"{"contentBlockStop":{"contentBlockIndex":0}}"#))
                .expect("block stop"),
            Decoded::empty()
        );
        assert!(decoder
            .decode(&frame(r#"{"messageStop":{"stopReason":"end_turn"}}"#))
            .expect("stop")
            .terminal);
        assert!(decoder
            .decode(&frame(r#"{"messageStop":{"stopReason":"guardrail_intervened"}}"#))
            .expect("guardrail")
            .blocked
            .is_some());

        match decoder.decode(&frame(r#"{"throttlingException":{"message":"Too many requests"}}"#)) {
            Err(DecodeError::Vendor(body)) => {
                assert_eq!(body.message, "Too many requests");
                assert_eq!(body.error_type.as_deref(), Some("throttlingException"));
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_reported_as_malformed() {
        for decoder in [openai_chat(), anthropic_messages(), gemini(), ollama(), bedrock(), plain_text()] {
            assert!(
                matches!(decoder.decode(&frame("{not json")), Err(DecodeError::Malformed(_))),
                "{} accepted malformed input",
                decoder.provider()
            );
        }
    }
}
