//! Maps terminal HTTP failures and in-stream vendor error signals onto [`LLMError`].
//!
//! Status codes are inspected first; vendor error types and free-text heuristics only
//! break ties for status-ambiguous responses (a 400 may be a validation failure or a
//! context overflow depending on the vendor). The substring tables below are matched
//! against real vendor messages and are deliberately loose.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{
    AuthenticationError, ContextLengthError, InvalidModelError, LLMError, ProviderError,
    RateLimitError, StreamingUnsupportedError,
};
use crate::executor::retry_after_from_headers;
use crate::http::HttpResponse;

const AUTH_HINTS: [&str; 8] = [
    "security token",
    "access denied",
    "unauthorized",
    "forbidden",
    "authentication",
    "credentials",
    "invalid key",
    "expired",
];

const THROTTLE_HINTS: [&str; 5] = [
    "throttl",
    "rate limit",
    "rate exceed",
    "too many requests",
    "quota exceeded",
];

const CONTEXT_HINTS: [&str; 9] = [
    "prompt is too long",
    "exceeds maximum",
    "too many tokens",
    "context length",
    "context window",
    "maximum context",
    "token limit",
    "input is too long",
    "maximum output tokens",
];

const STREAMING_HINTS: [&str; 3] = [
    "streaming is not supported",
    "does not support streaming",
    "stream not supported",
];

const AUTH_TYPES: [&str; 7] = [
    "authentication_error",
    "permission_error",
    "unauthenticated",
    "permission_denied",
    "accessdeniedexception",
    "unrecognizedclientexception",
    "expiredtokenexception",
];

const THROTTLE_TYPES: [&str; 4] = [
    "rate_limit_error",
    "resource_exhausted",
    "throttlingexception",
    "rate_limit_exceeded",
];

const NOT_FOUND_TYPES: [&str; 4] = [
    "not_found_error",
    "not_found",
    "resourcenotfoundexception",
    "model_not_found",
];

const CONTEXT_CODES: [&str; 4] = [
    "context_length_exceeded",
    "max_context_length_exceeded",
    "prompt_tokens_exceeded",
    "context_window_exceeded",
];

/// Error envelope fields shared by the vendors we talk to.
///
/// Stream decoders hand one of these back when a frame carries a vendor error, and the
/// normalizer classifies it the same way as a terminal HTTP response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VendorErrorBody {
    pub message: String,
    pub error_type: Option<String>,
    pub code: Option<String>,
}

/// Classifies a terminal (non-retried) response.
///
/// `body` may be anything the vendor sent; malformed payloads degrade to a
/// [`ProviderError`] carrying the raw status and body.
///
/// # Examples
///
/// ```
/// use relaycore::classify::classify;
/// use relaycore::error::LLMError;
///
/// let err = classify(
///     400,
///     r#"{"message":"Prompt is too long: 150000 tokens, model supports 100000"}"#,
///     "bedrock",
///     "anthropic.claude-v2",
/// );
/// match err {
///     LLMError::ContextTooLong(ctx) => {
///         assert_eq!(ctx.requested_tokens, Some(150000));
///         assert_eq!(ctx.max_tokens, Some(100000));
///     }
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
pub fn classify(status: u16, body: &str, provider: &str, model: &str) -> LLMError {
    match parse_error_body(body) {
        Some(parsed) => classify_parsed(Some(status), &parsed, provider, model),
        None => classify_unparsed(status, body, provider, model),
    }
}

/// Classifies a buffered response, threading `Retry-After` and rate-limit headers into
/// [`RateLimitError`].
pub fn classify_response(response: &HttpResponse, provider: &str, model: &str) -> LLMError {
    let body = String::from_utf8_lossy(&response.body);
    let mut err = classify(response.status, &body, provider, model);
    if let LLMError::RateLimited(rate) = &mut err {
        if rate.retry_after.is_none() {
            rate.retry_after = retry_after_from_headers(&response.headers);
        }
        apply_rate_limit_headers(rate, response);
    }
    err
}

/// Classifies an error reported inside a stream, where no HTTP status is available.
pub(crate) fn classify_vendor_error(
    parsed: &VendorErrorBody,
    provider: &str,
    model: &str,
) -> LLMError {
    classify_parsed(None, parsed, provider, model)
}

/// Extracts message, type and code from the common vendor error envelopes.
pub fn parse_error_body(body: &str) -> Option<VendorErrorBody> {
    let value: Value = serde_json::from_str(body.trim()).ok()?;
    error_body_from_value(&value)
}

pub(crate) fn error_body_from_value(value: &Value) -> Option<VendorErrorBody> {
    let object = value.as_object()?;

    let nested = object.get("error");
    let message = nested
        .and_then(|err| err.get("message"))
        .and_then(Value::as_str)
        .or_else(|| nested.and_then(Value::as_str))
        .or_else(|| object.get("message").and_then(Value::as_str))
        .or_else(|| object.get("Message").and_then(Value::as_str))
        .or_else(|| object.get("detail").and_then(Value::as_str))?
        .to_string();

    let error_type = nested
        .and_then(|err| err.get("type").or_else(|| err.get("status")))
        .or_else(|| object.get("__type"))
        .or_else(|| object.get("type").filter(|t| t.as_str() != Some("error")))
        .and_then(Value::as_str)
        // Bedrock prefixes the type with a namespace, e.g. `com.amazon...#ThrottlingException`.
        .map(|t| t.rsplit('#').next().unwrap_or(t).to_string());

    let code = nested.and_then(|err| err.get("code")).and_then(|code| match code {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    });

    Some(VendorErrorBody {
        message,
        error_type,
        code,
    })
}

fn classify_unparsed(status: u16, body: &str, provider: &str, model: &str) -> LLMError {
    match status {
        401 | 403 => authentication(provider, body.trim()),
        429 => rate_limited(provider),
        404 if body.to_ascii_lowercase().contains("model") => {
            invalid_model(provider, model, body.trim())
        }
        502 | 504 => gateway_failure(status, body, provider),
        _ => {
            let cause = format!("HTTP {status}: {body}");
            LLMError::Provider(
                ProviderError::new(provider, Some(model.to_string()), cause).with_status(status),
            )
        }
    }
}

fn classify_parsed(
    status: Option<u16>,
    parsed: &VendorErrorBody,
    provider: &str,
    model: &str,
) -> LLMError {
    let message = parsed.message.as_str();
    let lower = message.to_ascii_lowercase();
    let error_type = parsed.error_type.as_deref().map(str::to_ascii_lowercase);
    let code = parsed.code.as_deref().map(str::to_ascii_lowercase);
    let type_is = |table: &[&str]| error_type.as_deref().is_some_and(|t| table.contains(&t));

    match status {
        Some(401 | 403) => return authentication(provider, message),
        Some(429) => return rate_limited(provider),
        Some(404) if lower.contains("model") => {
            return invalid_model(provider, model, message);
        }
        Some(code @ (502 | 504)) => return gateway_failure(code, message, provider),
        _ => {}
    }

    if type_is(&AUTH_TYPES[..]) {
        return authentication(provider, message);
    }
    if type_is(&THROTTLE_TYPES[..]) {
        return rate_limited(provider);
    }
    let context_code = code.as_deref().is_some_and(|c| CONTEXT_CODES.contains(&c));
    if context_code || contains_any(&lower, &CONTEXT_HINTS) {
        let (requested, max) = extract_token_counts(message);
        return LLMError::ContextTooLong(ContextLengthError {
            provider: provider.to_string(),
            model: model.to_string(),
            requested_tokens: requested,
            max_tokens: max,
        });
    }
    if contains_any(&lower, &THROTTLE_HINTS) {
        return rate_limited(provider);
    }
    if contains_any(&lower, &STREAMING_HINTS) {
        return LLMError::StreamingUnsupported(StreamingUnsupportedError {
            provider: provider.to_string(),
            model: model.to_string(),
            reason: message.to_string(),
        });
    }
    if matches!(status, Some(400..=499) | None) && contains_any(&lower, &AUTH_HINTS) {
        return authentication(provider, message);
    }
    if type_is(&NOT_FOUND_TYPES[..]) && lower.contains("model") {
        return invalid_model(provider, model, message);
    }

    let cause = match status {
        Some(400) => format!("validation error: {message}"),
        Some(404) => format!("not found: {message}"),
        Some(code) => format!("HTTP {code}: {message}"),
        None => format!("stream error: {message}"),
    };
    let err = ProviderError::new(provider, Some(model.to_string()), cause);
    LLMError::Provider(match status {
        Some(code) => err.with_status(code),
        None => err,
    })
}

fn authentication(provider: &str, reason: &str) -> LLMError {
    LLMError::Authentication(AuthenticationError {
        provider: provider.to_string(),
        reason: reason.to_string(),
    })
}

fn rate_limited(provider: &str) -> LLMError {
    LLMError::RateLimited(RateLimitError {
        provider: provider.to_string(),
        ..RateLimitError::default()
    })
}

fn invalid_model(provider: &str, model: &str, message: &str) -> LLMError {
    let model = if model.is_empty() {
        extract_model_identifier(message).unwrap_or_default()
    } else {
        model.to_string()
    };
    LLMError::InvalidModel(InvalidModelError {
        provider: provider.to_string(),
        model,
        supported_models: Vec::new(),
    })
}

// A gateway that could not reach the upstream is a connectivity failure, not a vendor
// verdict on the request.
fn gateway_failure(status: u16, body: &str, provider: &str) -> LLMError {
    LLMError::connection(provider, format!("HTTP {status}: {}", body.trim()))
}

fn apply_rate_limit_headers(rate: &mut RateLimitError, response: &HttpResponse) {
    for limit_type in ["requests", "tokens"] {
        let remaining = response
            .header(&format!("x-ratelimit-remaining-{limit_type}"))
            .and_then(|v| v.trim().parse::<u64>().ok());
        let limit = response
            .header(&format!("x-ratelimit-limit-{limit_type}"))
            .and_then(|v| v.trim().parse::<u64>().ok());
        if let (Some(0), Some(limit)) = (remaining, limit) {
            rate.limit_type = Some(limit_type.to_string());
            rate.usage = Some(limit);
            rate.limit = Some(limit);
            return;
        }
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

static MAX_THEN_REQUESTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)maximum context length is (\d+) tokens.*?(?:resulted in|requested) (\d+)")
        .expect("static regex")
});

static REQUESTED_THEN_MAX: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)has (\d+) tokens.*?supports (\d+)",
        r"(?i)requested (\d+).*?maximum (\d+)",
        r"(?i)(\d+) tokens\s*>\s*(\d+)",
        r"(?i)(\d+) tokens.*?(?:supports|maximum|limit)\D*?(\d+)",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("static regex"))
    .collect()
});

static REQUESTED_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+) tokens").expect("static regex"));

/// Pulls `(requested, max)` token counts out of a context-length message.
pub(crate) fn extract_token_counts(message: &str) -> (Option<u64>, Option<u64>) {
    let number = |caps: &regex::Captures<'_>, idx: usize| {
        caps.get(idx).and_then(|m| m.as_str().parse::<u64>().ok())
    };

    if let Some(caps) = MAX_THEN_REQUESTED.captures(message) {
        return (number(&caps, 2), number(&caps, 1));
    }
    for pattern in REQUESTED_THEN_MAX.iter() {
        if let Some(caps) = pattern.captures(message) {
            return (number(&caps, 1), number(&caps, 2));
        }
    }
    if let Some(caps) = REQUESTED_ONLY.captures(message) {
        return (number(&caps, 1), None);
    }
    (None, None)
}

/// Attempts to extract a model identifier quoted inside an error message.
pub(crate) fn extract_model_identifier(message: &str) -> Option<String> {
    for delimiter in ['`', '"', '\''] {
        if let Some(value) = between_delimiters(message, delimiter) {
            if !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

fn between_delimiters(message: &str, delimiter: char) -> Option<String> {
    let start = message.find(delimiter)? + delimiter.len_utf8();
    let len = message[start..].find(delimiter)?;
    Some(message[start..start + len].to_string())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn representative_responses_classify_to_each_kind() {
        let table: [(u16, &str, ErrorKind); 13] = [
            (401, r#"{"error":{"message":"Incorrect API key provided"}}"#, ErrorKind::Authentication),
            (403, r#"{"message":"expired token"}"#, ErrorKind::Authentication),
            (400, r#"{"message":"The security token included in the request is invalid"}"#, ErrorKind::Authentication),
            (429, r#"{"message":"Rate exceeded"}"#, ErrorKind::RateLimited),
            (400, r#"{"__type":"ThrottlingException","message":"slow down"}"#, ErrorKind::RateLimited),
            (400, r#"{"message":"Prompt is too long... 150000 tokens... supports 100000"}"#, ErrorKind::ContextTooLong),
            (404, r#"{"error":{"type":"not_found_error","message":"model: claude-2"}}"#, ErrorKind::InvalidModel),
            (404, "The model `gpt-5` does not exist", ErrorKind::InvalidModel),
            (400, r#"{"message":"streaming is not supported for this model"}"#, ErrorKind::StreamingUnsupported),
            (502, "<html>Bad Gateway</html>", ErrorKind::ConnectionFailed),
            (504, r#"{"message":"upstream timed out"}"#, ErrorKind::ConnectionFailed),
            (400, r#"{"message":"messages: field required"}"#, ErrorKind::Provider),
            (500, "not json at all", ErrorKind::Provider),
        ];

        for (status, body, expected) in table {
            let err = classify(status, body, "bedrock", "anthropic.claude-v2");
            assert_eq!(err.kind(), expected, "status {status} body {body}: got {err:?}");
        }
    }

    // Vendor-message dependent: these phrasings are not guaranteed stable across API versions.
    #[test]
    fn context_length_counts_follow_vendor_phrasing() {
        let cases = [
            (
                "Prompt is too long... 150000 tokens... supports 100000",
                (Some(150000), Some(100000)),
            ),
            (
                "This model's maximum context length is 8192 tokens. However, your messages resulted in 9000 tokens.",
                (Some(9000), Some(8192)),
            ),
            (
                "prompt is too long: 208310 tokens > 200000 maximum",
                (Some(208310), Some(200000)),
            ),
            (
                "Input has 5000 tokens but the model only supports 4096",
                (Some(5000), Some(4096)),
            ),
            ("requested 3000, maximum 2048 tokens", (Some(3000), Some(2048))),
            ("too many tokens: 12000 tokens", (Some(12000), None)),
            ("context window exceeded", (None, None)),
        ];

        for (message, expected) in cases {
            assert_eq!(extract_token_counts(message), expected, "message: {message}");
        }
    }

    #[test]
    fn context_length_wins_over_generic_bad_request() {
        let err = classify(
            400,
            r#"{"error":{"message":"Request exceeds maximum allowed input","type":"invalid_request_error"}}"#,
            "openai",
            "gpt-4",
        );
        match err {
            LLMError::ContextTooLong(ctx) => {
                assert_eq!(ctx.provider, "openai");
                assert_eq!(ctx.model, "gpt-4");
            }
            other => panic!("expected ContextTooLong, got {other:?}"),
        }

        let err = classify(
            400,
            r#"{"error":{"message":"bad","code":"context_length_exceeded"}}"#,
            "openai",
            "gpt-4",
        );
        assert_eq!(err.kind(), ErrorKind::ContextTooLong);
    }

    #[test]
    fn malformed_bodies_degrade_to_provider_error_with_status() {
        let err = classify(500, "<html>oops</html>", "azure", "gpt-4o");
        match err {
            LLMError::Provider(provider) => {
                assert_eq!(provider.status, Some(500));
                assert_eq!(provider.model.as_deref(), Some("gpt-4o"));
                assert!(provider.to_string().contains("HTTP 500: <html>oops</html>"));
            }
            other => panic!("expected Provider, got {other:?}"),
        }

        let err = classify(401, "denied", "azure", "gpt-4o");
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn not_found_without_model_mention_is_generic() {
        let err = classify(404, r#"{"message":"route /v2/chat does not exist"}"#, "meta", "llama");
        match err {
            LLMError::Provider(provider) => assert_eq!(provider.status, Some(404)),
            other => panic!("expected Provider, got {other:?}"),
        }
    }

    #[test]
    fn invalid_model_falls_back_to_quoted_identifier() {
        let err = classify(
            404,
            r#"{"error":{"message":"Model `gemini-pro-oops` not found.","status":"NOT_FOUND"}}"#,
            "gemini",
            "",
        );
        match err {
            LLMError::InvalidModel(invalid) => assert_eq!(invalid.model, "gemini-pro-oops"),
            other => panic!("expected InvalidModel, got {other:?}"),
        }
    }

    #[test]
    fn parses_common_envelopes() {
        let parsed = parse_error_body(r#"{"error":{"message":"m","type":"t","code":42}}"#)
            .expect("parsed");
        assert_eq!(parsed.message, "m");
        assert_eq!(parsed.error_type.as_deref(), Some("t"));
        assert_eq!(parsed.code.as_deref(), Some("42"));

        let parsed = parse_error_body(r#"{"error":"plain"}"#).expect("parsed");
        assert_eq!(parsed.message, "plain");

        let parsed = parse_error_body(
            r#"{"__type":"com.amazon.coral.validate#ValidationException","message":"bad"}"#,
        )
        .expect("parsed");
        assert_eq!(parsed.error_type.as_deref(), Some("ValidationException"));

        let parsed = parse_error_body(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )
        .expect("parsed");
        assert_eq!(parsed.error_type.as_deref(), Some("overloaded_error"));

        assert!(parse_error_body("[1,2]").is_none());
        assert!(parse_error_body(r#"{"unrelated":true}"#).is_none());
    }

    #[test]
    fn classify_response_threads_retry_after_and_quota_headers() {
        let response = HttpResponse {
            status: 429,
            headers: HashMap::from([
                ("Retry-After".to_string(), "17".to_string()),
                ("x-ratelimit-limit-tokens".to_string(), "40000".to_string()),
                ("x-ratelimit-remaining-tokens".to_string(), "0".to_string()),
            ]),
            body: br#"{"error":{"message":"Rate limit reached"}}"#.to_vec(),
        };

        match classify_response(&response, "openai", "gpt-4") {
            LLMError::RateLimited(rate) => {
                assert_eq!(rate.retry_after, Some(17));
                assert_eq!(rate.limit_type.as_deref(), Some("tokens"));
                assert_eq!(rate.limit, Some(40000));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn stream_errors_classify_by_vendor_type() {
        let parsed = VendorErrorBody {
            message: "Overloaded".into(),
            error_type: Some("overloaded_error".into()),
            code: None,
        };
        match classify_vendor_error(&parsed, "anthropic", "claude") {
            LLMError::Provider(err) => {
                assert_eq!(err.status, None);
                assert!(err.to_string().contains("stream error: Overloaded"));
            }
            other => panic!("expected Provider, got {other:?}"),
        }

        let parsed = VendorErrorBody {
            message: "slow down".into(),
            error_type: Some("rate_limit_error".into()),
            code: None,
        };
        assert_eq!(
            classify_vendor_error(&parsed, "anthropic", "claude").kind(),
            ErrorKind::RateLimited
        );
    }
}
