use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use relaycore::executor::default_retry_policy;
use relaycore::http::reqwest::{ReqwestTransport, TransportConfig};
use relaycore::provider::OpenAiCompatProvider;
use relaycore::stream::EventKind;
use relaycore::{ErrorKind, Event, LLMError, LLMProvider, Message};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider(server: &MockServer) -> OpenAiCompatProvider {
    let transport = ReqwestTransport::new(TransportConfig::default()).expect("transport");
    OpenAiCompatProvider::new(Arc::new(transport), "test-key")
        .with_base_url(server.uri())
        .with_default_model("gpt-4")
        .with_retry_policy(
            default_retry_policy()
                .with_max_retries(2)
                .with_initial_backoff(Duration::from_millis(10))
                .with_max_backoff(Duration::from_millis(20)),
        )
}

#[tokio::test]
async fn chat_round_trip_against_mock_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({"model": "gpt-4", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "model": "gpt-4-0613",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hello there"}}],
            "usage": {"prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = provider(&server)
        .chat(&CancellationToken::new(), &[Message::user("Hello")], &[])
        .await
        .expect("chat");

    assert_eq!(response.content, "Hello there");
    assert_eq!(response.model, "gpt-4-0613");
    assert_eq!(response.usage.total_tokens, 11);
}

#[tokio::test]
async fn transient_503_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "gpt-4",
            "choices": [{"message": {"content": "recovered"}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = provider(&server)
        .chat(&CancellationToken::new(), &[Message::user("Hello")], &[])
        .await
        .expect("chat after retry");
    assert_eq!(response.content, "recovered");
}

#[tokio::test]
async fn persistent_429_exhausts_retries_and_keeps_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "12")
                .set_body_json(json!({"error": {"message": "Rate limit reached"}})),
        )
        .expect(3)
        .mount(&server)
        .await;

    let err = provider(&server)
        .chat(&CancellationToken::new(), &[Message::user("Hello")], &[])
        .await
        .expect_err("rate limited");

    match &err {
        LLMError::RetriesExhausted { retries, source } => {
            assert_eq!(*retries, 2);
            assert_eq!(source.kind(), ErrorKind::RateLimited);
        }
        other => panic!("unexpected error type: {other:?}"),
    }
    assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
    assert!(err.to_string().contains("after 2 retries"));
}

#[tokio::test]
async fn context_length_400_is_classified_with_token_counts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "message": "This model's maximum context length is 8192 tokens. However, you requested 10000 tokens.",
                "type": "invalid_request_error",
                "code": "context_length_exceeded"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = provider(&server)
        .chat(&CancellationToken::new(), &[Message::user("long")], &[])
        .await
        .expect_err("too long");
    match err {
        LLMError::ContextTooLong(err) => {
            assert_eq!(err.provider, "openai");
            assert_eq!(err.model, "gpt-4");
            assert_eq!(err.requested_tokens, Some(10000));
            assert_eq!(err.max_tokens, Some(8192));
        }
        other => panic!("unexpected error type: {other:?}"),
    }
}

#[tokio::test]
async fn sse_stream_is_normalized() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: [DONE]\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let events: Vec<Event> = provider(&server)
        .stream(CancellationToken::new(), &[Message::user("Hi")], &[])
        .await
        .expect("stream")
        .collect()
        .await;

    let kinds: Vec<EventKind> = events.iter().map(Event::kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Start, EventKind::Delta, EventKind::Delta, EventKind::End]
    );
    assert_eq!(events[1].content(), "Hel");
    assert_eq!(events[2].content(), "lo");
    assert_eq!(events[3].content(), "Hello");
    assert!(events[3].is_done());
}

#[tokio::test]
async fn unreachable_server_is_a_connection_failure() {
    let transport = ReqwestTransport::new(TransportConfig::default()).expect("transport");
    let provider = OpenAiCompatProvider::new(Arc::new(transport), "test-key")
        .with_base_url("http://127.0.0.1:1")
        .with_default_model("gpt-4")
        .with_retry_policy(
            default_retry_policy()
                .with_max_retries(1)
                .with_initial_backoff(Duration::from_millis(5)),
        );

    let err = provider
        .chat(&CancellationToken::new(), &[Message::user("Hello")], &[])
        .await
        .expect_err("connection refused");
    match err {
        LLMError::RetriesExhausted { source, .. } => {
            assert_eq!(source.kind(), ErrorKind::ConnectionFailed);
        }
        other => panic!("unexpected error type: {other:?}"),
    }
}
