//! HTTP-level tests for the OpenAI-compatible gateway against a wiremock server.

use delve_core::config::{GatewayConfig, RetryConfig};
use delve_core::error::LlmError;
use delve_core::{
    CompletionGateway, CompletionOutcome, CompletionRequest, Message, OpenAiCompatibleGateway,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway_for(server: &MockServer, timeout_secs: u64) -> OpenAiCompatibleGateway {
    let config = GatewayConfig {
        base_url: format!("{}/v1/", server.uri()),
        timeout_secs,
        retry: RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        },
        ..GatewayConfig::default()
    };
    OpenAiCompatibleGateway::new_with_key(&config, "test-key".into()).unwrap()
}

fn request(enable_search: bool) -> CompletionRequest {
    CompletionRequest {
        model: "test-model".into(),
        messages: vec![
            Message::system("You are a researcher."),
            Message::user("Search for [[rust]]"),
        ],
        temperature: 0.3,
        max_tokens: 512,
        enable_search,
    }
}

fn text_reply(text: &str) -> Value {
    json!({
        "choices": [{
            "message": { "role": "assistant", "content": text },
            "finish_reason": "stop"
        }]
    })
}

fn tool_call_reply() -> Value {
    json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": "google_search", "arguments": "{\"query\":\"rust\"}" }
                }]
            },
            "finish_reason": "tool_calls"
        }]
    })
}

async fn bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.body_json::<Value>().unwrap())
        .collect()
}

#[tokio::test]
async fn test_plain_completion_without_tools() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("  hello  ")))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = gateway_for(&server, 5).invoke(request(false)).await.unwrap();
    assert_eq!(outcome, CompletionOutcome::content("hello"));

    let sent = bodies(&server).await;
    assert_eq!(sent[0]["model"], "test-model");
    assert_eq!(sent[0]["messages"][1]["role"], "user");
    assert!(sent[0].get("tools").is_none());
}

#[tokio::test]
async fn test_search_tool_call_is_acknowledged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({ "tool_choice": "auto" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_reply()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("Rust is popular.")))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = gateway_for(&server, 5).invoke(request(true)).await.unwrap();
    assert_eq!(outcome, CompletionOutcome::content("Rust is popular."));

    let sent = bodies(&server).await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0]["tools"][0]["function"]["name"], "google_search");

    let second = &sent[1];
    assert!(second.get("tools").is_none());
    let messages = second["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2]["tool_calls"][0]["id"], "call_1");
    assert_eq!(messages[3]["role"], "tool");
    assert_eq!(messages[3]["tool_call_id"], "call_1");
    assert_eq!(
        messages[3]["content"],
        "[Tool call processed for google_search with args: {\"query\":\"rust\"}]"
    );
}

#[tokio::test]
async fn test_unresolved_tool_call_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_reply()))
        .expect(2)
        .mount(&server)
        .await;

    let outcome = gateway_for(&server, 5).invoke(request(true)).await.unwrap();
    assert_eq!(
        outcome,
        CompletionOutcome::tool_invocation("google_search", json!({ "query": "rust" }))
    );
}

#[tokio::test]
async fn test_tool_call_with_search_disabled_makes_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_reply()))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = gateway_for(&server, 5).invoke(request(false)).await.unwrap();
    assert!(matches!(outcome, CompletionOutcome::ToolInvocation { .. }));
}

#[tokio::test]
async fn test_empty_reply_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("   ")))
        .mount(&server)
        .await;

    let err = gateway_for(&server, 5)
        .invoke(request(false))
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::ResponseParse { .. }));
}

#[tokio::test]
async fn test_http_error_mapping() {
    let cases: Vec<(u16, Value, fn(&LlmError) -> bool)> = vec![
        (
            401,
            json!({ "error": { "message": "bad key" } }),
            |e: &LlmError| matches!(e, LlmError::AuthFailed { .. }),
        ),
        (
            429,
            json!({ "error": { "message": "Rate limit reached, try again in 7s" } }),
            |e: &LlmError| matches!(e, LlmError::RateLimited { retry_after_secs: 7 }),
        ),
        (
            503,
            json!({ "error": { "message": "overloaded" } }),
            |e: &LlmError| matches!(e, LlmError::ApiRequest { message } if message.starts_with("Server error (503)")),
        ),
        (
            400,
            json!({ "error": { "message": "unknown model" } }),
            |e: &LlmError| matches!(e, LlmError::ApiRequest { message } if message.contains("unknown model")),
        ),
    ];

    for (status, body, check) in cases {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&server)
            .await;

        let err = gateway_for(&server, 5)
            .invoke(request(false))
            .await
            .unwrap_err();
        assert!(check(&err), "status {status} mapped to {err:?}");
    }
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(text_reply("late"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let err = gateway_for(&server, 1)
        .invoke(request(false))
        .await
        .unwrap_err();
    assert!(matches!(err, LlmError::Timeout { timeout_secs: 1 }));
}

#[tokio::test]
async fn test_transient_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(
            json!({ "error": { "message": "Rate limit reached, try again in 0s" } }),
        ))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("recovered")))
        .mount(&server)
        .await;

    let config = GatewayConfig {
        base_url: server.uri(),
        retry: RetryConfig {
            max_retries: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        },
        ..GatewayConfig::default()
    };
    let gateway = OpenAiCompatibleGateway::new_with_key(&config, "k".into()).unwrap();
    let outcome = gateway.invoke(request(false)).await.unwrap();
    assert_eq!(outcome.as_text(), Some("recovered"));
}
