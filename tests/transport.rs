//! Answer transport against a mock backend

use claire_client::{AnswerSource, Error, RagClient};
use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;
use common::http_client;

#[tokio::test]
async fn test_answer_body_is_streamed_as_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/rag/initial_query"))
        .and(body_json(json!({
            "query": "What is X?",
            "session_id": "s-1"
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("X is a concept about Y. Café.", "text/plain"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = RagClient::new(http_client(), &server.uri());
    let mut stream = client.ask("What is X?", "s-1").await.unwrap();

    let mut answer = String::new();
    while let Some(fragment) = stream.next().await {
        answer.push_str(&fragment.unwrap());
    }

    assert_eq!(answer, "X is a concept about Y. Café.");
    assert!(stream.is_released());
}

#[tokio::test]
async fn test_error_status_fails_before_streaming() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/rag/initial_query"))
        .respond_with(ResponseTemplate::new(500).set_body_string("index not ready"))
        .mount(&server)
        .await;

    let client = RagClient::new(http_client(), &server.uri());
    let err = client.ask("What is X?", "s-1").await.unwrap_err();

    assert!(matches!(err, Error::Transport { status: 500 }));
    assert_eq!(err.status(), Some(500));
}

#[tokio::test]
async fn test_trailing_slash_in_base_url() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/rag/initial_query"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let client = RagClient::new(http_client(), &format!("{}/", server.uri()));
    let stream = client.ask("q", "s-1").await.unwrap();
    let fragments: Vec<String> = stream.map(Result::unwrap).collect().await;

    assert_eq!(fragments.concat(), "ok");
}
