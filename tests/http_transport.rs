//! End-to-end tests against an in-process chat server

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use gptlov_client::protocol::decode_stream;
use gptlov_client::{
    AskRequest, AskTransport, ClientConfig, HttpTransport, Status, StreamErrorKind, StreamEvent,
    StreamingController,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct Recorded {
    requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn chat(
    State(recorded): State<Recorded>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let session_id = query.get("session_id").cloned();
    recorded
        .requests
        .lock()
        .unwrap()
        .push((session_id.clone(), body.clone()));

    let question = body["question"].as_str().unwrap_or_default();
    let session = session_id.unwrap_or_else(|| "sess-1".to_string());
    let stream = format!(
        "event: session_id\ndata: \"{session}\"\n\n\
         : keep-alive\n\n\
         event: status\r\ndata: \"Søker i lovdata\"\r\n\r\n\
         event: source\ndata: {{\"name\": \"Husleieloven\", \"page_content\": \"§ 1\", \"url\": \"https://lovdata.no/h\", \"updated_at\": \"2024-05-01\"}}\n\n\
         event: source_list\ndata: [\"Husleieloven\"]\n\n\
         event: chunk\ndata: Svar på: \n\n\
         event: chunk\ndata: {question}\n\n\
         event: done\ndata: true\n\n"
    );
    ([(header::CONTENT_TYPE, "text/event-stream")], stream)
}

async fn unavailable() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, "overloaded")
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn serve() -> (String, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/api/chat", post(chat))
        .route("/api/busy", post(unavailable))
        .route("/health", get(health))
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), recorded)
}

fn config(base: &str, path: &str) -> ClientConfig {
    ClientConfig {
        endpoint: format!("{base}{path}"),
        health_url: format!("{base}/health"),
        retry_base_delay: Duration::ZERO,
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_stream_decodes_over_http() {
    let (base, recorded) = serve().await;
    let transport = HttpTransport::new(&config(&base, "/api/chat")).unwrap();

    let request = AskRequest::new("Hva er X?")
        .with_session(Some("abc".to_string()))
        .with_top_k(Some(5));
    let body = transport.open(&request).await.unwrap();
    let events: Vec<StreamEvent> = decode_stream(body)
        .map(|event| event.unwrap())
        .collect()
        .await;

    let kinds: Vec<&str> = events.iter().map(StreamEvent::kind).collect();
    assert_eq!(
        kinds,
        vec!["session_id", "status", "source", "source_list", "chunk", "chunk", "done"]
    );
    assert_eq!(events[0], StreamEvent::SessionId("abc".to_string()));
    assert_eq!(events[4], StreamEvent::Chunk("Svar på: ".to_string()));

    let requests = recorded.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0.as_deref(), Some("abc"));
    assert_eq!(requests[0].1, json!({ "question": "Hva er X?", "top_k": 5 }));
}

#[tokio::test]
async fn test_status_classification() {
    let (base, _) = serve().await;

    let busy = HttpTransport::new(&config(&base, "/api/busy")).unwrap();
    let err = busy.open(&AskRequest::new("q")).await.err().unwrap();
    assert_eq!(err.kind, StreamErrorKind::ServerError);
    assert_eq!(err.status, Some(503));
    assert!(err.is_retryable());

    let missing = HttpTransport::new(&config(&base, "/api/nowhere")).unwrap();
    let err = missing.open(&AskRequest::new("q")).await.err().unwrap();
    assert_eq!(err.kind, StreamErrorKind::Rejected);
    assert_eq!(err.status, Some(404));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_health_check() {
    let (base, _) = serve().await;
    let transport = HttpTransport::new(&config(&base, "/api/chat")).unwrap();
    assert!(transport.health_check().await.unwrap());
}

#[tokio::test]
async fn test_refused_connection_is_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let transport = HttpTransport::new(&config(&base, "/api/chat")).unwrap();
    let err = transport.open(&AskRequest::new("q")).await.err().unwrap();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_controller_conversation_over_http() {
    let (base, recorded) = serve().await;
    let transport = HttpTransport::new(&config(&base, "/api/chat")).unwrap();
    let handle = StreamingController::spawn(config(&base, "/api/chat"), transport, None);

    handle.ask("Hva er X?").await.unwrap();
    let first = tokio::time::timeout(Duration::from_secs(5), handle.settled())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, Status::Done);
    assert_eq!(first.session_id.as_deref(), Some("sess-1"));
    assert_eq!(first.conversation[1].content, "Svar på: Hva er X?");
    assert_eq!(first.conversation[1].sources, vec!["Husleieloven"]);
    assert!(first.sources["Husleieloven"].updated_at.is_some());

    handle.ask("Og Y?").await.unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), handle.settled())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.conversation.len(), 4);
    assert_eq!(second.conversation[3].content, "Svar på: Og Y?");

    let requests = recorded.requests.lock().unwrap();
    assert_eq!(requests[0].0, None);
    assert_eq!(requests[1].0.as_deref(), Some("sess-1"));
}
