//! Local stand-in for the completions endpoint.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};

use crate::config::AppConfig;

pub type RequestLog = Arc<Mutex<Vec<serde_json::Value>>>;

pub fn sse_body(deltas: &[&str]) -> String {
  let mut body = String::new();
  body.push_str("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n");
  for delta in deltas {
    let chunk = serde_json::json!({ "choices": [{ "delta": { "content": delta } }] });
    body.push_str(&format!("data: {chunk}\n\n"));
  }
  body.push_str("data: [DONE]\n\n");
  body
}

#[derive(Clone)]
struct MockState {
  requests: RequestLog,
  status: StatusCode,
  body: String,
}

async fn completions(State(state): State<MockState>, Json(body): Json<serde_json::Value>) -> Response {
  state.requests.lock().unwrap().push(body);
  if state.status.is_success() {
    ([(header::CONTENT_TYPE, "text/event-stream")], state.body.clone()).into_response()
  } else {
    (state.status, state.body.clone()).into_response()
  }
}

/// Serves `body` for every completion request and records the request JSON.
pub async fn mock_server(status: StatusCode, body: String) -> (AppConfig, RequestLog) {
  let requests = RequestLog::default();
  let state = MockState {
    requests: requests.clone(),
    status,
    body,
  };
  let app = Router::new()
    .route("/v1/chat/completions", post(completions))
    .with_state(state);

  let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
  listener.set_nonblocking(true).unwrap();
  let port = listener.local_addr().unwrap().port();
  let listener = tokio::net::TcpListener::from_std(listener).unwrap();
  tokio::spawn(async move {
    let _ = axum::serve(listener, app).await;
  });

  let config = AppConfig {
    api_base: format!("http://127.0.0.1:{port}/v1"),
    ..AppConfig::default()
  };
  (config, requests)
}

pub fn temp_dir(prefix: &str) -> std::path::PathBuf {
  let dir = std::env::temp_dir().join(format!("capturechat-{prefix}-{}", uuid::Uuid::new_v4()));
  std::fs::create_dir_all(&dir).unwrap();
  dir
}
