//! In-process WebDriver endpoint for tests.
//!
//! Every request is recorded; a responder closure decides the reply.

use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode, Uri};
use axum::Json;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub method: Method,
    pub path: String,
    pub body: Value,
}

type Responder = dyn Fn(&Method, &str, &Value) -> (StatusCode, Value) + Send + Sync;

struct FakeState {
    requests: Mutex<Vec<Recorded>>,
    respond: Box<Responder>,
}

pub(crate) struct FakeWebDriver {
    pub url: String,
    state: Arc<FakeState>,
}

impl FakeWebDriver {
    pub async fn spawn<F>(respond: F) -> Self
    where
        F: Fn(&Method, &str, &Value) -> (StatusCode, Value) + Send + Sync + 'static,
    {
        let state = Arc::new(FakeState {
            requests: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        });
        let app = axum::Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            state,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }
}

async fn handle(
    State(state): State<Arc<FakeState>>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let path = uri.path().to_string();
    let (status, reply) = (state.respond)(&method, &path, &body);
    state.requests.lock().unwrap().push(Recorded { method, path, body });
    (status, Json(reply))
}

/// `{"value": value}` with 200.
pub(crate) fn ok(value: Value) -> (StatusCode, Value) {
    (StatusCode::OK, json!({ "value": value }))
}

/// A W3C error object with status 500.
pub(crate) fn w3c_error(error: &str) -> (StatusCode, Value) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "value": { "error": error, "message": "fake failure", "stacktrace": "" } }),
    )
}
