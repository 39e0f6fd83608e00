//! Test helpers for integration tests
//!
//! Provides a scriptable mock REST API that records every request it receives.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use bytes::Bytes;
use chorus_common::RestConfig;
use chorus_rest::RequestDispatcher;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Token the mock expects in `Authorization: Bot <token>`
pub const TEST_TOKEN: &str = "test-token";

/// One request seen by the mock
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub at: Instant,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Canned response
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    headers: Vec<(String, String)>,
    body: Option<Value>,
}

impl MockResponse {
    /// 200 with a JSON body
    pub fn json(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            headers: Vec::new(),
            body: Some(body),
        }
    }

    /// Arbitrary status with a JSON body
    pub fn status(status: u16, body: Value) -> Self {
        Self {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    /// Status with no body at all
    pub fn empty(status: u16) -> Self {
        Self {
            body: None,
            ..Self::status(status, Value::Null)
        }
    }

    /// 429 carrying `retry-after` both as header and in the body
    pub fn too_many_requests(retry_after_secs: f64, global: bool) -> Self {
        let mut response = Self::status(
            429,
            json!({
                "message": "You are being rate limited.",
                "retry_after": retry_after_secs,
                "global": global,
            }),
        )
        .header("retry-after", retry_after_secs.to_string());
        if global {
            response = response
                .header("x-ratelimit-global", "true")
                .header("x-ratelimit-scope", "global");
        }
        response
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    /// Per-route budget headers
    pub fn rate_limit(self, limit: u32, remaining: u32, reset_after_secs: f64) -> Self {
        self.header("x-ratelimit-limit", limit.to_string())
            .header("x-ratelimit-remaining", remaining.to_string())
            .header("x-ratelimit-reset-after", reset_after_secs.to_string())
    }
}

impl IntoResponse for MockResponse {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(name, value);
            }
        }

        match self.body {
            Some(body) => (self.status, headers, Json(body)).into_response(),
            None => (self.status, headers).into_response(),
        }
    }
}

#[derive(Default)]
struct MockState {
    /// One-shot responses, consumed in order
    scripted: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    /// Used once the script for a route is exhausted
    defaults: Mutex<HashMap<String, MockResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl MockState {
    fn next_response(&self, key: &str) -> MockResponse {
        if let Some(response) = self
            .scripted
            .lock()
            .get_mut(key)
            .and_then(VecDeque::pop_front)
        {
            return response;
        }
        self.defaults
            .lock()
            .get(key)
            .cloned()
            .unwrap_or_else(|| MockResponse::status(404, json!({"message": "404: Not Found", "code": 0})))
    }
}

/// Mock REST API served on an ephemeral local port
pub struct MockApi {
    pub addr: SocketAddr,
    state: Arc<MockState>,
    _handle: JoinHandle<()>,
}

impl MockApi {
    /// Start a new mock server
    pub async fn start() -> Result<Self> {
        let state = Arc::new(MockState::default());
        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));

        let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
        let addr = listener.local_addr()?;

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            state,
            _handle: handle,
        })
    }

    /// Base URL without the version segment
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Absolute URL for a path on this mock
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url())
    }

    /// Plain HTTP client for checking raw responses, bypassing the dispatcher
    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::new()
    }

    /// Dispatcher pointed at this mock
    pub fn config(&self) -> RestConfig {
        let mut config = RestConfig::new(TEST_TOKEN).with_api_base(self.base_url());
        config.timeout_ms = 5_000;
        config
    }

    pub fn dispatcher(&self) -> Result<RequestDispatcher> {
        Ok(RequestDispatcher::new(self.config())?)
    }

    /// Answer the next request to `METHOD path` with `response`
    pub fn enqueue(&self, method: &str, path: &str, response: MockResponse) {
        self.state
            .scripted
            .lock()
            .entry(route(method, path))
            .or_default()
            .push_back(response);
    }

    /// Answer every unscripted request to `METHOD path` with `response`
    pub fn respond(&self, method: &str, path: &str, response: MockResponse) {
        self.state.defaults.lock().insert(route(method, path), response);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// Requests to one path, in arrival order
    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

fn route(method: &str, path: &str) -> String {
    format!("{} {path}", method.to_uppercase())
}

async fn handle(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> MockResponse {
    let path = uri.path().to_string();
    let response = state.next_response(&route(method.as_str(), &path));

    state.requests.lock().push(RecordedRequest {
        method: method.to_string(),
        path,
        query: uri.query().map(str::to_string),
        headers,
        body,
        at: Instant::now(),
    });

    response
}

/// Elapsed time between two recorded requests
pub fn gap(earlier: &RecordedRequest, later: &RecordedRequest) -> Duration {
    later.at.saturating_duration_since(earlier.at)
}
