//! REST dispatcher integration tests
//!
//! Every test runs against an in-process mock API; no network access is needed.
//!
//! Run with: cargo test -p integration-tests --test rest_tests

use std::time::Duration;

use chorus_core::RateLimitHeaders;
use chorus_rest::{FileAttachment, Method, RequestOptions, RestError, RestResponse};
use futures_util::future::join_all;
use integration_tests::{gap, MockApi, MockResponse, TEST_TOKEN};
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;

// ============================================================================
// Request shape
// ============================================================================

#[tokio::test]
async fn test_request_headers_and_query() {
    let api = MockApi::start().await.expect("Failed to start mock API");
    api.respond("GET", "/v10/guilds/1/members", MockResponse::json(json!([])));
    let rest = api.dispatcher().unwrap();

    let options = RequestOptions::new()
        .query("limit", 100)
        .reason("Cleanup: old members")
        .header("x-test", "yes");
    rest.request(Method::GET, "/guilds/1/members", options)
        .await
        .unwrap();

    let requests = api.requests_to("/v10/guilds/1/members");
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.header("authorization"), Some(format!("Bot {TEST_TOKEN}").as_str()));
    assert!(request.header("user-agent").unwrap().starts_with("DiscordBot (chorus, "));
    assert_eq!(request.header("x-audit-log-reason"), Some("Cleanup%3A%20old%20members"));
    assert_eq!(request.header("x-test"), Some("yes"));
    assert_eq!(request.query.as_deref(), Some("limit=100"));
}

#[tokio::test]
async fn test_json_body_and_response() {
    let api = MockApi::start().await.expect("Failed to start mock API");
    api.respond(
        "POST",
        "/v10/channels/123/messages",
        MockResponse::json(json!({"id": "900", "content": "hello"})),
    );
    let rest = api.dispatcher().unwrap();

    let response = rest
        .request(
            Method::POST,
            "/channels/123/messages",
            RequestOptions::new().json(json!({"content": "hello"})),
        )
        .await
        .unwrap();
    assert_eq!(response.as_json().unwrap()["id"], "900");

    let request = &api.requests_to("/v10/channels/123/messages")[0];
    assert!(request.header("content-type").unwrap().starts_with("application/json"));
    let sent: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(sent, json!({"content": "hello"}));
}

#[tokio::test]
async fn test_multipart_upload() {
    let api = MockApi::start().await.expect("Failed to start mock API");
    api.respond("POST", "/v10/channels/5/messages", MockResponse::json(json!({"id": "1"})));
    let rest = api.dispatcher().unwrap();

    let options = RequestOptions::new()
        .json(json!({"content": "with file"}))
        .file(FileAttachment::new("notes.txt", &b"file contents"[..]));
    rest.request(Method::POST, "/channels/5/messages", options)
        .await
        .unwrap();

    let request = &api.requests_to("/v10/channels/5/messages")[0];
    assert!(request
        .header("content-type")
        .unwrap()
        .starts_with("multipart/form-data"));
    let body = String::from_utf8_lossy(&request.body);
    assert!(body.contains("name=\"files[0]\""));
    assert!(body.contains("filename=\"notes.txt\""));
    assert!(body.contains("file contents"));
    assert!(body.contains("name=\"payload_json\""));
    assert!(body.contains(r#"{"content":"with file"}"#));
}

#[tokio::test]
async fn test_unversioned_without_auth() {
    let api = MockApi::start().await.expect("Failed to start mock API");
    api.respond("GET", "/oauth2/keys", MockResponse::json(json!({"keys": []})));
    let rest = api.dispatcher().unwrap();

    rest.request(
        Method::GET,
        "/oauth2/keys",
        RequestOptions::new().unversioned().without_auth(),
    )
    .await
    .unwrap();

    let request = &api.requests_to("/oauth2/keys")[0];
    assert_eq!(request.header("authorization"), None);
}

#[tokio::test]
async fn test_empty_response_body() {
    let api = MockApi::start().await.expect("Failed to start mock API");
    api.respond("DELETE", "/v10/channels/1/messages/2", MockResponse::empty(204));
    let rest = api.dispatcher().unwrap();

    let response = rest
        .request(Method::DELETE, "/channels/1/messages/2", RequestOptions::new())
        .await
        .unwrap();
    assert!(response.is_empty());
    assert!(matches!(response, RestResponse::Raw(_)));
}

// ============================================================================
// Rate limits
// ============================================================================

#[tokio::test]
async fn test_exhausted_bucket_blocks_same_route_only() {
    let api = MockApi::start().await.expect("Failed to start mock API");
    api.enqueue(
        "POST",
        "/v10/channels/123/messages",
        MockResponse::json(json!({"id": "1"})).rate_limit(5, 0, 2.0),
    );
    api.respond("POST", "/v10/channels/123/messages", MockResponse::json(json!({"id": "2"})));
    api.respond("POST", "/v10/channels/456/messages", MockResponse::json(json!({"id": "3"})));
    let rest = api.dispatcher().unwrap();

    rest.request(Method::POST, "/channels/123/messages", RequestOptions::new())
        .await
        .unwrap();
    let start = Instant::now();

    let same_route = {
        let rest = rest.clone();
        tokio::spawn(async move {
            rest.request(Method::POST, "/channels/123/messages", RequestOptions::new())
                .await
        })
    };

    rest.request(Method::POST, "/channels/456/messages", RequestOptions::new())
        .await
        .unwrap();
    assert!(
        start.elapsed() < Duration::from_millis(1_000),
        "other channel was held back: {:?}",
        start.elapsed()
    );

    same_route.await.unwrap().unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(1_900), "waited only {elapsed:?}");

    let calls = api.requests_to("/v10/channels/123/messages");
    assert_eq!(calls.len(), 2);
    assert!(gap(&calls[0], &calls[1]) >= Duration::from_millis(1_900));
}

#[tokio::test]
async fn test_route_429_is_retried_after_wait() {
    let api = MockApi::start().await.expect("Failed to start mock API");
    api.enqueue("GET", "/v10/channels/9", MockResponse::too_many_requests(0.5, false));
    api.respond("GET", "/v10/channels/9", MockResponse::json(json!({"id": "9"})));
    let rest = api.dispatcher().unwrap();

    let response = rest.get("/channels/9").await.unwrap();
    assert_eq!(response.as_json().unwrap()["id"], "9");

    let calls = api.requests_to("/v10/channels/9");
    assert_eq!(calls.len(), 2);
    assert!(gap(&calls[0], &calls[1]) >= Duration::from_millis(450));
    assert!(!rest.global_limit().is_limited());
}

#[tokio::test]
async fn test_global_429_holds_every_route() {
    let api = MockApi::start().await.expect("Failed to start mock API");
    api.enqueue("GET", "/v10/users/@me", MockResponse::too_many_requests(1.0, true));
    api.respond("GET", "/v10/users/@me", MockResponse::json(json!({"id": "1"})));
    api.respond("GET", "/v10/gateway", MockResponse::json(json!({"url": "wss://g"})));
    let rest = api.dispatcher().unwrap();

    let first = {
        let rest = rest.clone();
        tokio::spawn(async move { rest.get("/users/@me").await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rest.global_limit().is_limited());

    rest.get("/gateway").await.unwrap();
    first.await.unwrap().unwrap();

    let limited = &api.requests_to("/v10/users/@me")[0];
    let other = &api.requests_to("/v10/gateway")[0];
    assert!(gap(limited, other) >= Duration::from_millis(900));
}

#[tokio::test]
async fn test_same_route_calls_run_in_order() {
    let api = MockApi::start().await.expect("Failed to start mock API");
    api.respond("GET", "/v10/channels/7/messages", MockResponse::json(json!([])));
    let rest = api.dispatcher().unwrap();

    let calls = (0..5).map(|i| {
        rest.request(
            Method::GET,
            "/channels/7/messages",
            RequestOptions::new().query("n", i),
        )
    });
    for result in join_all(calls).await {
        result.unwrap();
    }

    let queries: Vec<_> = api
        .requests_to("/v10/channels/7/messages")
        .into_iter()
        .map(|r| r.query.unwrap_or_default())
        .collect();
    assert_eq!(queries, vec!["n=0", "n=1", "n=2", "n=3", "n=4"]);
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
struct RateLimitedBody {
    message: String,
    retry_after: f64,
    global: bool,
}

#[tokio::test]
async fn test_rate_limit_headers_over_http() {
    let api = MockApi::start().await.expect("Failed to start mock API");
    api.respond(
        "GET",
        "/v10/channels/1",
        MockResponse::too_many_requests(1.5, true).rate_limit(5, 0, 1.5),
    );

    let response = api.client().get(api.url("/v10/channels/1")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 429);

    let headers = RateLimitHeaders::from_lookup(|name| {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    });
    assert_eq!(headers.limit, Some(5));
    assert_eq!(headers.remaining, Some(0));
    assert_eq!(headers.reset_after, Some(Duration::from_millis(1_500)));
    assert_eq!(headers.retry_after, Some(Duration::from_millis(1_500)));
    assert!(headers.global);
    assert_eq!(headers.scope.as_deref(), Some("global"));

    let body: RateLimitedBody = response.json().await.unwrap();
    assert_eq!(body.message, "You are being rate limited.");
    assert!((body.retry_after - 1.5).abs() < f64::EPSILON);
    assert!(body.global);
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_client_error_surfaces_api_error() {
    let api = MockApi::start().await.expect("Failed to start mock API");
    api.respond(
        "POST",
        "/v10/channels/1/messages",
        MockResponse::status(
            400,
            json!({
                "message": "Invalid Form Body",
                "code": 50035,
                "errors": {
                    "embeds": {"0": {"title": {"_errors": [
                        {"code": "BASE_TYPE_MAX_LENGTH", "message": "Must be 256 or fewer in length."}
                    ]}}}
                }
            }),
        ),
    );
    let rest = api.dispatcher().unwrap();

    let err = rest
        .request(Method::POST, "/channels/1/messages", RequestOptions::new())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(400));
    match err {
        RestError::Api(api_error) => {
            assert_eq!(api_error.code, 50035);
            assert_eq!(api_error.method, "POST");
            assert_eq!(api_error.path, "/channels/1/messages");
            assert!(api_error
                .message
                .contains("embeds[0].title: Must be 256 or fewer in length."));
        }
        other => panic!("expected Api error, got {other:?}"),
    }
    // Client errors are not retried
    assert_eq!(api.requests_to("/v10/channels/1/messages").len(), 1);
}

#[tokio::test]
async fn test_server_error_retried_then_succeeds() {
    let api = MockApi::start().await.expect("Failed to start mock API");
    api.enqueue("GET", "/v10/guilds/3", MockResponse::status(500, json!({"message": "oops"})));
    api.respond("GET", "/v10/guilds/3", MockResponse::json(json!({"id": "3"})));
    let rest = api.dispatcher().unwrap();

    let response = rest.get("/guilds/3").await.unwrap();
    assert_eq!(response.as_json().unwrap()["id"], "3");
    assert_eq!(api.requests_to("/v10/guilds/3").len(), 2);
}

#[tokio::test]
async fn test_bad_gateway_exhausts_retries() {
    let api = MockApi::start().await.expect("Failed to start mock API");
    api.respond("GET", "/v10/guilds/4", MockResponse::status(502, json!({})));
    let rest = api.dispatcher().unwrap();

    let err = rest.get("/guilds/4").await.unwrap_err();
    match err {
        RestError::HttpTransport {
            message, status, ..
        } => {
            assert_eq!(message, "Service unavailable");
            assert_eq!(status, Some(502));
        }
        other => panic!("expected transport error, got {other:?}"),
    }
    // One try plus `retry_limit` retries
    assert_eq!(api.requests_to("/v10/guilds/4").len(), 2);
}
