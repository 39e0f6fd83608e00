//! Rate-limited request dispatcher

use crate::bucket::RouteBuckets;
use crate::error::{ApiError, ApiErrorBody, RestError, RestResult};
use crate::global::GlobalLimit;
use crate::request::{encode_reason, RequestOptions};
use crate::response::RestResponse;
use crate::route::route_key;
use bytes::Bytes;
use chorus_common::RestConfig;
use chorus_core::{RateBucket, RateLimitHeaders, SnowflakeGenerator};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::instrument;

const AUDIT_LOG_REASON: &str = "x-audit-log-reason";

/// Used when a 429 carries no usable wait at all
const FALLBACK_RETRY_AFTER: Duration = Duration::from_secs(1);

/// One logical call, alive across all of its retries
struct PendingRequest<'a> {
    method: Method,
    path: &'a str,
    route: String,
    options: &'a RequestOptions,
    /// Transport failures and 5xx responses seen so far
    attempt: u32,
}

/// Outcome of a single HTTP exchange
enum Attempt {
    Success(RestResponse),
    /// Throttled; retried without counting against the retry ceiling
    RateLimited { retry_after: Duration, global: bool },
    ServerError(StatusCode),
    Transport(reqwest::Error),
    Rejected(ApiError),
}

struct DispatcherInner {
    client: Client,
    config: RestConfig,
    user_agent: String,
    buckets: RouteBuckets,
    global: GlobalLimit,
    ids: SnowflakeGenerator,
}

/// HTTP dispatcher that waits out per-route and global rate limits
///
/// Cheap to clone; clones share buckets and the global limit.
#[derive(Clone)]
pub struct RequestDispatcher {
    inner: Arc<DispatcherInner>,
}

impl RequestDispatcher {
    pub fn new(config: RestConfig) -> RestResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| RestError::InvalidRequest(format!("Failed to build HTTP client: {e}")))?;

        let user_agent = match &config.user_agent_suffix {
            Some(suffix) => format!(
                "DiscordBot (chorus, {}) {}",
                env!("CARGO_PKG_VERSION"),
                suffix.trim()
            ),
            None => format!("DiscordBot (chorus, {})", env!("CARGO_PKG_VERSION")),
        };

        let ids = SnowflakeGenerator::new(config.worker_id, 0);

        Ok(Self {
            inner: Arc::new(DispatcherInner {
                client,
                config,
                user_agent,
                buckets: RouteBuckets::new(),
                global: GlobalLimit::new(),
                ids,
            }),
        })
    }

    pub fn config(&self) -> &RestConfig {
        &self.inner.config
    }

    pub fn user_agent(&self) -> &str {
        &self.inner.user_agent
    }

    /// Shared global-limit gate
    pub fn global_limit(&self) -> &GlobalLimit {
        &self.inner.global
    }

    /// Snapshot of the bucket for a method and path
    pub async fn bucket(&self, method: &Method, path: &str) -> RateBucket {
        let bucket = self.inner.buckets.get(&route_key(method, path));
        let guard = bucket.lock().await;
        guard.clone()
    }

    pub async fn get(&self, path: &str) -> RestResult<RestResponse> {
        self.request(Method::GET, path, RequestOptions::default()).await
    }

    /// Dispatch a request and decode the JSON response into `T`
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> RestResult<T> {
        let response = self.request(method, path, options).await?;
        Ok(response.json()?)
    }

    /// Dispatch a request through its route bucket
    ///
    /// Calls on the same route run one at a time in arrival order. 429s are waited out
    /// transparently; transport failures and 5xx responses are retried up to
    /// `retry_limit` times.
    #[instrument(skip(self, options), fields(request_id = tracing::field::Empty, route = tracing::field::Empty))]
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> RestResult<RestResponse> {
        let route = route_key(&method, path);
        let request_id = self.inner.ids.generate();
        tracing::Span::current()
            .record("request_id", tracing::field::display(request_id))
            .record("route", tracing::field::display(&route));

        let bucket = self.inner.buckets.get(&route);
        let mut bucket = bucket.lock().await;

        let mut pending = PendingRequest {
            method,
            path,
            route,
            options: &options,
            attempt: 0,
        };

        loop {
            self.inner.global.wait().await;

            if let Some(wait) = bucket.wait_time(Instant::now()) {
                tracing::debug!(
                    route = %pending.route,
                    wait_ms = wait.as_millis() as u64,
                    "Waiting for rate limit bucket to reset"
                );
                tokio::time::sleep(wait).await;
            }
            bucket.consume(Instant::now());

            match self.execute(&pending, &mut bucket).await? {
                Attempt::Success(response) => return Ok(response),

                Attempt::RateLimited {
                    retry_after,
                    global,
                } => {
                    tracing::warn!(
                        route = %pending.route,
                        retry_after_ms = retry_after.as_millis() as u64,
                        global,
                        "Rate limited"
                    );
                    if global {
                        self.inner.global.install(retry_after);
                    } else {
                        tokio::time::sleep(retry_after).await;
                    }
                }

                Attempt::ServerError(status) => {
                    if pending.attempt < self.inner.config.retry_limit {
                        pending.attempt += 1;
                        tracing::warn!(
                            status = status.as_u16(),
                            attempt = pending.attempt,
                            "Server error, retrying"
                        );
                        continue;
                    }
                    let message = if status == StatusCode::BAD_GATEWAY {
                        "Service unavailable".to_string()
                    } else {
                        status
                            .canonical_reason()
                            .unwrap_or("Server error")
                            .to_string()
                    };
                    return Err(self.transport_error(&pending, message, Some(status.as_u16())));
                }

                Attempt::Transport(err) => {
                    if pending.attempt < self.inner.config.retry_limit {
                        pending.attempt += 1;
                        tracing::warn!(
                            error = %err,
                            attempt = pending.attempt,
                            "Request failed, retrying"
                        );
                        continue;
                    }
                    let message = if err.is_timeout() {
                        "Request timed out".to_string()
                    } else {
                        err.to_string()
                    };
                    return Err(self.transport_error(&pending, message, None));
                }

                Attempt::Rejected(err) => {
                    tracing::debug!(status = err.status, code = err.code, "Request rejected");
                    return Err(err.into());
                }
            }
        }
    }

    /// Perform one HTTP exchange and classify the result
    async fn execute(
        &self,
        pending: &PendingRequest<'_>,
        bucket: &mut RateBucket,
    ) -> RestResult<Attempt> {
        let builder = self.build(pending)?;

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => return Err(RestError::InvalidRequest(e.to_string())),
            Err(e) => return Ok(Attempt::Transport(e)),
        };

        let status = response.status();
        let headers = RateLimitHeaders::from_lookup(|name| {
            response.headers().get(name).and_then(|v| v.to_str().ok())
        });
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));

        bucket.observe(&headers, Instant::now());

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return Ok(Attempt::Transport(e)),
        };

        if status == StatusCode::TOO_MANY_REQUESTS {
            let body_json: Option<Value> = serde_json::from_slice(&body).ok();
            let global = headers.global
                || body_json
                    .as_ref()
                    .and_then(|b| b.get("global"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
            let retry_after = headers
                .retry_after
                .or_else(|| body_json.as_ref().and_then(retry_after_from_body))
                .or_else(|| bucket.wait_time(Instant::now()))
                .unwrap_or(FALLBACK_RETRY_AFTER);

            return Ok(Attempt::RateLimited {
                retry_after,
                global,
            });
        }

        if status.is_server_error() {
            return Ok(Attempt::ServerError(status));
        }

        if !status.is_success() {
            let error_body: ApiErrorBody = serde_json::from_slice(&body).unwrap_or_else(|_| {
                ApiErrorBody {
                    message: String::from_utf8_lossy(&body).into_owned(),
                    ..Default::default()
                }
            });
            return Ok(Attempt::Rejected(ApiError::from_body(
                error_body,
                status.as_u16(),
                pending.method.to_string(),
                pending.path.to_string(),
            )));
        }

        Ok(Attempt::Success(decode_body(body, is_json)?))
    }

    fn build(&self, pending: &PendingRequest<'_>) -> RestResult<reqwest::RequestBuilder> {
        let config = &self.inner.config;
        let options = pending.options;

        let url = if options.versioned {
            format!("{}{}", config.versioned_base(), pending.path)
        } else {
            format!("{}{}", config.api_base.trim_end_matches('/'), pending.path)
        };

        let mut builder = self
            .inner
            .client
            .request(pending.method.clone(), url)
            .timeout(config.timeout())
            .header(USER_AGENT, &self.inner.user_agent);

        if options.auth {
            builder = builder.header(AUTHORIZATION, format!("Bot {}", config.token));
        }
        if let Some(reason) = &options.reason {
            builder = builder.header(AUDIT_LOG_REASON, encode_reason(reason));
        }
        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if options.files.is_empty() {
            if let Some(body) = &options.body {
                builder = builder.json(body);
            }
        } else {
            let mut form = Form::new();
            for (index, file) in options.files.iter().enumerate() {
                let part = Part::bytes(file.data.to_vec()).file_name(file.name.clone());
                form = form.part(format!("files[{index}]"), part);
            }
            if let Some(body) = &options.body {
                form = form.text("payload_json", serde_json::to_string(body)?);
            }
            builder = builder.multipart(form);
        }

        Ok(builder)
    }

    fn transport_error(
        &self,
        pending: &PendingRequest<'_>,
        message: String,
        status: Option<u16>,
    ) -> RestError {
        RestError::HttpTransport {
            message,
            status,
            method: pending.method.to_string(),
            path: pending.path.to_string(),
        }
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDispatcher")
            .field("api_base", &self.inner.config.api_base)
            .field("routes", &self.inner.buckets.len())
            .field("global", &self.inner.global)
            .finish()
    }
}

/// `retry_after` from a 429 body, in seconds
fn retry_after_from_body(body: &Value) -> Option<Duration> {
    body.get("retry_after")
        .and_then(Value::as_f64)
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn decode_body(body: Bytes, is_json: bool) -> RestResult<RestResponse> {
    if is_json && !body.is_empty() {
        Ok(RestResponse::Json(serde_json::from_slice(&body)?))
    } else {
        Ok(RestResponse::Raw(body))
    }
}
