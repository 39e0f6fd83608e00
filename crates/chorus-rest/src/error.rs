//! REST error types

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// REST dispatcher error type
///
/// Callers distinguish `Api` (the server rejected the request) from `HttpTransport`
/// (the call never completed successfully).
#[derive(Debug, Error)]
pub enum RestError {
    /// Network failure, timeout, or 5xx after all retries
    #[error("{method} {path} failed: {message}")]
    HttpTransport {
        message: String,
        /// Last HTTP status seen, if a response arrived at all
        status: Option<u16>,
        method: String,
        path: String,
    },

    /// Structured rejection reported by the remote service
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Body could not be encoded, or a response could not be decoded into the requested type
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RestError {
    /// HTTP status associated with this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpTransport { status, .. } => *status,
            Self::Api(e) => Some(e.status),
            Self::InvalidRequest(_) | Self::Serialization(_) => None,
        }
    }
}

/// Error body returned by the remote service for rejected requests
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub errors: Option<Value>,
}

/// A 4xx response with the decoded error body attached
#[derive(Debug, Clone, Error)]
#[error("{message} (code {code}, status {status}, {method} {path})")]
pub struct ApiError {
    /// Server message followed by one line per nested field error
    pub message: String,
    pub code: u32,
    pub status: u16,
    pub method: String,
    pub path: String,
    /// Raw nested error object
    pub errors: Option<Value>,
}

impl ApiError {
    pub fn from_body(body: ApiErrorBody, status: u16, method: String, path: String) -> Self {
        let mut message = body.message;
        if let Some(errors) = &body.errors {
            let flattened = flatten_errors(errors, "");
            if !flattened.is_empty() {
                message.push('\n');
                message.push_str(&flattened.join("\n"));
            }
        }

        Self {
            message,
            code: body.code,
            status,
            method,
            path,
            errors: body.errors,
        }
    }
}

/// Flatten the nested `errors` object into `field.path: message` lines
pub(crate) fn flatten_errors(value: &Value, key: &str) -> Vec<String> {
    let Value::Object(map) = value else {
        return Vec::new();
    };

    let mut messages = Vec::new();
    for (k, v) in map {
        if k == "message" {
            continue;
        }

        let new_key = if key.is_empty() {
            k.clone()
        } else if k.parse::<usize>().is_ok() {
            format!("{key}[{k}]")
        } else {
            format!("{key}.{k}")
        };

        if let Some(Value::Array(errors)) = v.get("_errors") {
            let joined = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join(" ");
            messages.push(format!("{new_key}: {joined}"));
        } else if v.get("code").is_some() || v.get("message").is_some() {
            let code = v.get("code").and_then(Value::as_str).unwrap_or_default();
            let text = v.get("message").and_then(Value::as_str).unwrap_or_default();
            if code.is_empty() {
                messages.push(text.trim().to_string());
            } else {
                messages.push(format!("{code}: {text}").trim().to_string());
            }
        } else if let Value::String(s) = v {
            messages.push(s.clone());
        } else {
            messages.extend(flatten_errors(v, &new_key));
        }
    }
    messages
}

/// Result type for REST operations
pub type RestResult<T> = Result<T, RestError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_nested_errors() {
        let errors = json!({
            "embeds": {
                "0": {
                    "title": {
                        "_errors": [{"code": "BASE_TYPE_MAX_LENGTH", "message": "Must be 256 or fewer in length."}]
                    }
                }
            },
            "content": {
                "_errors": [{"code": "BASE_TYPE_REQUIRED", "message": "This field is required"}]
            }
        });

        let mut flattened = flatten_errors(&errors, "");
        flattened.sort();
        assert_eq!(
            flattened,
            vec![
                "content: This field is required".to_string(),
                "embeds[0].title: Must be 256 or fewer in length.".to_string(),
            ]
        );
    }

    #[test]
    fn test_api_error_message() {
        let body: ApiErrorBody = serde_json::from_value(json!({
            "message": "Invalid Form Body",
            "code": 50035,
            "errors": {"content": {"_errors": [{"code": "X", "message": "Too long"}]}}
        }))
        .unwrap();

        let err = ApiError::from_body(body, 400, "POST".into(), "/channels/1/messages".into());
        assert_eq!(err.code, 50035);
        assert_eq!(err.message, "Invalid Form Body\ncontent: Too long");
        assert!(err.to_string().contains("status 400"));
        assert_eq!(RestError::from(err).status(), Some(400));
    }

    #[test]
    fn test_api_error_without_errors() {
        let body = ApiErrorBody {
            message: "Unknown Channel".into(),
            code: 10003,
            errors: None,
        };
        let err = ApiError::from_body(body, 404, "GET".into(), "/channels/9".into());
        assert_eq!(err.message, "Unknown Channel");
    }

    #[test]
    fn test_transport_error_display() {
        let err = RestError::HttpTransport {
            message: "Service unavailable".into(),
            status: Some(502),
            method: "GET".into(),
            path: "/gateway/bot".into(),
        };
        assert_eq!(err.to_string(), "GET /gateway/bot failed: Service unavailable");
        assert_eq!(err.status(), Some(502));
    }
}
