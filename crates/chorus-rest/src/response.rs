//! Decoded response bodies

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Body of a successful response
#[derive(Debug, Clone, PartialEq)]
pub enum RestResponse {
    /// `application/json` body
    Json(Value),
    /// Any other content type, or an empty body
    Raw(Bytes),
}

impl RestResponse {
    /// Decode a JSON body into a typed value
    pub fn json<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        match self {
            Self::Json(value) => serde_json::from_value(value),
            Self::Raw(bytes) => serde_json::from_slice(&bytes),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Raw(bytes) if bytes.is_empty())
    }
}
