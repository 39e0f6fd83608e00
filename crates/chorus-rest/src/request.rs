//! Request options

use bytes::Bytes;
use serde_json::Value;

/// A file uploaded alongside a request as a multipart part
#[derive(Debug, Clone)]
pub struct FileAttachment {
    pub name: String,
    pub data: Bytes,
}

impl FileAttachment {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Per-request options
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Query string pairs
    pub query: Vec<(String, String)>,
    /// JSON body; sent as `payload_json` when files are attached
    pub body: Option<Value>,
    pub files: Vec<FileAttachment>,
    /// Audit log reason
    pub reason: Option<String>,
    /// Send the `Authorization` header
    pub auth: bool,
    /// Prefix the path with the API version
    pub versioned: bool,
    /// Extra headers
    pub headers: Vec<(String, String)>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            query: Vec::new(),
            body: None,
            files: Vec::new(),
            reason: None,
            auth: true,
            versioned: true,
            headers: Vec::new(),
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    #[must_use]
    pub fn file(mut self, file: FileAttachment) -> Self {
        self.files.push(file);
        self
    }

    #[must_use]
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn without_auth(mut self) -> Self {
        self.auth = false;
        self
    }

    #[must_use]
    pub fn unversioned(mut self) -> Self {
        self.versioned = false;
        self
    }
}

/// Percent-encode an audit log reason for use as a header value
pub(crate) fn encode_reason(reason: &str) -> String {
    urlencoding::encode(reason).into_owned()
}
