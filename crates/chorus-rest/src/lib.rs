//! # chorus-rest
//!
//! HTTP request dispatcher that discovers per-route and global rate limits from response
//! headers and transparently waits them out.

mod bucket;
mod dispatcher;
mod error;
mod global;
mod request;
mod response;
mod route;

pub use bucket::RouteBuckets;
pub use dispatcher::RequestDispatcher;
pub use error::{ApiError, RestError, RestResult};
pub use global::GlobalLimit;
pub use request::{FileAttachment, RequestOptions};
pub use response::RestResponse;
pub use route::{route_key, MAJOR_PARAMETERS};

/// HTTP method, re-exported so callers need not depend on the HTTP client directly
pub use reqwest::Method;
