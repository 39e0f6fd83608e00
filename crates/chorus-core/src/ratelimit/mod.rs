//! Rate limit bookkeeping shared by the REST dispatcher and the gateway connect queue

mod bucket;
pub mod headers;

pub use bucket::{RateBucket, REACTION_RESET_PADDING};
pub use headers::RateLimitHeaders;
