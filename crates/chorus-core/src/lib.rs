//! # chorus-core
//!
//! Primitives shared by the gateway and REST sides of the client: rate limit buckets,
//! snowflake identifiers and gateway intents. Nothing in here performs I/O.

pub mod ratelimit;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use ratelimit::{RateBucket, RateLimitHeaders};
pub use value_objects::{Intents, Snowflake, SnowflakeGenerator, SnowflakeParseError};
