//! Value objects - small immutable types used across the client

mod intents;
mod snowflake;

pub use intents::Intents;
pub use snowflake::{Snowflake, SnowflakeGenerator, SnowflakeParseError};
