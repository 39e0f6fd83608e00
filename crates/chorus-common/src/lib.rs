//! # chorus-common
//!
//! Shared utilities: configuration loading and tracing setup.

pub mod config;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    AppSettings, ClientConfig, Compression, ConfigError, Encoding, Environment, GatewayConfig,
    RestConfig,
};
pub use telemetry::{try_init_tracing, try_init_tracing_with_config, TracingConfig, TracingError};
