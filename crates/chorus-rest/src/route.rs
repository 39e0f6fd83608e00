//! Route resolution
//!
//! Maps a method and path to the key of the rate limit bucket it belongs to.

use reqwest::Method;

/// Path segments whose following id stays part of the bucket key
pub const MAJOR_PARAMETERS: &[&str] = &["channels", "guilds", "webhooks"];

/// Resolve the bucket key for a request
///
/// Numeric segments collapse to `:id` unless they follow a major parameter, so per-channel
/// and per-guild limits stay distinct while per-message limits share one bucket. Every
/// sub-route of `reactions` shares the reaction bucket.
pub fn route_key(method: &Method, path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();

    let mut key = String::with_capacity(path.len());
    let mut previous = "";

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        if previous == "reactions" {
            break;
        }

        key.push('/');
        if is_id(segment) && !MAJOR_PARAMETERS.contains(&previous) {
            key.push_str(":id");
        } else {
            key.push_str(segment);
        }
        previous = segment;
    }

    if key.is_empty() {
        key.push('/');
    }

    format!("{method} {key}")
}

fn is_id(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}
