//! Per-route bucket registry
//!
//! Uses `DashMap` for concurrent lookup; each route's bucket sits behind a fair async
//! mutex so calls on the same route run one at a time in arrival order.

use chorus_core::RateBucket;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Lazily created rate limit buckets keyed by route
#[derive(Debug, Default)]
pub struct RouteBuckets {
    buckets: DashMap<String, Arc<Mutex<RateBucket>>>,
}

impl RouteBuckets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the bucket for a route
    pub fn get(&self, route: &str) -> Arc<Mutex<RateBucket>> {
        if let Some(bucket) = self.buckets.get(route) {
            return Arc::clone(&bucket);
        }

        self.buckets
            .entry(route.to_string())
            .or_insert_with(|| {
                tracing::trace!(route = %route, "Created rate limit bucket");
                Arc::new(Mutex::new(RateBucket::new(route)))
            })
            .clone()
    }

    /// Number of routes seen so far
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
