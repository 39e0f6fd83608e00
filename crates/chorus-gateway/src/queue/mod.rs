//! Connect queue
//!
//! Shards never open a connection on their own. They are added to a queue which releases
//! them under the session start limit: at most one release per [`RELEASE_INTERVAL`], and
//! never while the shared session-start bucket is exhausted.

mod bucketed;
mod sequential;

pub use bucketed::BucketedQueue;
pub use sequential::SequentialQueue;

use crate::shard::ShardHandle;
use async_trait::async_trait;
use chorus_core::RateBucket;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Minimum spacing between two releases
pub const RELEASE_INTERVAL: Duration = Duration::from_secs(5);

/// Session start budget shared by every queue of one orchestrator
pub type SessionBucket = Arc<Mutex<RateBucket>>;

/// Paces shard connects
#[async_trait]
pub trait ConnectQueue: Send {
    /// Queue a shard; a shard already waiting is not added twice
    fn add(&mut self, shard: ShardHandle);

    /// Release every queued shard, sleeping between releases as needed
    async fn drain(&mut self);

    /// Number of shards waiting
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Group a shard belongs to under `max_concurrency`
pub fn bucket_for(shard_id: u32, max_concurrency: u32) -> u32 {
    shard_id % max_concurrency.max(1)
}

/// Sequential when only one identify may run at a time, bucketed otherwise
pub fn queue_for(max_concurrency: u32, session: SessionBucket) -> Box<dyn ConnectQueue> {
    if max_concurrency <= 1 {
        Box::new(SequentialQueue::new(session))
    } else {
        Box::new(BucketedQueue::new(max_concurrency, session))
    }
}

/// Spacing and budget checks shared by both queue kinds
#[derive(Debug)]
struct ReleasePacer {
    interval: Duration,
    last_release: Option<Instant>,
    session: SessionBucket,
}

impl ReleasePacer {
    fn new(session: SessionBucket) -> Self {
        Self {
            interval: RELEASE_INTERVAL,
            last_release: None,
            session,
        }
    }

    /// Sleep for the longer of the interval remainder and the session bucket window
    ///
    /// Returns how many session starts may be spent by the release that follows; never zero.
    async fn wait(&self) -> usize {
        loop {
            let now = Instant::now();
            let spacing = self
                .last_release
                .map(|last| (last + self.interval).saturating_duration_since(now))
                .unwrap_or_default();
            let (window, available) = {
                let session = self.session.lock().await;
                (session.wait_time(now).unwrap_or_default(), session.available(now))
            };

            let wait = spacing.max(window);
            if wait.is_zero() {
                return available.map_or(usize::MAX, |n| (n as usize).max(1));
            }

            tracing::debug!(
                wait_ms = wait.as_millis() as u64,
                spacing_ms = spacing.as_millis() as u64,
                window_ms = window.as_millis() as u64,
                "Waiting before next shard release"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Record a release of `shards` connects
    async fn released(&mut self, shards: usize) {
        let now = Instant::now();
        let mut session = self.session.lock().await;
        for _ in 0..shards {
            session.consume(now);
        }
        self.last_release = Some(now);
    }
}

/// Tell a shard to connect; a shard whose task has ended is skipped
fn release(shard: &ShardHandle) {
    tracing::info!(shard_id = shard.id(), "Releasing shard");
    if shard.connect().is_err() {
        tracing::warn!(shard_id = shard.id(), "Shard task gone, skipping release");
    }
}
