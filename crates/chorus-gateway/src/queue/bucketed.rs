use super::{bucket_for, release, ConnectQueue, ReleasePacer, SessionBucket};
use crate::shard::ShardHandle;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Groups shards by `id % max_concurrency` and releases a whole group at once
#[derive(Debug)]
pub struct BucketedQueue {
    max_concurrency: u32,
    groups: BTreeMap<u32, Vec<ShardHandle>>,
    pacer: ReleasePacer,
}

impl BucketedQueue {
    pub fn new(max_concurrency: u32, session: SessionBucket) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
            groups: BTreeMap::new(),
            pacer: ReleasePacer::new(session),
        }
    }

    pub fn max_concurrency(&self) -> u32 {
        self.max_concurrency
    }

    /// Number of non-empty groups waiting
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[async_trait]
impl ConnectQueue for BucketedQueue {
    fn add(&mut self, shard: ShardHandle) {
        let group = self
            .groups
            .entry(bucket_for(shard.id(), self.max_concurrency))
            .or_default();
        if group.iter().any(|queued| queued.id() == shard.id()) {
            return;
        }
        group.push(shard);
    }

    async fn drain(&mut self) {
        while let Some((key, mut group)) = self.groups.pop_first() {
            // A group larger than the remaining session budget goes out in slices
            while !group.is_empty() {
                let budget = self.pacer.wait().await;
                let slice: Vec<ShardHandle> = group.drain(..budget.min(group.len())).collect();
                tracing::debug!(
                    bucket = key,
                    shards = slice.len(),
                    held_back = group.len(),
                    "Releasing shard group"
                );
                for shard in &slice {
                    release(shard);
                }
                self.pacer.released(slice.len()).await;
            }
        }
    }

    fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }
}
