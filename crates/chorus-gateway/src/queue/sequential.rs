use super::{release, ConnectQueue, ReleasePacer, SessionBucket};
use crate::shard::ShardHandle;
use async_trait::async_trait;
use std::collections::VecDeque;

/// Releases one shard at a time, in the order they were added
#[derive(Debug)]
pub struct SequentialQueue {
    waiting: VecDeque<ShardHandle>,
    pacer: ReleasePacer,
}

impl SequentialQueue {
    pub fn new(session: SessionBucket) -> Self {
        Self {
            waiting: VecDeque::new(),
            pacer: ReleasePacer::new(session),
        }
    }
}

#[async_trait]
impl ConnectQueue for SequentialQueue {
    fn add(&mut self, shard: ShardHandle) {
        if self.waiting.iter().any(|queued| queued.id() == shard.id()) {
            return;
        }
        self.waiting.push_back(shard);
    }

    async fn drain(&mut self) {
        while let Some(shard) = self.waiting.pop_front() {
            self.pacer.wait().await;
            release(&shard);
            self.pacer.released(1).await;
        }
    }

    fn len(&self) -> usize {
        self.waiting.len()
    }
}
