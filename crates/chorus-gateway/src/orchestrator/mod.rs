//! Shard orchestration
//!
//! Fetches the gateway bot info, spawns one task per shard, feeds them through the connect
//! queue and folds their events into a single [`OrchestratorEvent`] stream.

mod events;

pub use events::{OrchestratorEvent, ShardDescriptor};

use crate::error::{GatewayError, GatewayResult};
use crate::protocol::{Envelope, GatewayBotInfo};
use crate::queue::{queue_for, SessionBucket};
use crate::shard::{Shard, ShardConfig, ShardEvent, ShardHandle, ShardStatus};
use crate::transport::SharedConnector;
use chorus_common::GatewayConfig;
use chorus_core::RateBucket;
use chorus_rest::{Method, RequestDispatcher, RequestOptions};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Effective shard count; never below what the gateway recommends
pub fn effective_shard_count(configured: Option<u32>, recommended: u32) -> u32 {
    let recommended = recommended.max(1);
    match configured {
        Some(configured) if configured < recommended => {
            tracing::warn!(
                configured,
                recommended,
                "Configured shard count is below the recommended count, using recommended"
            );
            recommended
        }
        Some(configured) => configured,
        None => recommended,
    }
}

struct Inner {
    total_shards: u32,
    shards: DashMap<u32, ShardHandle>,
    descriptors: DashMap<u32, ShardDescriptor>,
    ready: AtomicBool,
    shutting_down: AtomicBool,
}

impl Inner {
    fn destroy_all(&self) {
        for shard in &self.shards {
            // Already-ended shards have nothing left to destroy
            let _ = shard.destroy();
        }
    }

    fn all_ready(&self) -> bool {
        self.descriptors
            .iter()
            .all(|descriptor| descriptor.status == ShardStatus::Ready)
    }
}

/// Owns every shard of one bot connection
pub struct ShardOrchestrator {
    inner: Arc<Inner>,
    shard_tasks: Mutex<Vec<JoinHandle<()>>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    coordinator: JoinHandle<()>,
}

impl ShardOrchestrator {
    /// Fetch `/gateway/bot` and start every shard
    pub async fn connect(
        rest: &RequestDispatcher,
        gateway: GatewayConfig,
        connector: SharedConnector,
    ) -> GatewayResult<(Self, mpsc::UnboundedReceiver<OrchestratorEvent>)> {
        let info: GatewayBotInfo = rest
            .request_json(Method::GET, "/gateway/bot", RequestOptions::default())
            .await?;

        tracing::info!(
            url = %info.url,
            recommended_shards = info.shards,
            sessions_remaining = info.session_start_limit.remaining,
            max_concurrency = info.session_start_limit.max_concurrency,
            "Fetched gateway info"
        );

        Self::start(rest.config().token.clone(), gateway, &info, connector)
    }

    /// Start every shard from already-fetched gateway info
    pub fn start(
        token: String,
        gateway: GatewayConfig,
        info: &GatewayBotInfo,
        connector: SharedConnector,
    ) -> GatewayResult<(Self, mpsc::UnboundedReceiver<OrchestratorEvent>)> {
        if token.is_empty() {
            return Err(GatewayError::InvalidConfig("Bot token is empty".to_string()));
        }

        let total_shards = effective_shard_count(gateway.shard_count, info.shards);
        let limit = &info.session_start_limit;
        let session: SessionBucket = Arc::new(tokio::sync::Mutex::new(RateBucket::with_budget(
            "session_start",
            limit.total,
            limit.remaining,
            Duration::from_millis(limit.reset_after),
            Instant::now(),
        )));
        let mut queue = queue_for(limit.max_concurrency, session);

        let inner = Arc::new(Inner {
            total_shards,
            shards: DashMap::new(),
            descriptors: DashMap::new(),
            ready: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        });

        let (shard_events_tx, shard_events_rx) = mpsc::unbounded_channel();
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel::<ShardHandle>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut shard_tasks = Vec::with_capacity(total_shards as usize);
        for id in 0..total_shards {
            let config = ShardConfig::new(id, total_shards, token.clone(), info.url.clone(), &gateway);
            let (shard, handle) = Shard::new(config, connector.clone(), shard_events_tx.clone());
            shard_tasks.push(tokio::spawn(shard.run()));

            inner.descriptors.insert(id, ShardDescriptor::new(id, total_shards));
            inner.shards.insert(id, handle.clone());
            // The receiver lives in the coordinator spawned below
            let _ = queue_tx.send(handle);
        }
        // Only shards hold event senders, so the event loop ends when the last shard does
        drop(shard_events_tx);

        tracing::info!(
            total_shards,
            max_concurrency = limit.max_concurrency,
            "Shards spawned"
        );

        let coordinator = tokio::spawn(async move {
            while let Some(handle) = queue_rx.recv().await {
                queue.add(handle);
                while let Ok(handle) = queue_rx.try_recv() {
                    queue.add(handle);
                }
                queue.drain().await;
            }
            tracing::debug!("Connect queue closed");
        });

        let event_loop = tokio::spawn(run_event_loop(
            Arc::clone(&inner),
            shard_events_rx,
            queue_tx,
            events_tx,
        ));

        let orchestrator = Self {
            inner,
            shard_tasks: Mutex::new(shard_tasks),
            event_loop: Mutex::new(Some(event_loop)),
            coordinator,
        };

        Ok((orchestrator, events_rx))
    }

    pub fn shard_count(&self) -> u32 {
        self.inner.total_shards
    }

    /// True once every shard has been ready; stays true across reconnects
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Mean heartbeat latency over shards that have measured one
    pub fn latency(&self) -> Option<Duration> {
        let samples: Vec<u64> = self
            .inner
            .descriptors
            .iter()
            .filter_map(|descriptor| descriptor.latency_ms)
            .collect();
        if samples.is_empty() {
            return None;
        }
        let total: u64 = samples.iter().sum();
        Some(Duration::from_millis(total / samples.len() as u64))
    }

    pub fn status(&self, shard_id: u32) -> Option<ShardStatus> {
        self.inner
            .descriptors
            .get(&shard_id)
            .map(|descriptor| descriptor.status)
    }

    /// Snapshot of every shard, ordered by id
    pub fn descriptors(&self) -> Vec<ShardDescriptor> {
        let mut descriptors: Vec<_> = self
            .inner
            .descriptors
            .iter()
            .map(|descriptor| descriptor.value().clone())
            .collect();
        descriptors.sort_by_key(|descriptor| descriptor.id);
        descriptors
    }

    /// Send a command on one shard; held until that shard is ready
    pub fn send(&self, shard_id: u32, envelope: Envelope) -> GatewayResult<()> {
        let shard = self.inner.shards.get(&shard_id).ok_or_else(|| {
            GatewayError::InvalidConfig(format!(
                "Shard {shard_id} out of range (total {})",
                self.inner.total_shards
            ))
        })?;
        shard.send(envelope)
    }

    /// Send the same command on every shard
    pub fn broadcast(&self, envelope: &Envelope) -> GatewayResult<()> {
        for shard in self.inner.shards.iter() {
            shard.send(envelope.clone())?;
        }
        Ok(())
    }

    /// Destroy every shard and wait for their tasks to finish
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            tracing::debug!("Shutdown already in progress");
        }
        tracing::info!(total_shards = self.inner.total_shards, "Shutting down shards");

        self.coordinator.abort();
        self.inner.destroy_all();

        let tasks = std::mem::take(&mut *self.shard_tasks.lock());
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Shard task panicked");
            }
        }

        let event_loop = self.event_loop.lock().take();
        if let Some(event_loop) = event_loop {
            if let Err(e) = event_loop.await {
                tracing::error!(error = %e, "Event loop panicked");
            }
        }
        tracing::info!("Shutdown complete");
    }
}

impl Drop for ShardOrchestrator {
    fn drop(&mut self) {
        self.coordinator.abort();
    }
}

async fn run_event_loop(
    inner: Arc<Inner>,
    mut shard_events: mpsc::UnboundedReceiver<ShardEvent>,
    queue: mpsc::UnboundedSender<ShardHandle>,
    events: mpsc::UnboundedSender<OrchestratorEvent>,
) {
    let emit = |event: OrchestratorEvent| {
        let _ = events.send(event);
    };

    while let Some(event) = shard_events.recv().await {
        match event {
            ShardEvent::StatusChanged { shard_id, status } => {
                if let Some(mut descriptor) = inner.descriptors.get_mut(&shard_id) {
                    descriptor.status = status;
                }
                if status == ShardStatus::Ready {
                    emit(OrchestratorEvent::ShardReady { shard_id });
                    if inner.all_ready() && !inner.ready.swap(true, Ordering::AcqRel) {
                        tracing::info!(shard_count = inner.total_shards, "All shards ready");
                        emit(OrchestratorEvent::Ready {
                            shard_count: inner.total_shards,
                        });
                    }
                }
            }
            ShardEvent::Dispatch { shard_id, envelope } => {
                emit(OrchestratorEvent::Dispatch { shard_id, envelope });
            }
            ShardEvent::Latency { shard_id, latency } => {
                if let Some(mut descriptor) = inner.descriptors.get_mut(&shard_id) {
                    descriptor.latency_ms = Some(latency.as_millis() as u64);
                }
            }
            ShardEvent::Reconnect {
                shard_id,
                resumable,
            } => {
                if inner.shutting_down.load(Ordering::Acquire) {
                    continue;
                }
                emit(OrchestratorEvent::Reconnecting {
                    shard_id,
                    resumable,
                });
                if let Some(handle) = inner.shards.get(&shard_id) {
                    if queue.send(handle.clone()).is_err() {
                        tracing::warn!(shard_id, "Connect queue gone, shard not re-queued");
                    }
                }
            }
            ShardEvent::Fatal {
                shard_id,
                code,
                reason,
            } => {
                tracing::error!(shard_id, code = ?code, reason = %reason, "Fatal shard close, shutting down");
                emit(OrchestratorEvent::Fatal {
                    shard_id,
                    code,
                    reason,
                });
                inner.shutting_down.store(true, Ordering::Release);
                inner.destroy_all();
            }
            ShardEvent::Debug { shard_id, message } => {
                emit(OrchestratorEvent::Debug {
                    shard_id: Some(shard_id),
                    message,
                });
            }
            ShardEvent::Error { shard_id, message } => {
                emit(OrchestratorEvent::Error {
                    shard_id: Some(shard_id),
                    message,
                });
            }
        }
    }

    emit(OrchestratorEvent::Shutdown);
}
