//! Heartbeat bookkeeping
//!
//! The shard owns the timer through [`Heartbeater::deadline`]; this type only decides what
//! happens on each tick.

use std::time::Duration;
use tokio::time::Instant;

/// What the shard must do on a heartbeat tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a heartbeat now
    Send,
    /// The previous heartbeat was never acknowledged on a steady connection
    Zombie,
}

#[derive(Debug, Default)]
pub struct Heartbeater {
    interval: Option<Duration>,
    next_tick: Option<Instant>,
    acked: bool,
    last_sent: Option<Instant>,
    latency: Option<Duration>,
}

impl Heartbeater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer; `jitter` in `[0, 1]` scales the first interval only
    pub fn start(&mut self, interval: Duration, jitter: f64) {
        let first = interval.mul_f64(jitter.clamp(0.0, 1.0));
        self.interval = Some(interval);
        self.next_tick = Some(Instant::now() + first);
        self.acked = true;
        self.last_sent = None;
        tracing::debug!(
            interval_ms = interval.as_millis() as u64,
            first_ms = first.as_millis() as u64,
            "Heartbeat started"
        );
    }

    /// Disarm the timer
    pub fn stop(&mut self) {
        self.interval = None;
        self.next_tick = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_tick.is_some()
    }

    /// When the next tick is due, if armed
    pub fn deadline(&self) -> Option<Instant> {
        self.next_tick
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Decide the outcome of a tick and schedule the next one
    ///
    /// `expecting_silence` is true while identifying or resuming, when the server may
    /// legitimately hold acks back.
    pub fn tick(&mut self, expecting_silence: bool) -> HeartbeatAction {
        let now = Instant::now();
        self.next_tick = self.interval.map(|interval| now + interval);

        if !self.acked && !expecting_silence {
            return HeartbeatAction::Zombie;
        }

        self.acked = false;
        self.last_sent = Some(now);
        HeartbeatAction::Send
    }

    /// Record a heartbeat sent outside the timer, e.g. on server request
    pub fn sent(&mut self) {
        self.acked = false;
        self.last_sent = Some(Instant::now());
    }

    /// Record an ack; returns the round-trip latency
    pub fn ack(&mut self) -> Option<Duration> {
        self.acked = true;
        if let Some(sent) = self.last_sent {
            self.latency = Some(sent.elapsed());
        }
        self.latency
    }

    /// Forget an outstanding heartbeat, e.g. once the session is established
    pub fn reset_ack(&mut self) {
        self.acked = true;
    }

    pub fn is_acked(&self) -> bool {
        self.acked
    }

    /// Latest measured round trip
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }
}
