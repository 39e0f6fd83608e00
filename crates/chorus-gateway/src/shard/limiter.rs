//! Outbound command rate limits

use crate::protocol::OpCode;
use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;

/// Commands per minute on one connection
pub const COMMANDS_PER_MINUTE: u32 = 120;

/// Presence updates per minute on one connection
pub const PRESENCE_UPDATES_PER_MINUTE: u32 = 5;

/// Slots per minute kept free for heartbeats, identify and resume
pub const RESERVED_CONTROL_COMMANDS: u32 = 10;

/// Frames the shard itself sends to keep the session alive; never rate limited here
pub fn is_control(op: OpCode) -> bool {
    matches!(op, OpCode::Heartbeat | OpCode::Identify | OpCode::Resume)
}

/// Per-connection token buckets for application commands
///
/// Presence updates draw from both buckets. Control frames bypass the limiter and spend
/// the reserved slots instead, so they never queue behind application traffic.
pub struct CommandLimiter {
    general: DefaultDirectRateLimiter,
    presence: DefaultDirectRateLimiter,
    clock: DefaultClock,
}

fn per_minute(count: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(count).unwrap_or(NonZeroU32::MIN))
}

impl CommandLimiter {
    pub fn new() -> Self {
        Self::with_limits(
            COMMANDS_PER_MINUTE - RESERVED_CONTROL_COMMANDS,
            PRESENCE_UPDATES_PER_MINUTE,
        )
    }

    pub fn with_limits(general: u32, presence: u32) -> Self {
        Self {
            general: RateLimiter::direct(per_minute(general)),
            presence: RateLimiter::direct(per_minute(presence)),
            clock: DefaultClock::default(),
        }
    }

    /// Take a slot for an application command, or report how long until one frees up
    pub fn check(&self, op: OpCode) -> Result<(), Duration> {
        if is_control(op) {
            return Ok(());
        }
        if op == OpCode::PresenceUpdate {
            self.presence
                .check()
                .map_err(|not_until| not_until.wait_time_from(self.clock.now()))?;
        }
        self.general
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

impl Default for CommandLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandLimiter").finish_non_exhaustive()
    }
}
