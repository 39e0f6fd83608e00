//! Process-wide global rate limit
//!
//! When the server reports the global limit, one call installs a shared timeout future and
//! every dispatch path awaits it before touching its own bucket.

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

struct GlobalTimeout {
    until: Instant,
    sleep: Shared<BoxFuture<'static, ()>>,
}

/// Shared global-limit gate
#[derive(Default)]
pub struct GlobalLimit {
    timeout: Mutex<Option<GlobalTimeout>>,
}

impl GlobalLimit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a global timeout is currently active
    pub fn is_limited(&self) -> bool {
        self.timeout
            .lock()
            .as_ref()
            .is_some_and(|t| Instant::now() < t.until)
    }

    /// Wait out the active global timeout, if any
    pub async fn wait(&self) {
        let pending = {
            let mut guard = self.timeout.lock();
            let now = Instant::now();
            if guard.as_ref().is_some_and(|t| now >= t.until) {
                *guard = None;
            }
            guard.as_ref().map(|t| t.sleep.clone())
        };

        if let Some(sleep) = pending {
            tracing::debug!("Waiting for global rate limit");
            sleep.await;
        }
    }

    /// Install a global timeout
    ///
    /// Returns `false` without changing anything when an unexpired timeout is already
    /// installed, so concurrent 429s do not stack their waits.
    pub fn install(&self, duration: Duration) -> bool {
        let mut guard = self.timeout.lock();
        let now = Instant::now();

        if guard.as_ref().is_some_and(|t| now < t.until) {
            return false;
        }

        tracing::warn!(retry_after_ms = duration.as_millis() as u64, "Global rate limit hit");

        *guard = Some(GlobalTimeout {
            until: now + duration,
            sleep: tokio::time::sleep(duration).boxed().shared(),
        });
        true
    }
}

impl std::fmt::Debug for GlobalLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalLimit")
            .field("limited", &self.is_limited())
            .finish()
    }
}
