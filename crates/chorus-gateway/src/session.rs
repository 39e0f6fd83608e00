//! Session state
//!
//! Survives reconnects of one shard slot so a dropped connection can be resumed.

use crate::protocol::{ReadyInfo, ResumePayload};

/// Resumable session bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Session id from READY; `None` until the first READY
    pub id: Option<String>,
    /// Highest sequence seen on the current connection
    pub last_seq: Option<u64>,
    /// `last_seq` at the moment the previous connection closed
    pub closing_seq: Option<u64>,
    /// Host to reconnect to when resuming
    pub resume_url: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a dispatch sequence; gaps are logged, never rejected
    pub fn observe_sequence(&mut self, seq: u64) {
        match self.last_seq {
            Some(last) if seq > last.saturating_add(1) => {
                tracing::debug!(last, seq, "Sequence gap");
            }
            Some(last) if seq <= last => {
                tracing::trace!(last, seq, "Out of order or replayed sequence");
            }
            _ => {}
        }
        self.last_seq = Some(self.last_seq.map_or(seq, |last| last.max(seq)));
    }

    /// Record the session established by READY
    pub fn on_ready(&mut self, ready: ReadyInfo) {
        tracing::debug!(session_id = %ready.session_id, "Session established");
        self.id = Some(ready.session_id);
        self.resume_url = ready.resume_gateway_url;
    }

    /// Snapshot the sequence of a connection that just closed
    ///
    /// Sequence tracking restarts as unknown until the next connection sees a dispatch.
    pub fn on_close(&mut self) {
        if let Some(seq) = self.last_seq.take() {
            self.closing_seq = Some(seq);
        }
    }

    /// Discard everything; the next handshake will be a fresh identify
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Resume is attempted iff a session id is known
    pub fn is_resumable(&self) -> bool {
        self.id.is_some()
    }

    /// Sequence to resume from
    pub fn resume_seq(&self) -> Option<u64> {
        self.last_seq.or(self.closing_seq)
    }

    /// Resume payload, if a session is known
    pub fn resume_payload(&self, token: &str) -> Option<ResumePayload> {
        self.id.as_ref().map(|id| ResumePayload {
            token: token.to_string(),
            session_id: id.clone(),
            seq: self.resume_seq(),
        })
    }
}
