//! Shard task

use super::{
    connection_url, CommandLimiter, ShardCommand, ShardConfig, ShardEvent, ShardHandle,
    ShardStatus,
};
use crate::codec::{codec_for, Codec};
use crate::compression::{decompressor_for, Decompressor};
use crate::error::{GatewayError, GatewayResult};
use crate::heartbeat::{HeartbeatAction, Heartbeater};
use crate::protocol::{
    classify, CloseAction, CloseCode, Envelope, OpCode, ReadyInfo, ZOMBIE_CLOSE_CODE,
};
use crate::session::SessionState;
use crate::transport::{SharedConnector, Transport, WireFrame};
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One gateway connection slot
///
/// Created with [`Shard::new`] and driven by spawning [`Shard::run`].
pub struct Shard {
    config: ShardConfig,
    status: ShardStatus,
    connector: SharedConnector,
    codec: Box<dyn Codec>,
    decompressor: Box<dyn Decompressor>,
    transport: Option<Box<dyn Transport>>,
    heartbeater: Heartbeater,
    session: SessionState,
    limiter: CommandLimiter,
    /// Application commands waiting for the session or for a rate limit slot
    outbox: VecDeque<Envelope>,
    /// When the front of the outbox may be retried after hitting a limit
    outbox_retry_at: Option<Instant>,
    hello_deadline: Option<Instant>,
    connect_failures: u32,
    commands: mpsc::UnboundedReceiver<ShardCommand>,
    events: mpsc::UnboundedSender<ShardEvent>,
}

impl Shard {
    pub fn new(
        config: ShardConfig,
        connector: SharedConnector,
        events: mpsc::UnboundedSender<ShardEvent>,
    ) -> (Self, ShardHandle) {
        let (tx, commands) = mpsc::unbounded_channel();
        let handle = ShardHandle::new(config.id, tx);

        let shard = Self {
            codec: codec_for(config.encoding),
            decompressor: decompressor_for(config.compression),
            config,
            status: ShardStatus::Idle,
            connector,
            transport: None,
            heartbeater: Heartbeater::new(),
            session: SessionState::new(),
            limiter: CommandLimiter::new(),
            outbox: VecDeque::new(),
            outbox_retry_at: None,
            hello_deadline: None,
            connect_failures: 0,
            commands,
            events,
        };

        (shard, handle)
    }

    pub fn id(&self) -> u32 {
        self.config.id
    }

    pub fn status(&self) -> ShardStatus {
        self.status
    }

    /// Run until destroyed or until every handle is dropped
    pub async fn run(mut self) {
        tracing::debug!(shard_id = self.id(), "Shard task started");

        while self.status != ShardStatus::Destroyed {
            let heartbeat_at = self.heartbeater.deadline();
            let hello_at = self.hello_deadline;
            let outbox_at = self.outbox_retry_at;

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => self.destroy().await,
                },
                frame = next_frame(&mut self.transport) => self.handle_frame(frame).await,
                () = sleep_until(heartbeat_at) => self.heartbeat_tick().await,
                () = sleep_until(hello_at) => self.hello_timed_out().await,
                () = sleep_until(outbox_at) => {
                    self.outbox_retry_at = None;
                    self.drain_outbox().await;
                }
            }
        }

        tracing::debug!(shard_id = self.id(), "Shard task finished");
    }

    async fn handle_command(&mut self, command: ShardCommand) {
        match command {
            ShardCommand::Connect => self.connect().await,
            ShardCommand::Send(envelope) => self.send_command(envelope).await,
            ShardCommand::Reconnect => {
                if self.transport.is_some() {
                    self.close_and_reconnect(CloseCode::UnknownError.as_u16(), "Reconnect requested")
                        .await;
                } else {
                    self.request_reconnect();
                }
            }
            ShardCommand::Destroy => self.destroy().await,
        }
    }

    async fn connect(&mut self) {
        if self.transport.is_some() {
            // Released by the queue after an invalid session; identify on the open connection
            if self.status == ShardStatus::Reconnecting {
                self.handshake().await;
            } else {
                tracing::debug!(shard_id = self.id(), "Connect ignored, already connected");
            }
            return;
        }

        self.set_status(ShardStatus::Connecting);

        let base = match (&self.session.resume_url, self.session.is_resumable()) {
            (Some(resume_url), true) => resume_url.as_str(),
            _ => self.config.gateway_url.as_str(),
        };
        let url = connection_url(base, self.config.version, self.config.encoding, self.config.compression);
        tracing::info!(shard_id = self.id(), url = %url, "Connecting");

        match self.connector.connect(&url).await {
            Ok(transport) => {
                self.transport = Some(transport);
                self.decompressor = decompressor_for(self.config.compression);
                self.hello_deadline = Some(Instant::now() + self.config.hello_timeout);
                self.set_status(ShardStatus::AwaitingHello);
            }
            Err(e) => {
                self.connect_failures += 1;
                tracing::warn!(
                    shard_id = self.id(),
                    attempt = self.connect_failures,
                    error = %e,
                    "Failed to connect"
                );
                self.emit_error(format!("Failed to connect: {e}"));

                if self.connect_failures >= self.config.max_connect_attempts {
                    self.fail(None, format!("Gave up after {} connect attempts", self.connect_failures))
                        .await;
                } else {
                    self.set_status(ShardStatus::Disconnected);
                    self.request_reconnect();
                }
            }
        }
    }

    /// Queue an application command; it goes out once the session is established and
    /// the command limits allow it
    async fn send_command(&mut self, envelope: Envelope) {
        if self.status != ShardStatus::Ready {
            tracing::debug!(
                shard_id = self.id(),
                op = %envelope.op,
                status = %self.status,
                "Queued command until ready"
            );
        }
        self.outbox.push_back(envelope);
        self.drain_outbox().await;
    }

    /// Send queued commands in order until the outbox is empty or a limit is hit
    async fn drain_outbox(&mut self) {
        if self.outbox_retry_at.is_some() {
            return;
        }

        while self.status == ShardStatus::Ready && self.transport.is_some() {
            let Some(op) = self.outbox.front().map(|envelope| envelope.op) else {
                return;
            };
            if let Err(wait) = self.limiter.check(op) {
                tracing::debug!(
                    shard_id = self.id(),
                    op = %op,
                    queued = self.outbox.len(),
                    wait_ms = wait.as_millis() as u64,
                    "Command rate limited"
                );
                self.outbox_retry_at = Some(Instant::now() + wait);
                return;
            }
            if let Some(envelope) = self.outbox.pop_front() {
                self.send_or_drop(envelope).await;
            }
        }
    }

    async fn send(&mut self, envelope: &Envelope) -> GatewayResult<()> {
        let bytes = self.codec.encode(envelope)?;
        let frame = if self.codec.is_text() {
            WireFrame::Text(
                String::from_utf8(bytes).map_err(|e| GatewayError::Serialization(e.to_string()))?,
            )
        } else {
            WireFrame::Binary(bytes)
        };

        let transport = self.transport.as_mut().ok_or(GatewayError::Closed)?;
        transport.send(frame).await
    }

    /// Send, treating a transport failure as an abnormal close
    async fn send_or_drop(&mut self, envelope: Envelope) {
        match self.send(&envelope).await {
            Ok(()) => {
                tracing::trace!(shard_id = self.id(), op = %envelope.op, "Sent");
            }
            Err(GatewayError::Serialization(message)) => {
                tracing::error!(shard_id = self.id(), error = %message, "Failed to encode command");
                self.emit_error(format!("Failed to encode {}: {message}", envelope.op));
            }
            Err(e) => {
                tracing::warn!(shard_id = self.id(), error = %e, "Send failed");
                self.handle_close(None, &e.to_string()).await;
            }
        }
    }

    async fn handle_frame(&mut self, frame: Option<GatewayResult<WireFrame>>) {
        match frame {
            None => self.handle_close(None, "Stream ended").await,
            Some(Err(e)) => {
                tracing::warn!(shard_id = self.id(), error = %e, "Transport error");
                self.handle_close(None, &e.to_string()).await;
            }
            Some(Ok(WireFrame::Close(code))) => {
                tracing::info!(shard_id = self.id(), code = ?code, "Connection closed by server");
                self.handle_close(code, "Closed by server").await;
            }
            Some(Ok(WireFrame::Text(text))) => self.decode(text.as_bytes()).await,
            Some(Ok(WireFrame::Binary(bytes))) => match self.decompressor.push(&bytes) {
                Ok(Some(data)) => self.decode(&data).await,
                Ok(None) => {}
                Err(e) => self.protocol_error(e).await,
            },
        }
    }

    async fn decode(&mut self, data: &[u8]) {
        match self.codec.decode(data) {
            Ok(envelope) => self.handle_envelope(envelope).await,
            Err(e) => self.protocol_error(e).await,
        }
    }

    async fn handle_envelope(&mut self, envelope: Envelope) {
        if let Some(seq) = envelope.s {
            self.session.observe_sequence(seq);
        }

        match envelope.op {
            OpCode::Dispatch => self.handle_dispatch(envelope).await,
            OpCode::Heartbeat => {
                tracing::debug!(shard_id = self.id(), "Heartbeat requested by server");
                self.heartbeater.sent();
                self.send_or_drop(Envelope::heartbeat(self.session.last_seq)).await;
            }
            OpCode::Reconnect => {
                tracing::info!(shard_id = self.id(), "Server requested reconnect");
                self.close_and_reconnect(CloseCode::UnknownError.as_u16(), "Server requested reconnect")
                    .await;
            }
            OpCode::InvalidSession => {
                let resumable = envelope.d.as_bool().unwrap_or(false);
                tracing::info!(shard_id = self.id(), resumable, "Invalid session");
                if resumable {
                    self.handshake().await;
                } else {
                    // Fresh identifies only go out when the connect queue releases the shard
                    self.session.reset();
                    self.request_reconnect();
                }
            }
            OpCode::Hello => self.handle_hello(&envelope).await,
            OpCode::HeartbeatAck => {
                if let Some(latency) = self.heartbeater.ack() {
                    tracing::trace!(
                        shard_id = self.id(),
                        latency_ms = latency.as_millis() as u64,
                        "Heartbeat acknowledged"
                    );
                    self.emit(ShardEvent::Latency {
                        shard_id: self.id(),
                        latency,
                    });
                }
            }
            op => {
                tracing::debug!(shard_id = self.id(), op = %op, "Ignoring client-only opcode");
            }
        }
    }

    async fn handle_hello(&mut self, envelope: &Envelope) {
        let Some(hello) = envelope.as_hello() else {
            self.protocol_error(GatewayError::Serialization(
                "Hello without heartbeat_interval".to_string(),
            ))
            .await;
            return;
        };

        self.hello_deadline = None;
        let jitter = if self.config.heartbeat_jitter {
            rand::random::<f64>()
        } else {
            1.0
        };
        self.heartbeater
            .start(Duration::from_millis(hello.heartbeat_interval), jitter);

        self.handshake().await;
    }

    /// Identify, or resume when a session id is known
    async fn handshake(&mut self) {
        let envelope = match self.session.resume_payload(&self.config.token) {
            Some(payload) => {
                tracing::info!(
                    shard_id = self.id(),
                    session_id = %payload.session_id,
                    seq = ?payload.seq,
                    "Resuming session"
                );
                self.set_status(ShardStatus::Resuming);
                Envelope::resume(&payload)
            }
            None => {
                tracing::info!(shard_id = self.id(), "Identifying");
                self.set_status(ShardStatus::Identifying);
                Envelope::identify(&self.config.identify_payload())
            }
        };

        match envelope {
            Ok(envelope) => self.send_or_drop(envelope).await,
            Err(e) => self.protocol_error(e.into()).await,
        }
    }

    async fn handle_dispatch(&mut self, envelope: Envelope) {
        match envelope.t.as_deref() {
            Some("READY") => {
                match ReadyInfo::deserialize(&envelope.d) {
                    Ok(ready) => self.session.on_ready(ready),
                    Err(e) => {
                        tracing::warn!(shard_id = self.id(), error = %e, "READY without session id");
                    }
                }
                self.session_established().await;
            }
            Some("RESUMED") => self.session_established().await,
            _ => {}
        }

        self.emit(ShardEvent::Dispatch {
            shard_id: self.id(),
            envelope,
        });
    }

    async fn session_established(&mut self) {
        if self.status == ShardStatus::Ready {
            return;
        }

        self.heartbeater.reset_ack();
        self.connect_failures = 0;
        self.set_status(ShardStatus::Ready);

        if !self.outbox.is_empty() {
            tracing::debug!(shard_id = self.id(), count = self.outbox.len(), "Flushing queued commands");
        }
        self.drain_outbox().await;
    }

    async fn heartbeat_tick(&mut self) {
        match self.heartbeater.tick(self.status.expects_silence()) {
            HeartbeatAction::Send => {
                self.send_or_drop(Envelope::heartbeat(self.session.last_seq)).await;
            }
            HeartbeatAction::Zombie => {
                tracing::warn!(shard_id = self.id(), "Heartbeat not acknowledged, reconnecting");
                self.emit(ShardEvent::Debug {
                    shard_id: self.id(),
                    message: "Zombie connection detected".to_string(),
                });
                self.close_and_reconnect(ZOMBIE_CLOSE_CODE, "Heartbeat not acknowledged")
                    .await;
            }
        }
    }

    async fn hello_timed_out(&mut self) {
        self.hello_deadline = None;
        tracing::warn!(shard_id = self.id(), "No Hello received, reconnecting");
        self.close_and_reconnect(CloseCode::UnknownError.as_u16(), "Hello timeout")
            .await;
    }

    /// Force the connection down after an undecodable frame
    async fn protocol_error(&mut self, error: GatewayError) {
        tracing::error!(shard_id = self.id(), error = %error, "Protocol error");
        self.emit_error(error.to_string());

        let code = error
            .to_close_code()
            .unwrap_or(CloseCode::UnknownError)
            .as_u16();
        self.close_and_reconnect(code, &error.to_string()).await;
    }

    /// Close the transport ourselves and treat it as a close with `code`
    async fn close_and_reconnect(&mut self, code: u16, reason: &str) {
        self.close_transport(code, reason).await;
        self.handle_close(Some(code), reason).await;
    }

    async fn close_transport(&mut self, code: u16, reason: &str) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close(code, reason).await {
                tracing::debug!(shard_id = self.id(), error = %e, "Close frame not delivered");
            }
        }
    }

    async fn handle_close(&mut self, code: Option<u16>, reason: &str) {
        self.heartbeater.stop();
        self.hello_deadline = None;
        self.transport = None;

        match classify(code) {
            CloseAction::Fatal => {
                self.fail(code, format!("Closed with unrecoverable code: {reason}"))
                    .await;
            }
            CloseAction::Resume => {
                self.session.on_close();
                self.set_status(ShardStatus::Disconnected);
                self.request_reconnect();
            }
            CloseAction::Reidentify => {
                self.session.reset();
                self.set_status(ShardStatus::Disconnected);
                self.request_reconnect();
            }
        }
    }

    fn request_reconnect(&mut self) {
        let resumable = self.session.is_resumable();
        tracing::info!(shard_id = self.id(), resumable, "Requesting reconnect");
        self.set_status(ShardStatus::Reconnecting);
        self.emit(ShardEvent::Reconnect {
            shard_id: self.id(),
            resumable,
        });
    }

    async fn fail(&mut self, code: Option<u16>, reason: String) {
        tracing::error!(shard_id = self.id(), code = ?code, reason = %reason, "Shard failed");
        self.teardown(1000, "Shard failed").await;
        self.emit(ShardEvent::Fatal {
            shard_id: self.id(),
            code,
            reason,
        });
        self.set_status(ShardStatus::Destroyed);
    }

    async fn destroy(&mut self) {
        tracing::info!(shard_id = self.id(), "Destroying shard");
        self.teardown(1000, "Shard destroyed").await;
        self.set_status(ShardStatus::Destroyed);
    }

    /// Stop the timer before the transport so nothing fires into a closed connection
    async fn teardown(&mut self, code: u16, reason: &str) {
        self.heartbeater.stop();
        self.hello_deadline = None;
        self.close_transport(code, reason).await;
        self.outbox.clear();
        self.outbox_retry_at = None;
    }

    fn set_status(&mut self, status: ShardStatus) {
        if self.status == status {
            return;
        }
        tracing::debug!(shard_id = self.id(), from = %self.status, to = %status, "Status changed");
        self.status = status;
        self.emit(ShardEvent::StatusChanged {
            shard_id: self.id(),
            status,
        });
    }

    fn emit_error(&self, message: String) {
        self.emit(ShardEvent::Error {
            shard_id: self.id(),
            message,
        });
    }

    fn emit(&self, event: ShardEvent) {
        // Nobody listening is not an error for the shard
        let _ = self.events.send(event);
    }
}

async fn next_frame(transport: &mut Option<Box<dyn Transport>>) -> Option<GatewayResult<WireFrame>> {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
