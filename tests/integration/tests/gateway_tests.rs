//! Gateway integration tests
//!
//! Shards and the orchestrator run against the in-process mock gateway over real
//! WebSocket connections.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::sync::Arc;
use std::time::Duration;

use chorus_common::{Compression, Encoding, GatewayConfig};
use chorus_gateway::shard::ShardEvent;
use chorus_gateway::{
    Envelope, OpCode, OrchestratorEvent, Shard, ShardConfig, ShardOrchestrator, ShardStatus,
    WebSocketConnector,
};
use integration_tests::{
    GatewayOptions, MockApi, MockGateway, MockResponse, ReceivedCommand, TEST_TOKEN,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(15);

fn json_gateway() -> GatewayConfig {
    GatewayConfig {
        encoding: Encoding::Json,
        compression: Compression::None,
        ..GatewayConfig::default()
    }
}

async fn next_command(commands: &mut mpsc::UnboundedReceiver<ReceivedCommand>) -> ReceivedCommand {
    loop {
        let command = timeout(WAIT, commands.recv())
            .await
            .expect("Timed out waiting for a client command")
            .expect("Mock gateway stopped");
        if command.envelope.op != OpCode::Heartbeat {
            return command;
        }
    }
}

async fn next_orchestrator_event(
    events: &mut mpsc::UnboundedReceiver<OrchestratorEvent>,
    name: &str,
) -> OrchestratorEvent {
    loop {
        let event = timeout(WAIT, events.recv())
            .await
            .expect("Timed out waiting for orchestrator event")
            .expect("Event stream closed");
        if event.name() == name {
            return event;
        }
    }
}

fn spawn_shard(gateway: &MockGateway) -> (chorus_gateway::ShardHandle, mpsc::UnboundedReceiver<ShardEvent>) {
    let (events_tx, events) = mpsc::unbounded_channel();
    let config = ShardConfig::new(0, 1, TEST_TOKEN, gateway.url(), &json_gateway());
    let (shard, handle) = Shard::new(config, Arc::new(WebSocketConnector::default()), events_tx);
    tokio::spawn(shard.run());
    (handle, events)
}

async fn next_shard_event<T>(
    events: &mut mpsc::UnboundedReceiver<ShardEvent>,
    mut pick: impl FnMut(ShardEvent) -> Option<T>,
) -> T {
    loop {
        let event = timeout(WAIT, events.recv())
            .await
            .expect("Timed out waiting for shard event")
            .expect("Shard stopped");
        if let Some(found) = pick(event) {
            return found;
        }
    }
}

fn gateway_bot(url: &str, shards: u32) -> MockResponse {
    MockResponse::json(json!({
        "url": url,
        "shards": shards,
        "session_start_limit": {
            "total": 1000,
            "remaining": 999,
            "reset_after": 86_400_000,
            "max_concurrency": 1
        }
    }))
}

// ============================================================================
// Orchestrator
// ============================================================================

#[tokio::test]
async fn test_orchestrator_connects_and_flushes_queued_commands() {
    let (gateway, mut commands) = MockGateway::start(GatewayOptions::default())
        .await
        .expect("Failed to start mock gateway");
    let api = MockApi::start().await.expect("Failed to start mock API");
    api.respond("GET", "/v10/gateway/bot", gateway_bot(&gateway.url(), 1));
    let rest = api.dispatcher().unwrap();

    let (orchestrator, mut events) =
        ShardOrchestrator::connect(&rest, json_gateway(), Arc::new(WebSocketConnector::default()))
            .await
            .expect("Failed to start orchestrator");
    assert_eq!(orchestrator.shard_count(), 1);

    orchestrator
        .send(0, Envelope::presence_update(json!({"status": "dnd", "afk": false})))
        .unwrap();

    let identify = next_command(&mut commands).await;
    assert_eq!(identify.envelope.op, OpCode::Identify);
    assert_eq!(identify.envelope.d["token"], TEST_TOKEN);
    assert_eq!(identify.envelope.d["shard"], json!([0, 1]));
    assert_eq!(identify.query.as_deref(), Some("v=10&encoding=json"));

    let ready = next_orchestrator_event(&mut events, "ready").await;
    assert!(matches!(ready, OrchestratorEvent::Ready { shard_count: 1 }));
    assert!(orchestrator.is_ready());

    let presence = next_command(&mut commands).await;
    assert_eq!(presence.envelope.op, OpCode::PresenceUpdate);
    assert_eq!(presence.envelope.d["status"], "dnd");

    orchestrator.shutdown().await;
    next_orchestrator_event(&mut events, "shutdown").await;
    assert_eq!(orchestrator.status(0), Some(ShardStatus::Destroyed));
}

#[tokio::test]
async fn test_orchestrator_paces_identifies() {
    let (gateway, mut commands) = MockGateway::start(GatewayOptions::default())
        .await
        .expect("Failed to start mock gateway");
    let api = MockApi::start().await.expect("Failed to start mock API");
    api.respond("GET", "/v10/gateway/bot", gateway_bot(&gateway.url(), 2));
    let rest = api.dispatcher().unwrap();

    let (orchestrator, mut events) =
        ShardOrchestrator::connect(&rest, json_gateway(), Arc::new(WebSocketConnector::default()))
            .await
            .expect("Failed to start orchestrator");

    let first = next_command(&mut commands).await;
    let first_at = tokio::time::Instant::now();
    let second = next_command(&mut commands).await;

    assert_eq!(first.envelope.d["shard"], json!([0, 2]));
    assert_eq!(second.envelope.d["shard"], json!([1, 2]));
    assert!(first_at.elapsed() >= Duration::from_millis(4_500));

    // Dispatches are tagged with the shard they arrived on
    let mut ready_shards = Vec::new();
    while ready_shards.len() < 2 {
        if let OrchestratorEvent::Dispatch { shard_id, envelope } =
            next_orchestrator_event(&mut events, "dispatch").await
        {
            if envelope.event_name() == Some("READY") {
                assert_eq!(envelope.d["shard"][0], json!(shard_id));
                ready_shards.push(shard_id);
            }
        }
    }
    // The readiness flip is processed before the dispatch that caused it
    assert!(orchestrator.is_ready());

    orchestrator.shutdown().await;
}

// ============================================================================
// Shard reconnects
// ============================================================================

#[tokio::test]
async fn test_shard_resumes_after_resumable_close() {
    let (gateway, mut commands) = MockGateway::start(GatewayOptions {
        close_first_connection: Some(4000),
        ..GatewayOptions::default()
    })
    .await
    .expect("Failed to start mock gateway");
    let (handle, mut events) = spawn_shard(&gateway);

    handle.connect().unwrap();
    assert_eq!(next_command(&mut commands).await.envelope.op, OpCode::Identify);

    let resumable = next_shard_event(&mut events, |event| match event {
        ShardEvent::Reconnect { resumable, .. } => Some(resumable),
        _ => None,
    })
    .await;
    assert!(resumable);

    // Act as the connect queue
    handle.connect().unwrap();
    let resume = next_command(&mut commands).await;
    assert_eq!(resume.connection, 1);
    assert_eq!(resume.envelope.op, OpCode::Resume);
    assert_eq!(resume.envelope.d["session_id"], "session-0");
    assert_eq!(resume.envelope.d["seq"], json!(2));

    next_shard_event(&mut events, |event| match event {
        ShardEvent::Dispatch { envelope, .. } if envelope.event_name() == Some("RESUMED") => Some(()),
        _ => None,
    })
    .await;

    handle.destroy().unwrap();
    assert_eq!(gateway.connection_count(), 2);
}

#[tokio::test]
async fn test_shard_reidentifies_after_session_timeout() {
    let (gateway, mut commands) = MockGateway::start(GatewayOptions {
        close_first_connection: Some(4009),
        ..GatewayOptions::default()
    })
    .await
    .expect("Failed to start mock gateway");
    let (handle, mut events) = spawn_shard(&gateway);

    handle.connect().unwrap();
    assert_eq!(next_command(&mut commands).await.envelope.op, OpCode::Identify);

    let resumable = next_shard_event(&mut events, |event| match event {
        ShardEvent::Reconnect { resumable, .. } => Some(resumable),
        _ => None,
    })
    .await;
    assert!(!resumable);

    handle.connect().unwrap();
    let identify = next_command(&mut commands).await;
    assert_eq!(identify.connection, 1);
    assert_eq!(identify.envelope.op, OpCode::Identify);

    handle.destroy().unwrap();
}

#[tokio::test]
async fn test_shard_stops_on_disallowed_intents() {
    let (gateway, mut commands) = MockGateway::start(GatewayOptions {
        close_first_connection: Some(4014),
        ..GatewayOptions::default()
    })
    .await
    .expect("Failed to start mock gateway");
    let (handle, mut events) = spawn_shard(&gateway);

    handle.connect().unwrap();
    next_command(&mut commands).await;

    let code = next_shard_event(&mut events, |event| match event {
        ShardEvent::Fatal { code, .. } => Some(code),
        _ => None,
    })
    .await;
    assert_eq!(code, Some(4014));

    // The shard task ends after a fatal close
    timeout(WAIT, async {
        while !handle.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Shard task did not stop");
}

#[tokio::test]
async fn test_heartbeats_are_acknowledged() {
    let (gateway, _commands) = MockGateway::start(GatewayOptions {
        heartbeat_interval: 200,
        ..GatewayOptions::default()
    })
    .await
    .expect("Failed to start mock gateway");
    let (handle, mut events) = spawn_shard(&gateway);

    handle.connect().unwrap();
    let latency = next_shard_event(&mut events, |event| match event {
        ShardEvent::Latency { latency, .. } => Some(latency),
        _ => None,
    })
    .await;
    assert!(latency < Duration::from_secs(1));

    handle.destroy().unwrap();
}
