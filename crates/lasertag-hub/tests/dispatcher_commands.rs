//! Command dispatch and broadcast against scripted devices, on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use lasertag_core::protocol::messages::{
    DeviceConfig, GameCommand, HeartbeatAckMessage, HitForwardMessage,
};
use lasertag_core::{ConnectionState, EncodeError, InboundMessage, OutboundMessage};
use lasertag_hub::application::dispatcher::{Dispatcher, RetryPolicy};
use lasertag_hub::application::link::CommandError;
use lasertag_hub::application::registry::{Registry, RegistryOptions};
use lasertag_hub::domain::TransportMode;
use lasertag_hub::infrastructure::transport::mock::{MockConnector, MockDevice, Responder};

const ACK_TIMEOUT: Duration = Duration::from_secs(1);

struct Arena {
    registry: Registry,
    dispatcher: Dispatcher,
    devices: mpsc::UnboundedReceiver<MockDevice>,
}

impl Arena {
    /// A registry whose devices are only connected on request.
    fn new() -> Self {
        let (connector, devices) = MockConnector::new();
        let registry = Registry::new(
            Arc::new(connector),
            TransportMode::Local,
            RegistryOptions {
                auto_connect: false,
                ..Default::default()
            },
        )
        .unwrap();
        let dispatcher = Dispatcher::new(registry.clone()).with_ack_timeout(ACK_TIMEOUT);
        Self {
            registry,
            dispatcher,
            devices,
        }
    }

    async fn add(&self, device_id: &str) {
        self.registry
            .add_device(device_id, format!("addr-{device_id}"))
            .await
            .unwrap();
    }

    async fn connect(&mut self, device_id: &str) -> MockDevice {
        let link = self.registry.link(device_id).await.unwrap();
        link.connect();
        let device = self.devices.recv().await.unwrap();
        assert!(link.wait_for_state(ConnectionState::Connected).await);
        device
    }
}

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_to_three_devices_with_one_disconnected() {
    // Arrange
    let mut arena = Arena::new();
    for id in ["d1", "d2", "d3"] {
        arena.add(id).await;
    }
    let _d1 = arena.connect("d1").await.spawn_responder(Responder::AckAll);
    let _d2 = arena.connect("d2").await.spawn_responder(Responder::HeartbeatsOnly);

    // Act
    let results = arena.dispatcher.start_game(&ids(&["d1", "d2", "d3"])).await;

    // Assert: three independent outcomes in request order.
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].0, "d1");
    assert!(results[0].1.as_ref().unwrap().success);
    assert_eq!(
        results[1].1,
        Err(CommandError::Timeout("d2".to_string(), ACK_TIMEOUT))
    );
    assert_eq!(results[2].1, Err(CommandError::NotConnected("d3".to_string())));
}

#[tokio::test(start_paused = true)]
async fn test_not_connected_fails_without_waiting() {
    let arena = Arena::new();
    arena.add("d3").await;
    let started = Instant::now();

    let result = arena.dispatcher.play_sound("d3", 4, Some(80)).await;

    assert_eq!(result, Err(CommandError::NotConnected("d3".to_string())));
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_all_reaches_every_device() {
    let mut arena = Arena::new();
    for id in ["w1", "t1"] {
        arena.add(id).await;
    }
    let _w1 = arena.connect("w1").await.spawn_responder(Responder::AckAll);
    let _t1 = arena.connect("t1").await.spawn_responder(Responder::AckAll);

    let results = arena.dispatcher.broadcast_all(OutboundMessage::game(GameCommand::Reset)).await;

    let order: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(order, vec!["t1", "w1"]);
    assert!(results.iter().all(|(_, result)| result.is_ok()));
}

#[tokio::test(start_paused = true)]
async fn test_retry_gives_up_after_configured_attempts() {
    // Arrange
    let mut arena = Arena::new();
    arena.add("w1").await;
    let mut device = arena.connect("w1").await;
    let dispatcher = arena.dispatcher.clone().with_retry(RetryPolicy::retries(2));
    let started = Instant::now();
    let sender = tokio::spawn(async move {
        dispatcher
            .send("w1", OutboundMessage::game(GameCommand::Start))
            .await
    });

    // Act: swallow every request, answer heartbeats.
    let mut req_ids = Vec::new();
    while req_ids.len() < 3 {
        let frame = device.recv_frame().await.unwrap();
        match frame.message {
            OutboundMessage::Heartbeat(beat) => {
                device.send_message(InboundMessage::HeartbeatAck(HeartbeatAckMessage {
                    timestamp_ms: beat.timestamp_ms,
                    ..Default::default()
                }));
            }
            _ => req_ids.push(frame.req_id.unwrap()),
        }
    }
    let result = sender.await.unwrap();

    // Assert
    assert_eq!(result, Err(CommandError::Timeout("w1".to_string(), ACK_TIMEOUT)));
    let elapsed = started.elapsed();
    assert!(
        elapsed >= ACK_TIMEOUT * 3 && elapsed < ACK_TIMEOUT * 3 + Duration::from_millis(20),
        "three ack windows expected, got {elapsed:?}"
    );
    assert_eq!(req_ids, vec!["w1-0", "w1-1", "w1-2"]);
}

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_when_a_later_attempt_is_acked() {
    let mut arena = Arena::new();
    arena.add("w1").await;
    let mut device = arena.connect("w1").await;
    let dispatcher = arena.dispatcher.clone().with_retry(RetryPolicy::retries(1));
    let sender = tokio::spawn(async move {
        dispatcher
            .send("w1", OutboundMessage::game(GameCommand::Unpause))
            .await
    });

    let _ignored = device.recv_command().await.unwrap();
    let retried = device.recv_command().await.unwrap();
    device.ack(retried.req_id.unwrap(), true);

    assert!(sender.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_empty_config_update_is_rejected_before_sending() {
    let mut arena = Arena::new();
    arena.add("w1").await;
    let _device = arena.connect("w1").await.spawn_responder(Responder::AckAll);

    let result = arena.dispatcher.push_config("w1", DeviceConfig::default()).await;

    assert_eq!(result, Err(CommandError::Encode(EncodeError::EmptyConfigUpdate)));
    assert_eq!(
        arena.registry.link("w1").await.unwrap().state(),
        ConnectionState::Connected
    );
}

#[tokio::test(start_paused = true)]
async fn test_push_config_sends_only_set_fields() {
    let mut arena = Arena::new();
    arena.add("w1").await;
    let mut device = arena.connect("w1").await;
    let dispatcher = arena.dispatcher.clone();
    let sender = tokio::spawn(async move {
        let config = DeviceConfig {
            team_id: Some(2),
            max_hearts: Some(5),
            ..Default::default()
        };
        dispatcher.push_config("w1", config).await
    });

    let frame = device.recv_command().await.unwrap();
    let OutboundMessage::ConfigUpdate(config) = &frame.message else {
        panic!("expected config_update, got {:?}", frame.message);
    };
    assert_eq!(config.team_id, Some(2));
    assert_eq!(config.max_hearts, Some(5));
    assert_eq!(config.volume, None);
    device.ack(frame.req_id.unwrap(), true);
    assert!(sender.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_query_status_is_fire_and_forget() {
    let mut arena = Arena::new();
    arena.add("w1").await;
    let mut device = arena.connect("w1").await;

    arena.dispatcher.query_status("w1").await.unwrap();

    let frame = device.recv_command().await.unwrap();
    assert!(matches!(frame.message, OutboundMessage::GetStatus(_)));
    assert!(frame.req_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_forward_hit_and_confirm_kill_reach_the_shooter() {
    // Arrange
    let mut arena = Arena::new();
    arena.add("w3").await;
    let mut device = arena.connect("w3").await;
    let dispatcher = arena.dispatcher.clone();
    let sender = tokio::spawn(async move {
        let hit = HitForwardMessage {
            seq_id: 7,
            target_id: 12,
            shooter_id: 3,
            damage: 20,
            fatal: true,
            extra: Default::default(),
        };
        let forwarded = dispatcher.forward_hit("w3", hit).await;
        let confirmed = dispatcher.confirm_kill("w3", 12, false).await;
        (forwarded, confirmed)
    });

    // Act
    let hit = device.recv_command().await.unwrap();
    device.ack(hit.req_id.clone().unwrap(), true);
    let kill = device.recv_command().await.unwrap();
    device.ack(kill.req_id.clone().unwrap(), true);

    // Assert
    assert!(matches!(
        hit.message,
        OutboundMessage::HitForward(HitForwardMessage { seq_id: 7, fatal: true, .. })
    ));
    assert!(matches!(kill.message, OutboundMessage::KillConfirmed(ref k) if k.victim_id == 12 && !k.friendly));
    let (forwarded, confirmed) = sender.await.unwrap();
    assert!(forwarded.is_ok());
    assert!(confirmed.is_ok());
}
