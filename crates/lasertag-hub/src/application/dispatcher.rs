//! Command dispatcher: configuration and game commands to one or many devices.
//!
//! Every dispatched command carries a request id and waits for the device's
//! `ack`.  A device whose link is not `connected` fails immediately with
//! `NotConnected`; nothing is queued for later delivery.  Broadcasts fan out
//! in parallel and each device's outcome is independent of the others.

use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, warn};

use lasertag_core::protocol::messages::{
    DeviceConfig, GameCommand, GetStatusMessage, HitForwardMessage, KillConfirmedMessage,
    RemoteSoundMessage,
};
use lasertag_core::{DeviceId, OutboundMessage};

use crate::application::link::{Ack, CommandError};
use crate::application::registry::Registry;

/// How often a timed-out request is re-sent before giving up.
///
/// Only `Timeout` is retried; every other failure is returned at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn retries(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

/// Outcome of a broadcast for one device.
pub type BroadcastResult = (DeviceId, Result<Ack, CommandError>);

/// Sends commands through the registry's links.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Registry,
    ack_timeout: Duration,
    retry: RetryPolicy,
}

impl Dispatcher {
    /// A dispatcher using the registry's configured ack timeout and no retries.
    pub fn new(registry: Registry) -> Self {
        let ack_timeout = registry.link_config().ack_timeout;
        Self {
            registry,
            ack_timeout,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_ack_timeout(mut self, ack_timeout: Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sends `message` to one device and waits for its ack.
    ///
    /// # Errors
    ///
    /// - `UnknownDevice` if the device is not registered.
    /// - `NotConnected` if its link is not connected.
    /// - `Timeout` if no ack arrived in time (after any configured retries).
    /// - `Encode`, `Transport` or `Cancelled` as reported by the link.
    pub async fn send(
        &self,
        device_id: &str,
        message: OutboundMessage,
    ) -> Result<Ack, CommandError> {
        let link = self
            .registry
            .link(device_id)
            .await
            .ok_or_else(|| CommandError::UnknownDevice(device_id.to_string()))?;

        let mut attempt = 0;
        loop {
            match link.request(message.clone(), self.ack_timeout).await {
                Err(CommandError::Timeout(..)) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(device = %device_id, attempt, op = message.op_code().name(), "no ack, retrying");
                }
                result => {
                    debug!(device = %device_id, op = message.op_code().name(), ok = result.is_ok(), "command finished");
                    return result;
                }
            }
        }
    }

    /// Sends `message` to every device in `device_ids` in parallel.
    ///
    /// Results come back in the order of `device_ids`.
    pub async fn broadcast(
        &self,
        device_ids: &[DeviceId],
        message: OutboundMessage,
    ) -> Vec<BroadcastResult> {
        let sends = device_ids.iter().map(|device_id| {
            let message = message.clone();
            async move { (device_id.clone(), self.send(device_id, message).await) }
        });
        join_all(sends).await
    }

    /// Broadcasts to every registered device.
    pub async fn broadcast_all(&self, message: OutboundMessage) -> Vec<BroadcastResult> {
        let device_ids = self.registry.device_ids().await;
        self.broadcast(&device_ids, message).await
    }

    // ── Game control ──────────────────────────────────────────────────────────

    pub async fn start_game(&self, device_ids: &[DeviceId]) -> Vec<BroadcastResult> {
        self.game_command(device_ids, GameCommand::Start).await
    }

    pub async fn stop_game(&self, device_ids: &[DeviceId]) -> Vec<BroadcastResult> {
        self.game_command(device_ids, GameCommand::Stop).await
    }

    pub async fn pause_game(&self, device_ids: &[DeviceId]) -> Vec<BroadcastResult> {
        self.game_command(device_ids, GameCommand::Pause).await
    }

    pub async fn resume_game(&self, device_ids: &[DeviceId]) -> Vec<BroadcastResult> {
        self.game_command(device_ids, GameCommand::Unpause).await
    }

    pub async fn reset_game(&self, device_ids: &[DeviceId]) -> Vec<BroadcastResult> {
        self.game_command(device_ids, GameCommand::Reset).await
    }

    async fn game_command(
        &self,
        device_ids: &[DeviceId],
        command: GameCommand,
    ) -> Vec<BroadcastResult> {
        self.broadcast(device_ids, OutboundMessage::game(command))
            .await
    }

    // ── Single-device helpers ─────────────────────────────────────────────────

    /// Pushes a partial configuration.  An empty update fails with `Encode`.
    pub async fn push_config(
        &self,
        device_id: &str,
        config: DeviceConfig,
    ) -> Result<Ack, CommandError> {
        self.send(device_id, OutboundMessage::ConfigUpdate(config))
            .await
    }

    /// Asks the device for a full `status`.
    ///
    /// The answer arrives as an inbound `status` and is folded into the
    /// registry; this only waits for the request to be written.
    pub async fn query_status(&self, device_id: &str) -> Result<(), CommandError> {
        let link = self
            .registry
            .link(device_id)
            .await
            .ok_or_else(|| CommandError::UnknownDevice(device_id.to_string()))?;
        link.send(OutboundMessage::GetStatus(GetStatusMessage::default()))
            .await
    }

    pub async fn play_sound(
        &self,
        device_id: &str,
        sound_id: u16,
        volume: Option<u8>,
    ) -> Result<Ack, CommandError> {
        let message = OutboundMessage::RemoteSound(RemoteSoundMessage {
            sound_id,
            volume,
            extra: Default::default(),
        });
        self.send(device_id, message).await
    }

    /// Tells the shooter's weapon that one of its shots hit `hit.target_id`.
    pub async fn forward_hit(
        &self,
        shooter_device: &str,
        hit: HitForwardMessage,
    ) -> Result<Ack, CommandError> {
        self.send(shooter_device, OutboundMessage::HitForward(hit))
            .await
    }

    /// Credits the shooter with a kill.
    pub async fn confirm_kill(
        &self,
        shooter_device: &str,
        victim_id: u16,
        friendly: bool,
    ) -> Result<Ack, CommandError> {
        let message = OutboundMessage::KillConfirmed(KillConfirmedMessage {
            victim_id,
            friendly,
            extra: Default::default(),
        });
        self.send(shooter_device, message).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::application::registry::RegistryOptions;
    use crate::domain::TransportMode;
    use crate::infrastructure::transport::mock::MockConnector;

    fn dispatcher() -> Dispatcher {
        let (connector, _devices) = MockConnector::new();
        let registry = Registry::new(
            Arc::new(connector),
            TransportMode::Local,
            RegistryOptions {
                auto_connect: false,
                ..Default::default()
            },
        )
        .unwrap();
        Dispatcher::new(registry)
    }

    #[test]
    fn test_retry_policy_defaults_to_no_retries() {
        assert_eq!(RetryPolicy::default().max_retries, 0);
        assert_eq!(RetryPolicy::retries(2).max_retries, 2);
    }

    #[tokio::test]
    async fn test_send_to_unknown_device_fails() {
        let dispatcher = dispatcher();
        let result = dispatcher
            .send("ghost", OutboundMessage::game(GameCommand::Start))
            .await;
        assert_eq!(result, Err(CommandError::UnknownDevice("ghost".to_string())));
    }

    #[tokio::test]
    async fn test_send_to_disconnected_device_fails_immediately() {
        // Arrange
        let dispatcher = dispatcher();
        dispatcher.registry.add_device("d1", "a").await.unwrap();

        // Act
        let result = dispatcher.play_sound("d1", 3, None).await;

        // Assert
        tokio_test::assert_err!(&result);
        assert_eq!(result, Err(CommandError::NotConnected("d1".to_string())));
    }

    #[tokio::test]
    async fn test_broadcast_preserves_input_order() {
        let dispatcher = dispatcher();
        dispatcher.registry.add_device("a", "1").await.unwrap();
        let ids = vec!["b".to_string(), "a".to_string()];

        let results = dispatcher.stop_game(&ids).await;

        let order: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(order, vec!["b", "a"]);
        assert!(matches!(results[0].1, Err(CommandError::UnknownDevice(_))));
        assert!(matches!(results[1].1, Err(CommandError::NotConnected(_))));
    }
}
