//! Mock transport for unit and integration tests.
//!
//! [`MockConnector`] hands every successfully opened channel's device side to
//! the test as a [`MockDevice`], which can read what the hub wrote, answer
//! with inbound frames, inject errors or hang up.  Per-endpoint behaviour
//! (accept, refuse, hang) is scriptable so reconnect paths can be exercised
//! without a network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use lasertag_core::protocol::messages::{AckMessage, HeartbeatAckMessage};
use lasertag_core::{
    decode_outbound, encode_inbound, Frame, InboundFrame, InboundMessage, OutboundFrame,
    OutboundMessage,
};

use crate::application::transport::{Channel, Connector, TransportError};
use crate::domain::Endpoint;

/// What an `open` for a given endpoint does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenBehaviour {
    Accept,
    Refuse(String),
    /// Never completes; the link's connect timeout has to fire.
    Hang,
}

/// The key a mock uses for an endpoint: the address for direct endpoints,
/// the device id for relayed ones.
pub fn endpoint_key(endpoint: &Endpoint) -> String {
    match endpoint {
        Endpoint::Direct { address } => address.clone(),
        Endpoint::Relayed { device_id, .. } => device_id.clone(),
    }
}

#[derive(Default)]
struct MockState {
    behaviours: HashMap<String, OpenBehaviour>,
    opens: HashMap<String, usize>,
    /// Hanging opens whose future has not been dropped yet.
    in_flight: HashMap<String, usize>,
}

/// Counts a hanging open as in flight until its future is dropped.
struct InFlightOpen {
    state: Arc<Mutex<MockState>>,
    key: String,
}

impl InFlightOpen {
    fn start(state: &Arc<Mutex<MockState>>, key: String) -> Self {
        *state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight
            .entry(key.clone())
            .or_default() += 1;
        Self {
            state: Arc::clone(state),
            key,
        }
    }
}

impl Drop for InFlightOpen {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = state.in_flight.get_mut(&self.key) {
            *count = count.saturating_sub(1);
        }
    }
}

/// A [`Connector`] whose device sides are delivered to the test.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    devices: mpsc::UnboundedSender<MockDevice>,
}

impl MockConnector {
    /// Returns the connector and the receiver of opened device sides.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockDevice>) {
        let (devices, rx) = mpsc::unbounded_channel();
        let connector = Self {
            state: Arc::new(Mutex::new(MockState::default())),
            devices,
        };
        (connector, rx)
    }

    pub fn set_behaviour(&self, key: impl Into<String>, behaviour: OpenBehaviour) {
        self.lock().behaviours.insert(key.into(), behaviour);
    }

    pub fn refuse(&self, key: impl Into<String>, reason: impl Into<String>) {
        self.set_behaviour(key, OpenBehaviour::Refuse(reason.into()));
    }

    pub fn hang(&self, key: impl Into<String>) {
        self.set_behaviour(key, OpenBehaviour::Hang);
    }

    pub fn accept(&self, key: impl Into<String>) {
        self.set_behaviour(key, OpenBehaviour::Accept);
    }

    /// Number of `open` calls made for `key`, successful or not.
    pub fn open_count(&self, key: &str) -> usize {
        self.lock().opens.get(key).copied().unwrap_or(0)
    }

    /// Number of hanging `open` calls for `key` that are still being awaited.
    pub fn opens_in_flight(&self, key: &str) -> usize {
        self.lock().in_flight.get(key).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Channel>, TransportError> {
        let key = endpoint_key(endpoint);
        let behaviour = {
            let mut state = self.lock();
            *state.opens.entry(key.clone()).or_default() += 1;
            state
                .behaviours
                .get(&key)
                .cloned()
                .unwrap_or(OpenBehaviour::Accept)
        };

        match behaviour {
            OpenBehaviour::Refuse(reason) => Err(TransportError::Open {
                endpoint: endpoint.to_string(),
                reason,
            }),
            OpenBehaviour::Hang => {
                let _in_flight = InFlightOpen::start(&self.state, key);
                std::future::pending().await
            }
            OpenBehaviour::Accept => {
                let (to_device, from_hub) = mpsc::unbounded_channel();
                let (to_hub, from_device) = mpsc::unbounded_channel();
                // A test that dropped the receiver gets a device that hangs up at once.
                let _ = self.devices.send(MockDevice {
                    key,
                    from_hub,
                    to_hub,
                });
                Ok(Box::new(MockChannel {
                    to_device: Some(to_device),
                    from_device,
                }))
            }
        }
    }
}

struct MockChannel {
    to_device: Option<mpsc::UnboundedSender<Vec<u8>>>,
    from_device: mpsc::UnboundedReceiver<Result<Vec<u8>, TransportError>>,
}

#[async_trait]
impl Channel for MockChannel {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        match &self.to_device {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| TransportError::Send("device hung up".to_string())),
            None => Err(TransportError::Closed),
        }
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        if self.to_device.is_none() {
            return None;
        }
        self.from_device.recv().await
    }

    async fn close(&mut self) {
        self.to_device = None;
        self.from_device.close();
    }
}

/// How a spawned responder answers the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Responder {
    /// Answers heartbeats and acknowledges every request.
    AckAll,
    /// Answers heartbeats only, so requests time out.
    HeartbeatsOnly,
}

/// The device side of one mock channel.  Dropping it hangs up.
#[derive(Debug)]
pub struct MockDevice {
    key: String,
    from_hub: mpsc::UnboundedReceiver<Vec<u8>>,
    to_hub: mpsc::UnboundedSender<Result<Vec<u8>, TransportError>>,
}

impl MockDevice {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Sends an inbound frame to the hub.  Returns `false` if it was not delivered.
    pub fn send_frame(&self, frame: &InboundFrame) -> bool {
        match encode_inbound(frame) {
            Ok(bytes) => self.send_raw(bytes),
            Err(e) => {
                warn!(device = %self.key, error = %e, "mock device could not encode frame");
                false
            }
        }
    }

    pub fn send_message(&self, message: InboundMessage) -> bool {
        self.send_frame(&Frame::new(message))
    }

    pub fn send_raw(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.to_hub.send(Ok(bytes.into())).is_ok()
    }

    /// Makes the hub's next receive fail with `reason`.
    pub fn inject_error(&self, reason: impl Into<String>) -> bool {
        self.to_hub
            .send(Err(TransportError::Receive(reason.into())))
            .is_ok()
    }

    /// Next raw frame written by the hub; `None` once the hub closed the channel.
    pub async fn recv_raw(&mut self) -> Option<Vec<u8>> {
        self.from_hub.recv().await
    }

    /// Next decodable frame written by the hub.
    pub async fn recv_frame(&mut self) -> Option<OutboundFrame> {
        loop {
            let bytes = self.from_hub.recv().await?;
            match decode_outbound(&bytes) {
                Ok(frame) => return Some(frame),
                Err(e) => warn!(device = %self.key, error = %e, "mock device got undecodable frame"),
            }
        }
    }

    /// Next frame that is not a heartbeat.
    pub async fn recv_command(&mut self) -> Option<OutboundFrame> {
        loop {
            let frame = self.recv_frame().await?;
            if !matches!(frame.message, OutboundMessage::Heartbeat(_)) {
                return Some(frame);
            }
        }
    }

    /// Acknowledges the request `req_id`.
    pub fn ack(&self, req_id: impl Into<String>, success: bool) -> bool {
        self.send_frame(&Frame::with_request_id(
            req_id,
            InboundMessage::Ack(AckMessage {
                success,
                message: None,
                extra: Default::default(),
            }),
        ))
    }

    /// Runs the device in the background until the hub closes the channel.
    pub fn spawn_responder(mut self, mode: Responder) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(frame) = self.recv_frame().await {
                if let OutboundMessage::Heartbeat(beat) = &frame.message {
                    self.send_message(InboundMessage::HeartbeatAck(HeartbeatAckMessage {
                        timestamp_ms: beat.timestamp_ms,
                        ..Default::default()
                    }));
                }
                if let (Some(req_id), Responder::AckAll) = (frame.req_id, mode) {
                    self.ack(req_id, true);
                }
            }
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
