//! Cloud transport: every device of a session behind one relay channel.
//!
//! The relay is an opaque publish/subscribe service.  The hub publishes a
//! frame addressed to one device and subscribes to the session to receive
//! frames from all of them.  Each link opens its own subscription and keeps
//! only the frames tagged with its device id, so links stay independent and
//! no link ever sees another device's traffic.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tracing::debug;

use lasertag_core::DeviceId;

use crate::application::transport::{Channel, Connector, TransportError};
use crate::domain::Endpoint;

/// Frames from the devices of one session, tagged with the sender.
pub type RelayStream = BoxStream<'static, (DeviceId, Vec<u8>)>;

/// The relay's publish/subscribe surface as seen from the hub.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Delivers `frame` to `device_id` within `session_id`.
    async fn publish(
        &self,
        session_id: &str,
        device_id: &str,
        frame: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Every frame the session's devices send from now on.  The stream ends
    /// when the relay drops the session.
    async fn subscribe(&self, session_id: &str) -> Result<RelayStream, TransportError>;
}

/// Opens per-device channels onto a relay.
#[derive(Clone)]
pub struct RelayConnector {
    relay: Arc<dyn Relay>,
}

impl RelayConnector {
    pub fn new(relay: Arc<dyn Relay>) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl Connector for RelayConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Channel>, TransportError> {
        let Endpoint::Relayed {
            session_id,
            device_id,
        } = endpoint
        else {
            return Err(TransportError::Unsupported(format!(
                "relay cannot reach {endpoint}"
            )));
        };
        let inbound = self.relay.subscribe(session_id).await?;
        debug!(%session_id, %device_id, "relay subscription opened");
        Ok(Box::new(RelayChannel {
            relay: Arc::clone(&self.relay),
            session_id: session_id.clone(),
            device_id: device_id.clone(),
            inbound: Some(inbound),
        }))
    }
}

struct RelayChannel {
    relay: Arc<dyn Relay>,
    session_id: String,
    device_id: DeviceId,
    inbound: Option<RelayStream>,
}

#[async_trait]
impl Channel for RelayChannel {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.inbound.is_none() {
            return Err(TransportError::Closed);
        }
        self.relay
            .publish(&self.session_id, &self.device_id, frame)
            .await
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        let inbound = self.inbound.as_mut()?;
        while let Some((sender, frame)) = inbound.next().await {
            if sender == self.device_id {
                return Some(Ok(frame));
            }
        }
        None
    }

    async fn close(&mut self) {
        if self.inbound.take().is_some() {
            debug!(session_id = %self.session_id, device_id = %self.device_id, "relay subscription closed");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
