//! Loopback relay: an in-process [`Relay`] with a device-side API.
//!
//! Each session has two broadcast channels, hub→devices and devices→hub.
//! Frames published while nobody is subscribed are discarded, as a real
//! pub/sub relay would.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use lasertag_core::DeviceId;

use super::cloud::{Relay, RelayStream};
use crate::application::transport::TransportError;

const SESSION_CAPACITY: usize = 256;

type Tagged = (DeviceId, Vec<u8>);

#[derive(Clone)]
struct SessionChannels {
    to_devices: broadcast::Sender<Tagged>,
    to_hub: broadcast::Sender<Tagged>,
}

impl SessionChannels {
    fn new() -> Self {
        let (to_devices, _) = broadcast::channel(SESSION_CAPACITY);
        let (to_hub, _) = broadcast::channel(SESSION_CAPACITY);
        Self { to_devices, to_hub }
    }
}

#[derive(Default)]
pub struct InMemoryRelay {
    sessions: Mutex<HashMap<String, SessionChannels>>,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self, session_id: &str) -> SessionChannels {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_insert_with(SessionChannels::new)
            .clone()
    }

    /// Sends a frame from `device_id` to every hub subscriber of the session.
    ///
    /// Returns how many subscribers received it.
    pub fn device_publish(
        &self,
        session_id: &str,
        device_id: impl Into<DeviceId>,
        frame: Vec<u8>,
    ) -> usize {
        self.session(session_id)
            .to_hub
            .send((device_id.into(), frame))
            .unwrap_or(0)
    }

    /// Frames the hub publishes to any device of the session.
    pub fn device_subscribe(&self, session_id: &str) -> RelayStream {
        into_stream(self.session(session_id).to_devices.subscribe())
    }

    /// Forgets the session; its open streams end once drained.
    pub fn drop_session(&self, session_id: &str) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }
}

#[async_trait]
impl Relay for InMemoryRelay {
    async fn publish(
        &self,
        session_id: &str,
        device_id: &str,
        frame: Vec<u8>,
    ) -> Result<(), TransportError> {
        // No subscriber is not an error on a pub/sub channel.
        let _ = self
            .session(session_id)
            .to_devices
            .send((device_id.to_string(), frame));
        Ok(())
    }

    async fn subscribe(&self, session_id: &str) -> Result<RelayStream, TransportError> {
        Ok(into_stream(self.session(session_id).to_hub.subscribe()))
    }
}

fn into_stream(rx: broadcast::Receiver<Tagged>) -> RelayStream {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "relay subscriber fell behind, frames dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
