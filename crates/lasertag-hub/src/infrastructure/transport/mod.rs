//! Transport adapters.
//!
//! - **`local`**  – WebSocket straight to the device (`ws://<address>/ws`).
//! - **`cloud`**  – The [`Relay`](cloud::Relay) port and a connector that
//!   opens per-device views onto a session's relay channel.
//! - **`memory`** – Loopback relay for tests and embedding.
//! - **`mock`**   – Scripted device side for tests.
//!
//! [`RoutingConnector`] picks the adapter that matches each endpoint, so a
//! registry can switch modes without replacing its connector.

use std::sync::Arc;

use async_trait::async_trait;

use crate::application::transport::{Channel, Connector, TransportError};
use crate::domain::Endpoint;

pub mod cloud;
pub mod local;
pub mod memory;
pub mod mock;

/// Dispatches direct endpoints to one connector and relayed ones to another.
#[derive(Clone)]
pub struct RoutingConnector {
    direct: Arc<dyn Connector>,
    relayed: Option<Arc<dyn Connector>>,
}

impl RoutingConnector {
    /// A connector that only serves direct endpoints.
    pub fn direct_only(direct: Arc<dyn Connector>) -> Self {
        Self {
            direct,
            relayed: None,
        }
    }

    pub fn new(direct: Arc<dyn Connector>, relayed: Arc<dyn Connector>) -> Self {
        Self {
            direct,
            relayed: Some(relayed),
        }
    }
}

#[async_trait]
impl Connector for RoutingConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Channel>, TransportError> {
        match (endpoint, &self.relayed) {
            (Endpoint::Direct { .. }, _) => self.direct.open(endpoint).await,
            (Endpoint::Relayed { .. }, Some(relayed)) => relayed.open(endpoint).await,
            (Endpoint::Relayed { .. }, None) => {
                Err(TransportError::Unsupported(endpoint.to_string()))
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::mock::MockConnector;

    #[tokio::test]
    async fn test_relayed_endpoint_without_relay_is_unsupported() {
        let (mock, _devices) = MockConnector::new();
        let connector = RoutingConnector::direct_only(Arc::new(mock));
        let endpoint = Endpoint::Relayed {
            session_id: "s".to_string(),
            device_id: "d1".to_string(),
        };

        let result = connector.open(&endpoint).await;

        assert!(matches!(result, Err(TransportError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_direct_endpoint_goes_to_direct_connector() {
        let (direct, mut direct_devices) = MockConnector::new();
        let (relayed, _relayed_devices) = MockConnector::new();
        let connector = RoutingConnector::new(Arc::new(direct.clone()), Arc::new(relayed.clone()));

        let channel = connector
            .open(&Endpoint::Direct {
                address: "10.0.0.9".to_string(),
            })
            .await;

        assert!(channel.is_ok());
        assert_eq!(direct_devices.recv().await.unwrap().key(), "10.0.0.9");
        assert_eq!(relayed.open_count("10.0.0.9"), 0);
    }
}
