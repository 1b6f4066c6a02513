//! Local transport: a WebSocket client connection straight to the device.
//!
//! Devices run a small WebSocket server (default `ws://<address>:80/ws`) and
//! speak JSON text frames.  Binary frames are accepted as well; protocol
//! ping/pong is answered by tokio-tungstenite and never reaches the link.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::application::transport::{Channel, Connector, TransportError};
use crate::domain::Endpoint;

pub const DEFAULT_DEVICE_PORT: u16 = 80;
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Upper bound on delivering the Close frame.  A device that stopped
/// reading is dropped once it expires.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type DeviceStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket channels to directly reachable devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketConnector {
    port: u16,
    path: String,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_PORT, DEFAULT_WS_PATH)
    }
}

impl WebSocketConnector {
    /// `port` is used for addresses that do not carry one.
    pub fn new(port: u16, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self { port, path }
    }

    /// The URL dialled for a device address.
    ///
    /// Full `ws://` / `wss://` URLs are used as given.
    pub fn url_for(&self, address: &str) -> String {
        if address.starts_with("ws://") || address.starts_with("wss://") {
            return address.to_string();
        }
        if address.contains(':') {
            format!("ws://{address}{}", self.path)
        } else {
            format!("ws://{address}:{}{}", self.port, self.path)
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Channel>, TransportError> {
        let Endpoint::Direct { address } = endpoint else {
            return Err(TransportError::Unsupported(format!(
                "local transport cannot open {endpoint}"
            )));
        };
        let url = self.url_for(address);
        let stream = handshake(&url).await.map_err(|e| TransportError::Open {
            endpoint: url.clone(),
            reason: format!("{e:#}"),
        })?;
        info!(%url, "websocket connected");
        Ok(Box::new(WebSocketChannel { url, stream }))
    }
}

async fn handshake(url: &str) -> anyhow::Result<DeviceStream> {
    let (stream, _response) = connect_async(url)
        .await
        .with_context(|| format!("websocket handshake with {url} failed"))?;
    Ok(stream)
}

struct WebSocketChannel {
    url: String,
    stream: DeviceStream,
}

#[async_trait]
impl Channel for WebSocketChannel {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        let text = String::from_utf8(frame)
            .map_err(|e| TransportError::Send(format!("frame is not UTF-8: {e}")))?;
        self.stream
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.into_bytes())),
                Ok(WsMessage::Binary(bytes)) => return Some(Ok(bytes)),
                Ok(WsMessage::Close(frame)) => {
                    debug!(url = %self.url, ?frame, "device closed the websocket");
                    return None;
                }
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => continue,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        match tokio::time::timeout(CLOSE_TIMEOUT, self.stream.close(None)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(url = %self.url, error = %e, "websocket close failed"),
            Err(_) => warn!(
                url = %self.url,
                timeout = ?CLOSE_TIMEOUT,
                "device did not take the close frame; dropping the connection"
            ),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn test_url_for_appends_default_port_and_path() {
        let connector = WebSocketConnector::default();
        assert_eq!(connector.url_for("192.168.4.1"), "ws://192.168.4.1:80/ws");
    }

    #[test]
    fn test_url_for_keeps_explicit_port() {
        let connector = WebSocketConnector::new(80, "ws");
        assert_eq!(connector.url_for("127.0.0.1:9001"), "ws://127.0.0.1:9001/ws");
    }

    #[test]
    fn test_url_for_passes_full_urls_through() {
        let connector = WebSocketConnector::default();
        assert_eq!(connector.url_for("wss://dev.example/x"), "wss://dev.example/x");
    }

    #[tokio::test]
    async fn test_open_rejects_relayed_endpoint() {
        let connector = WebSocketConnector::default();
        let endpoint = Endpoint::Relayed {
            session_id: "s".into(),
            device_id: "w1".into(),
        };

        let result = connector.open(&endpoint).await;

        assert!(matches!(result, Err(TransportError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_open_reports_unreachable_device() {
        // Arrange: bind then drop a listener so the port is closed.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);
        let connector = WebSocketConnector::default();

        // Act
        let result = connector.open(&Endpoint::Direct { address }).await;

        // Assert
        assert!(matches!(result, Err(TransportError::Open { .. })));
    }

    #[tokio::test]
    async fn test_channel_exchanges_text_frames_with_device() {
        // Arrange: a one-shot device that echoes a single frame back.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let device = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(tcp).await.unwrap();
            if let Some(Ok(message)) = ws.next().await {
                ws.send(message).await.unwrap();
            }
            ws.close(None).await.ok();
        });
        let connector = WebSocketConnector::default();

        // Act
        let mut channel = connector
            .open(&Endpoint::Direct { address })
            .await
            .unwrap();
        channel.send(br#"{"op":1,"type":"get_status"}"#.to_vec()).await.unwrap();
        let echoed = channel.recv().await.unwrap().unwrap();

        // Assert
        assert_eq!(echoed, br#"{"op":1,"type":"get_status"}"#);
        assert!(channel.recv().await.is_none());
        channel.close().await;
        device.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_gives_up_on_a_device_that_stopped_reading() {
        // Arrange: a device that completes the handshake and never reads again.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let device = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let _ws = accept_async(tcp).await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        let mut channel = WebSocketConnector::default()
            .open(&Endpoint::Direct { address })
            .await
            .unwrap();
        let chunk = "x".repeat(64 * 1024).into_bytes();
        let mut blocked = false;
        for _ in 0..4096 {
            let sent = tokio::time::timeout(
                Duration::from_millis(100),
                channel.send(chunk.clone()),
            )
            .await;
            if sent.is_err() {
                blocked = true;
                break;
            }
        }
        assert!(blocked, "socket buffers never filled up");

        // Act
        let started = std::time::Instant::now();
        channel.close().await;

        // Assert
        assert!(started.elapsed() < CLOSE_TIMEOUT + Duration::from_secs(2));
        device.abort();
    }
}
