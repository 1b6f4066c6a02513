//! Transport ports used by the device link.
//!
//! A [`Connector`] opens a [`Channel`] to an [`Endpoint`]; a channel moves
//! whole frames (one encoded JSON message each) in both directions.  The
//! concrete adapters (WebSocket, relay, mock) live in
//! `infrastructure::transport`.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Endpoint;

/// Errors raised by a transport.  Any of these forces the link into `error`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The endpoint could not be reached.
    #[error("failed to open {endpoint}: {reason}")]
    Open { endpoint: String, reason: String },

    /// The connector does not serve this kind of endpoint.
    #[error("no transport configured for {0}")]
    Unsupported(String),

    /// The channel was already closed.
    #[error("channel closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),
}

/// An open, bidirectional frame channel to one device.
///
/// `recv` must be cancel safe: the link polls it inside `select!` and drops
/// the future whenever another branch wins.
#[async_trait]
pub trait Channel: Send {
    /// Writes one frame.
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Waits for the next frame.  `None` means the peer closed the channel.
    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>>;

    /// Releases the underlying socket or subscription.  Idempotent.
    async fn close(&mut self);
}

/// Opens channels.  One connector is shared by every link of a registry.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Channel>, TransportError>;
}
