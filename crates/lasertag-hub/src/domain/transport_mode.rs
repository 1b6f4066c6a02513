//! Transport selection.
//!
//! A session reaches its devices either directly over the LAN (one socket per
//! device) or through a cloud relay (one shared pub/sub channel per session
//! addressed by device id).  Which one is decided once per session from an
//! external mode signal; switching modes rebuilds every link rather than
//! migrating live connections.

use std::fmt;

use thiserror::Error;

use lasertag_core::DeviceId;

/// The mode signal supplied by whoever owns the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMode {
    /// Devices are on the same network as the hub.
    Local,
    /// Devices are reached through the relay channel of `session_id`.
    Cloud { session_id: String },
}

impl TransportMode {
    pub fn cloud(session_id: impl Into<String>) -> Self {
        TransportMode::Cloud {
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Local => f.write_str("local"),
            TransportMode::Cloud { session_id } => write!(f, "cloud (session {session_id})"),
        }
    }
}

/// How every link of a session reaches its device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportDescriptor {
    /// Point-to-point connection to the device's network address.
    Direct,
    /// Shared per-session relay channel, frames addressed by device id.
    Relayed { session_id: String },
}

/// Where one particular link connects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Direct { address: String },
    Relayed { session_id: String, device_id: DeviceId },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Direct { address } => f.write_str(address),
            Endpoint::Relayed {
                session_id,
                device_id,
            } => write!(f, "relay:{session_id}/{device_id}"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("cloud mode requires a non-empty session id")]
    EmptySessionId,
}

/// Maps a transport mode to the descriptor every link of the session uses.
///
/// # Errors
///
/// Returns [`SelectorError::EmptySessionId`] for a cloud mode without a
/// session to subscribe to.
pub fn select_transport(mode: &TransportMode) -> Result<TransportDescriptor, SelectorError> {
    match mode {
        TransportMode::Local => Ok(TransportDescriptor::Direct),
        TransportMode::Cloud { session_id } if session_id.trim().is_empty() => {
            Err(SelectorError::EmptySessionId)
        }
        TransportMode::Cloud { session_id } => Ok(TransportDescriptor::Relayed {
            session_id: session_id.clone(),
        }),
    }
}

impl TransportDescriptor {
    /// Resolves the endpoint of one device under this descriptor.
    ///
    /// In relayed mode the address is not used for routing; the relay
    /// addresses frames by device id.
    pub fn endpoint(&self, device_id: &str, address: &str) -> Endpoint {
        match self {
            TransportDescriptor::Direct => Endpoint::Direct {
                address: address.to_string(),
            },
            TransportDescriptor::Relayed { session_id } => Endpoint::Relayed {
                session_id: session_id.clone(),
                device_id: device_id.to_string(),
            },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
