//! lasertag-hub library crate.
//!
//! Keeps many laser-tag devices connected, synchronised and observable, and
//! sends them commands.  Devices are reached either directly over the LAN or
//! through a per-session cloud relay; nothing above the transport layer can
//! tell the difference.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Dispatcher ──send/broadcast──▶ Registry ──owns──▶ LinkHandle (one per device)
//!                                   ▲                     │
//!                                   └──── LinkEvent ──────┘
//!                                                         │ Channel
//! [lasertag-hub]                                          ▼
//!   ├── domain/          Transport selection, reconnect backoff
//!   ├── application/     Device link actor, registry, dispatcher, transport ports
//!   └── infrastructure/
//!         ├── transport/ WebSocket, relay, in-memory relay, mock
//!         └── storage/   TOML configuration
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `lasertag-core`; sockets are
//!   injected as `Arc<dyn Connector>`.
//! - `infrastructure` depends on all other layers plus `tokio-tungstenite`
//!   and `toml`.

/// Domain layer: transport selection and reconnect policy (no I/O).
pub mod domain;

/// Application layer: links, registry and dispatcher.
pub mod application;

/// Infrastructure layer: transport adapters and configuration storage.
pub mod infrastructure;

pub use application::dispatcher::{BroadcastResult, Dispatcher, RetryPolicy};
pub use application::link::{Ack, CommandError, LinkConfig, LinkHandle};
pub use application::registry::{
    DeviceUpdate, Registry, RegistryError, RegistryOptions, Subscription,
};
pub use application::transport::{Channel, Connector, TransportError};
pub use domain::{
    select_transport, Endpoint, ReconnectPolicy, SelectorError, TransportDescriptor,
    TransportMode,
};
