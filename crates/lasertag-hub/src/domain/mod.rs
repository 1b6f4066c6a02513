//! Domain rules for the hub that need no I/O and no runtime.
//!
//! - **`transport_mode`** – Turns the session's transport mode into a
//!   descriptor, and a descriptor plus a device into an endpoint.
//! - **`backoff`** – Reconnect delay schedule used by every device link.

pub mod backoff;
pub mod transport_mode;

pub use backoff::ReconnectPolicy;
pub use transport_mode::{select_transport, Endpoint, SelectorError, TransportDescriptor, TransportMode};
