//! Application layer: the use cases of the hub.
//!
//! - **`link`**       – One actor task per device: connect, heartbeat,
//!   request/ack correlation and reconnect with backoff.
//! - **`registry`**   – Owns every link of a session and folds their events
//!   into immutable per-device snapshots that consumers subscribe to.
//! - **`dispatcher`** – Sends commands to one or many devices and collects
//!   their acknowledgments.
//! - **`transport`**  – The ports a link talks through.  Adapters live in
//!   `infrastructure::transport`.
//!
//! Nothing here opens a socket directly; the concrete transport is injected
//! as an `Arc<dyn Connector>`.

pub mod dispatcher;
pub mod link;
pub mod registry;
pub mod transport;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch, `0` if the clock is before it.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
