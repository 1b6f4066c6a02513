//! Domain entities for the lasertag hub.
//!
//! Nothing in here touches sockets, timers or the async runtime.  The
//! registry in `lasertag-hub` owns the clock and the channels; this module
//! only knows how a snapshot changes when something happens to a device.

/// Per-device snapshots and the pure functions that fold events into them.
pub mod device_state;
