//! Infrastructure layer for the hub.
//!
//! Contains the adapters behind the transport ports (WebSocket to a device,
//! relay channel, in-memory and mock doubles) and TOML config storage.
//!
//! **Dependency rule**: this layer may depend on `application`, `domain` and
//! `lasertag_core`, but MUST NOT be imported by the `application` or domain
//! layers outside of tests.

pub mod storage;
pub mod transport;
