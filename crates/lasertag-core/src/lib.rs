//! # lasertag-core
//!
//! Shared library for the lasertag hub: the device wire protocol and the
//! per-device state model.
//!
//! This crate has no dependency on the async runtime or on any network
//! socket.  Everything here can be exercised from a plain `#[test]`.
//!
//! - **`protocol`** – How messages travel to and from a tagger or target.
//!   Every frame is one JSON object with an integer `op`, a matching `type`
//!   string, an optional `req_id` and the payload fields of that operation.
//!   The codec validates the envelope, keeps unknown payload fields and
//!   reports soft range problems through a hook instead of failing.
//!
//! - **`domain`** – The immutable [`DeviceState`] snapshot and the fold
//!   functions that derive the next snapshot from a connection change or a
//!   decoded inbound message.

pub mod domain;
pub mod protocol;

pub use domain::device_state::{
    ConfigSnapshot, ConnectionInfo, ConnectionState, DeviceState, LiveSnapshot, StatsSnapshot,
};
pub use protocol::codec::{
    decode_inbound, decode_inbound_with_hook, decode_outbound, encode_inbound, encode_outbound,
    DecodeError, EncodeError, RangeWarning,
};
pub use protocol::messages::{
    DeviceId, Frame, InboundFrame, InboundMessage, OpCode, OutboundFrame, OutboundMessage,
};
