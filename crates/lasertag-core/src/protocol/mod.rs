//! Protocol module containing message types and the JSON codec.

pub mod codec;
pub mod messages;
pub mod sequence;

pub use codec::{
    decode_inbound, decode_inbound_with_hook, decode_outbound, encode_inbound, encode_outbound,
    DecodeError, EncodeError, RangeWarning,
};
pub use messages::*;
pub use sequence::{RequestIds, SequenceCounter};
