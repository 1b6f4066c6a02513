//! JSON codec for device protocol frames.
//!
//! Wire format (one frame per WebSocket text message or relay payload):
//! ```text
//! {"op":<code>,"type":"<name>","req_id":"<optional>", <payload fields...>}
//! ```
//! The `op` integer is authoritative; `type` must match [`OpCode::name`].
//! The codec performs no I/O and keeps no state.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::protocol::messages::{
    Direction, Frame, InboundFrame, InboundMessage, OpCode, OutboundFrame, OutboundMessage,
    StatusMessage,
};

const OP_KEY: &str = "op";
const TYPE_KEY: &str = "type";
const REQ_ID_KEY: &str = "req_id";

/// Errors raised while building an outbound frame. Nothing is transmitted.
#[derive(Debug, Error, PartialEq)]
pub enum EncodeError {
    /// A `config_update` that would change nothing.
    #[error("config_update carries no fields")]
    EmptyConfigUpdate,

    /// `req_id` was set to an empty string.
    #[error("request id must not be empty")]
    EmptyRequestId,

    /// A payload's `extra` map tried to set one of the envelope keys.
    #[error("payload field `{0}` collides with an envelope key")]
    ReservedField(String),

    /// serde_json refused the payload (e.g. a non-finite float).
    #[error("payload serialization failed: {0}")]
    Serialize(String),
}

/// Errors raised while decoding an inbound frame. The frame is dropped.
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    /// The bytes are not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// The top-level JSON value is not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// The `op` field is absent or not an unsigned integer.
    #[error("missing or non-integer `op` field")]
    MissingOpCode,

    /// The operation code is not in the protocol table.
    #[error("unknown operation code: {0}")]
    UnknownOpCode(u64),

    /// The `type` field is absent or not a string.
    #[error("missing or non-string `type` field")]
    MissingDiscriminant,

    /// `type` disagrees with `op`.
    #[error("discriminant mismatch for op {op}: expected `{expected}`, found `{found}`")]
    DiscriminantMismatch {
        op: u8,
        expected: &'static str,
        found: String,
    },

    /// A valid code that belongs to the other message family.
    #[error("operation `{0}` is not valid in this direction")]
    WrongDirection(&'static str),

    /// `req_id` is present but not a string.
    #[error("`req_id` must be a string")]
    InvalidRequestId,

    /// The payload is missing a required field or has a field of the wrong shape.
    #[error("invalid `{op}` payload: {reason}")]
    InvalidPayload { op: &'static str, reason: String },
}

/// A structurally valid value that is semantically out of range.
///
/// Range problems never fail decoding; they are reported through the hook
/// passed to [`decode_inbound_with_hook`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeWarning {
    #[error("current_hearts {current} exceeds max_hearts {max}")]
    HeartsAboveMax { current: u8, max: u8 },

    #[error("current_ammo {current} exceeds max_ammo {max}")]
    AmmoAboveMax { current: u16, max: u16 },
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a client → device frame.
///
/// # Errors
///
/// Returns [`EncodeError`] if the message is not valid for its operation.
///
/// # Examples
///
/// ```rust
/// use lasertag_core::protocol::{decode_outbound, encode_outbound};
/// use lasertag_core::protocol::messages::{Frame, GameCommand, OutboundMessage};
///
/// let frame = Frame::with_request_id("w1-1", OutboundMessage::game(GameCommand::Start));
/// let bytes = encode_outbound(&frame).unwrap();
/// assert_eq!(decode_outbound(&bytes).unwrap(), frame);
/// ```
pub fn encode_outbound(frame: &OutboundFrame) -> Result<Vec<u8>, EncodeError> {
    let payload = match &frame.message {
        OutboundMessage::GetStatus(m) => to_payload(m)?,
        OutboundMessage::Heartbeat(m) => to_payload(m)?,
        OutboundMessage::ConfigUpdate(cfg) => {
            let effective = cfg.effective();
            if effective.is_empty() {
                return Err(EncodeError::EmptyConfigUpdate);
            }
            to_payload(&effective)?
        }
        OutboundMessage::GameCommand(m) => to_payload(m)?,
        OutboundMessage::HitForward(m) => to_payload(m)?,
        OutboundMessage::KillConfirmed(m) => to_payload(m)?,
        OutboundMessage::RemoteSound(m) => to_payload(m)?,
    };
    write_envelope(frame.message.op_code(), frame.req_id.as_deref(), payload)
}

/// Decodes a client → device frame (used by device simulators and relays).
///
/// # Errors
///
/// Returns [`DecodeError`] if the frame is malformed or not a client message.
pub fn decode_outbound(bytes: &[u8]) -> Result<OutboundFrame, DecodeError> {
    let (op, req_id, payload) = read_envelope(bytes, Direction::ToDevice)?;
    let message = match op {
        OpCode::GetStatus => OutboundMessage::GetStatus(from_payload(op, payload)?),
        OpCode::Heartbeat => OutboundMessage::Heartbeat(from_payload(op, payload)?),
        OpCode::ConfigUpdate => OutboundMessage::ConfigUpdate(from_payload(op, payload)?),
        OpCode::GameCommand => OutboundMessage::GameCommand(from_payload(op, payload)?),
        OpCode::HitForward => OutboundMessage::HitForward(from_payload(op, payload)?),
        OpCode::KillConfirmed => OutboundMessage::KillConfirmed(from_payload(op, payload)?),
        OpCode::RemoteSound => OutboundMessage::RemoteSound(from_payload(op, payload)?),
        other => return Err(DecodeError::WrongDirection(other.name())),
    };
    Ok(Frame { req_id, message })
}

/// Encodes a device → client frame (used by device simulators and relays).
///
/// # Errors
///
/// Returns [`EncodeError`] if the payload cannot be serialized.
pub fn encode_inbound(frame: &InboundFrame) -> Result<Vec<u8>, EncodeError> {
    let payload = match &frame.message {
        InboundMessage::Status(m) => to_payload(m)?,
        InboundMessage::HeartbeatAck(m) => to_payload(m)?,
        InboundMessage::ShotFired(m) => to_payload(m)?,
        InboundMessage::HitReport(m) => to_payload(m)?,
        InboundMessage::Respawn(m) => to_payload(m)?,
        InboundMessage::ReloadEvent(m) => to_payload(m)?,
        InboundMessage::GameOver(m) => to_payload(m)?,
        InboundMessage::Ack(m) => to_payload(m)?,
    };
    write_envelope(frame.message.op_code(), frame.req_id.as_deref(), payload)
}

/// Decodes a device → client frame, discarding range warnings.
///
/// # Errors
///
/// Returns [`DecodeError`] if the frame is malformed or not a device message.
pub fn decode_inbound(bytes: &[u8]) -> Result<InboundFrame, DecodeError> {
    decode_inbound_with_hook(bytes, |_| {})
}

/// Decodes a device → client frame and reports out-of-range values to `hook`.
///
/// # Errors
///
/// Returns [`DecodeError`] if the frame is malformed or not a device message.
pub fn decode_inbound_with_hook<F>(bytes: &[u8], mut hook: F) -> Result<InboundFrame, DecodeError>
where
    F: FnMut(RangeWarning),
{
    let (op, req_id, payload) = read_envelope(bytes, Direction::FromDevice)?;
    let message = match op {
        OpCode::Status => {
            let status: StatusMessage = from_payload(op, payload)?;
            check_status_ranges(&status, &mut hook);
            InboundMessage::Status(status)
        }
        OpCode::HeartbeatAck => InboundMessage::HeartbeatAck(from_payload(op, payload)?),
        OpCode::ShotFired => InboundMessage::ShotFired(from_payload(op, payload)?),
        OpCode::HitReport => InboundMessage::HitReport(from_payload(op, payload)?),
        OpCode::Respawn => InboundMessage::Respawn(from_payload(op, payload)?),
        OpCode::ReloadEvent => InboundMessage::ReloadEvent(from_payload(op, payload)?),
        OpCode::GameOver => InboundMessage::GameOver(from_payload(op, payload)?),
        OpCode::Ack => InboundMessage::Ack(from_payload(op, payload)?),
        other => return Err(DecodeError::WrongDirection(other.name())),
    };
    Ok(Frame { req_id, message })
}

// ── Envelope handling ─────────────────────────────────────────────────────────

fn write_envelope(
    op: OpCode,
    req_id: Option<&str>,
    mut payload: Map<String, Value>,
) -> Result<Vec<u8>, EncodeError> {
    for key in [OP_KEY, TYPE_KEY, REQ_ID_KEY] {
        if payload.contains_key(key) {
            return Err(EncodeError::ReservedField(key.to_string()));
        }
    }
    payload.insert(OP_KEY.to_string(), Value::from(op as u8));
    payload.insert(TYPE_KEY.to_string(), Value::from(op.name()));
    if let Some(id) = req_id {
        if id.is_empty() {
            return Err(EncodeError::EmptyRequestId);
        }
        payload.insert(REQ_ID_KEY.to_string(), Value::from(id));
    }
    serde_json::to_vec(&Value::Object(payload)).map_err(|e| EncodeError::Serialize(e.to_string()))
}

/// Splits a frame into its operation code, request id, and payload fields.
fn read_envelope(
    bytes: &[u8],
    expected: Direction,
) -> Result<(OpCode, Option<String>, Map<String, Value>), DecodeError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
    let Value::Object(mut map) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let raw_op = map
        .remove(OP_KEY)
        .and_then(|v| v.as_u64())
        .ok_or(DecodeError::MissingOpCode)?;
    let op = u8::try_from(raw_op)
        .ok()
        .and_then(|b| OpCode::try_from(b).ok())
        .ok_or(DecodeError::UnknownOpCode(raw_op))?;

    let found = match map.remove(TYPE_KEY) {
        Some(Value::String(s)) => s,
        _ => return Err(DecodeError::MissingDiscriminant),
    };
    if found != op.name() {
        return Err(DecodeError::DiscriminantMismatch {
            op: op as u8,
            expected: op.name(),
            found,
        });
    }

    if op.direction() != expected {
        return Err(DecodeError::WrongDirection(op.name()));
    }

    let req_id = match map.remove(REQ_ID_KEY) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(_) => return Err(DecodeError::InvalidRequestId),
    };

    Ok((op, req_id, map))
}

fn to_payload<T: Serialize>(payload: &T) -> Result<Map<String, Value>, EncodeError> {
    match serde_json::to_value(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(EncodeError::Serialize(format!(
            "payload serialized to {other} instead of an object"
        ))),
        Err(e) => Err(EncodeError::Serialize(e.to_string())),
    }
}

fn from_payload<T: DeserializeOwned>(op: OpCode, payload: Map<String, Value>) -> Result<T, DecodeError> {
    serde_json::from_value(Value::Object(payload)).map_err(|e| DecodeError::InvalidPayload {
        op: op.name(),
        reason: e.to_string(),
    })
}

/// Frame-local check: runs only when the status carries both the config
/// echo and the live values.  Maximums echoed by an earlier status are
/// checked against the folded snapshot by `DeviceState::range_warnings`.
fn check_status_ranges<F: FnMut(RangeWarning)>(status: &StatusMessage, hook: &mut F) {
    let (Some(config), Some(state)) = (&status.config, &status.state) else {
        return;
    };
    if config.hearts_enabled != Some(false) {
        if let (Some(current), Some(max)) = (state.current_hearts, config.max_hearts) {
            if current > max {
                debug!(current, max, "status reports hearts above configured maximum");
                hook(RangeWarning::HeartsAboveMax { current, max });
            }
        }
    }
    if config.ammo_enabled != Some(false) {
        if let (Some(current), Some(max)) = (state.current_ammo, config.max_ammo) {
            if current > max {
                debug!(current, max, "status reports ammo above configured maximum");
                hook(RangeWarning::AmmoAboveMax { current, max });
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
