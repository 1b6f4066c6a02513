//! All device protocol message types.
//!
//! Every frame on the wire is a single JSON object carrying an integer `op`
//! and a string `type` that must agree with each other, an optional `req_id`
//! used to correlate acknowledgments, and the payload fields of that
//! operation flattened into the same object:
//!
//! ```json
//! {"op":4,"type":"game_command","req_id":"w1-7","command":1}
//! ```
//!
//! Messages are split into two closed families: [`OutboundMessage`] (client
//! to device) and [`InboundMessage`] (device to client).  A payload field the
//! codec does not know about is kept in the payload's `extra` map so newer
//! firmware can add fields without breaking older clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier of a device within a session (e.g. `"w1"` or a MAC string).
pub type DeviceId = String;

/// Unknown payload fields, preserved but not interpreted.
pub type ExtraFields = Map<String, Value>;

// ── Operation codes ───────────────────────────────────────────────────────────

/// Which way a message travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client → device.
    ToDevice,
    /// Device → client.
    FromDevice,
}

/// All operation codes defined by the device protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    // Client → device (1–9)
    GetStatus = 1,
    Heartbeat = 2,
    ConfigUpdate = 3,
    GameCommand = 4,
    HitForward = 5,
    KillConfirmed = 6,
    RemoteSound = 7,
    // Device → client (10–19)
    Status = 10,
    HeartbeatAck = 11,
    ShotFired = 12,
    HitReport = 13,
    Respawn = 14,
    ReloadEvent = 15,
    GameOver = 16,
    // Generic acknowledgment
    Ack = 20,
}

impl TryFrom<u8> for OpCode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            1 => Ok(OpCode::GetStatus),
            2 => Ok(OpCode::Heartbeat),
            3 => Ok(OpCode::ConfigUpdate),
            4 => Ok(OpCode::GameCommand),
            5 => Ok(OpCode::HitForward),
            6 => Ok(OpCode::KillConfirmed),
            7 => Ok(OpCode::RemoteSound),
            10 => Ok(OpCode::Status),
            11 => Ok(OpCode::HeartbeatAck),
            12 => Ok(OpCode::ShotFired),
            13 => Ok(OpCode::HitReport),
            14 => Ok(OpCode::Respawn),
            15 => Ok(OpCode::ReloadEvent),
            16 => Ok(OpCode::GameOver),
            20 => Ok(OpCode::Ack),
            _ => Err(()),
        }
    }
}

impl OpCode {
    /// The `type` discriminant string that must accompany this code.
    pub fn name(self) -> &'static str {
        match self {
            OpCode::GetStatus => "get_status",
            OpCode::Heartbeat => "heartbeat",
            OpCode::ConfigUpdate => "config_update",
            OpCode::GameCommand => "game_command",
            OpCode::HitForward => "hit_forward",
            OpCode::KillConfirmed => "kill_confirmed",
            OpCode::RemoteSound => "remote_sound",
            OpCode::Status => "status",
            OpCode::HeartbeatAck => "heartbeat_ack",
            OpCode::ShotFired => "shot_fired",
            OpCode::HitReport => "hit_report",
            OpCode::Respawn => "respawn",
            OpCode::ReloadEvent => "reload_event",
            OpCode::GameOver => "game_over",
            OpCode::Ack => "ack",
        }
    }

    pub fn direction(self) -> Direction {
        if (self as u8) < 10 {
            Direction::ToDevice
        } else {
            Direction::FromDevice
        }
    }
}

// ── Shared enums ──────────────────────────────────────────────────────────────

/// Game command carried by `game_command`, encoded as its integer value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum GameCommand {
    Stop = 0,
    Start = 1,
    Reset = 2,
    Pause = 3,
    Unpause = 4,
}

impl TryFrom<u8> for GameCommand {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(GameCommand::Stop),
            1 => Ok(GameCommand::Start),
            2 => Ok(GameCommand::Reset),
            3 => Ok(GameCommand::Pause),
            4 => Ok(GameCommand::Unpause),
            other => Err(format!("unknown game command: {other}")),
        }
    }
}

impl From<GameCommand> for u8 {
    fn from(command: GameCommand) -> u8 {
        command as u8
    }
}

/// Infrared emitter power mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IrPower {
    Indoor,
    Outdoor,
}

/// Phase of a reload cycle reported by `reload_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPhase {
    Started,
    Finished,
}

// ── Outbound payloads ─────────────────────────────────────────────────────────

/// GET_STATUS (1): asks the device for a full `status` snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GetStatusMessage {
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// HEARTBEAT (2): liveness probe; the device answers with `heartbeat_ack`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    /// Client wall-clock time in milliseconds, echoed back in the ack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// CONFIG_UPDATE (3) payload.
///
/// Only the fields being changed are present.  When `reset_to_defaults` is
/// `Some(true)` the device restores its factory configuration and every other
/// field is ignored; the encoder strips them before transmission (see
/// [`DeviceConfig::effective`]).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    // Identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<u8>,
    /// Display color as `0xRRGGBB`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,

    // Hardware / AV
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ir_power: Option<IrPower>,
    /// Speaker volume, 0–100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound_profile: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub haptics_enabled: Option<bool>,

    // Health mechanics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hearts_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_hearts: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hearts: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respawn_time_s: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage_in: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub damage_out: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_fire: Option<bool>,

    // Ammo mechanics
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ammo_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ammo: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload_time_ms: Option<u32>,

    /// Game length bound in seconds; `0` means manual stop only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_duration_s: Option<u32>,

    /// MAC addresses of peer devices for the device-to-device mesh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_to_defaults: Option<bool>,

    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl DeviceConfig {
    /// A config update that only asks the device to restore its defaults.
    pub fn reset() -> Self {
        Self {
            reset_to_defaults: Some(true),
            ..Default::default()
        }
    }

    /// Returns `true` if the update would not change anything on the device.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns the config that is actually transmitted.
    ///
    /// A reset request takes precedence over every co-present field.
    pub fn effective(&self) -> Self {
        if self.reset_to_defaults == Some(true) {
            Self::reset()
        } else {
            self.clone()
        }
    }
}

/// GAME_COMMAND (4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameCommandMessage {
    pub command: GameCommand,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl GameCommandMessage {
    pub fn new(command: GameCommand) -> Self {
        Self {
            command,
            extra: ExtraFields::new(),
        }
    }
}

/// HIT_FORWARD (5): tells a shooter's weapon that one of its shots landed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitForwardMessage {
    /// Sequence id of the shot, as reported by the target's `hit_report`.
    pub seq_id: u32,
    pub target_id: u16,
    pub shooter_id: u16,
    pub damage: u8,
    pub fatal: bool,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// KILL_CONFIRMED (6): credits the shooter with a kill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillConfirmedMessage {
    pub victim_id: u16,
    /// `true` when the victim was on the shooter's own team.
    #[serde(default)]
    pub friendly: bool,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// REMOTE_SOUND (7): plays a sound effect on the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSoundMessage {
    pub sound_id: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u8>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

// ── Inbound payloads ──────────────────────────────────────────────────────────

/// Configuration echoed back inside a `status` message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigEcho {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hearts_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hearts: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ammo_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ammo: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_fire: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_duration_s: Option<u32>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Cumulative counters since the last game reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shots_fired: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enemy_kills: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_kills: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deaths: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hits_received: Option<u32>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Live gameplay state of the device.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_hearts: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_ammo: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respawning: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reloading: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_time_remaining_s: Option<u32>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// STATUS (10): full or partial device snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigEcho>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<DeviceStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<LiveState>,
    /// Wi-Fi signal strength in dBm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_v: Option<f32>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// HEARTBEAT_ACK (11).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatAckMessage {
    /// Echo of [`HeartbeatMessage::timestamp_ms`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_ms: Option<u64>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// SHOT_FIRED (12).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotFiredMessage {
    pub seq_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ammo_remaining: Option<u16>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// HIT_REPORT (13): the device was hit by another player's shot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitReportMessage {
    pub seq_id: u32,
    pub shooter_id: u16,
    pub damage: u8,
    pub fatal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hearts_remaining: Option<u8>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// RESPAWN (14).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RespawnMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hearts: Option<u8>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// RELOAD_EVENT (15).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReloadEventMessage {
    pub phase: ReloadPhase,
    /// Magazine size after the reload finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ammo: Option<u16>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// GAME_OVER (16).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameOverMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// ACK (20): acknowledges the outbound message whose `req_id` it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckMessage {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

// ── Message families ──────────────────────────────────────────────────────────

/// Every message a client may send to a device.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    GetStatus(GetStatusMessage),
    Heartbeat(HeartbeatMessage),
    ConfigUpdate(DeviceConfig),
    GameCommand(GameCommandMessage),
    HitForward(HitForwardMessage),
    KillConfirmed(KillConfirmedMessage),
    RemoteSound(RemoteSoundMessage),
}

impl OutboundMessage {
    pub fn op_code(&self) -> OpCode {
        match self {
            OutboundMessage::GetStatus(_) => OpCode::GetStatus,
            OutboundMessage::Heartbeat(_) => OpCode::Heartbeat,
            OutboundMessage::ConfigUpdate(_) => OpCode::ConfigUpdate,
            OutboundMessage::GameCommand(_) => OpCode::GameCommand,
            OutboundMessage::HitForward(_) => OpCode::HitForward,
            OutboundMessage::KillConfirmed(_) => OpCode::KillConfirmed,
            OutboundMessage::RemoteSound(_) => OpCode::RemoteSound,
        }
    }

    /// Shorthand for a `game_command` message.
    pub fn game(command: GameCommand) -> Self {
        OutboundMessage::GameCommand(GameCommandMessage::new(command))
    }
}

/// Every message a device may send to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Status(StatusMessage),
    HeartbeatAck(HeartbeatAckMessage),
    ShotFired(ShotFiredMessage),
    HitReport(HitReportMessage),
    Respawn(RespawnMessage),
    ReloadEvent(ReloadEventMessage),
    GameOver(GameOverMessage),
    Ack(AckMessage),
}

impl InboundMessage {
    pub fn op_code(&self) -> OpCode {
        match self {
            InboundMessage::Status(_) => OpCode::Status,
            InboundMessage::HeartbeatAck(_) => OpCode::HeartbeatAck,
            InboundMessage::ShotFired(_) => OpCode::ShotFired,
            InboundMessage::HitReport(_) => OpCode::HitReport,
            InboundMessage::Respawn(_) => OpCode::Respawn,
            InboundMessage::ReloadEvent(_) => OpCode::ReloadEvent,
            InboundMessage::GameOver(_) => OpCode::GameOver,
            InboundMessage::Ack(_) => OpCode::Ack,
        }
    }
}

/// A message plus its optional request identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<M> {
    pub req_id: Option<String>,
    pub message: M,
}

impl<M> Frame<M> {
    /// A frame that expects no acknowledgment.
    pub fn new(message: M) -> Self {
        Self {
            req_id: None,
            message,
        }
    }

    pub fn with_request_id(req_id: impl Into<String>, message: M) -> Self {
        Self {
            req_id: Some(req_id.into()),
            message,
        }
    }
}

pub type OutboundFrame = Frame<OutboundMessage>;
pub type InboundFrame = Frame<InboundMessage>;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_code_try_from_accepts_every_defined_code() {
        for code in [1u8, 2, 3, 4, 5, 6, 7, 10, 11, 12, 13, 14, 15, 16, 20] {
            let op = OpCode::try_from(code).expect("defined code");
            assert_eq!(op as u8, code);
        }
    }

    #[test]
    fn test_op_code_try_from_rejects_gaps() {
        for code in [0u8, 8, 9, 17, 19, 21, 255] {
            assert!(OpCode::try_from(code).is_err(), "code {code} must be rejected");
        }
    }

    #[test]
    fn test_op_code_direction_splits_families() {
        assert_eq!(OpCode::RemoteSound.direction(), Direction::ToDevice);
        assert_eq!(OpCode::Status.direction(), Direction::FromDevice);
        assert_eq!(OpCode::Ack.direction(), Direction::FromDevice);
    }

    #[test]
    fn test_game_command_rejects_unknown_value() {
        assert!(GameCommand::try_from(5).is_err());
        assert_eq!(GameCommand::try_from(3), Ok(GameCommand::Pause));
    }

    #[test]
    fn test_device_config_effective_strips_fields_on_reset() {
        // Arrange
        let cfg = DeviceConfig {
            team_id: Some(2),
            volume: Some(80),
            reset_to_defaults: Some(true),
            ..Default::default()
        };

        // Act
        let effective = cfg.effective();

        // Assert
        assert_eq!(effective, DeviceConfig::reset());
    }

    #[test]
    fn test_device_config_effective_keeps_fields_without_reset() {
        let cfg = DeviceConfig {
            team_id: Some(2),
            reset_to_defaults: Some(false),
            ..Default::default()
        };
        assert_eq!(cfg.effective(), cfg);
    }

    #[test]
    fn test_device_config_is_empty_only_for_default() {
        assert!(DeviceConfig::default().is_empty());
        assert!(!DeviceConfig::reset().is_empty());
    }
}
