//! Aggregated, immutable per-device snapshots.
//!
//! A [`DeviceState`] is never mutated in place once published.  Every fold
//! method takes `&self` and returns a new value, so a consumer holding an
//! older snapshot keeps seeing a consistent picture while the registry moves
//! on.  Timestamps are passed in by the caller (milliseconds since the Unix
//! epoch) which keeps folding pure and testable.

use serde::{Deserialize, Serialize};

use crate::protocol::codec::RangeWarning;
use crate::protocol::messages::{
    ConfigEcho, DeviceId, DeviceStats, InboundMessage, LiveState, ReloadPhase, StatusMessage,
};

/// Connection lifecycle of one device link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Transport-level metadata about a device.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionInfo {
    pub state: ConnectionState,
    pub last_connected_ms: Option<u64>,
    pub last_heartbeat_ms: Option<u64>,
    pub last_status_ms: Option<u64>,
    /// Set when the link enters `error`; cleared on the next `connected`.
    pub last_error: Option<String>,
    /// Wi-Fi signal strength in dBm.
    pub rssi: Option<i16>,
    pub battery_v: Option<f32>,
    pub uptime_ms: Option<u64>,
    /// Heartbeat round trip, when the device echoes the timestamp.
    pub latency_ms: Option<u64>,
}

/// Most recently echoed configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigSnapshot {
    pub device_id: Option<u16>,
    pub player_id: Option<u16>,
    pub team_id: Option<u8>,
    pub color: Option<u32>,
    pub hearts_enabled: bool,
    pub max_hearts: Option<u8>,
    pub ammo_enabled: bool,
    pub max_ammo: Option<u16>,
    pub friendly_fire: Option<bool>,
    pub game_duration_s: Option<u32>,
}

/// Cumulative counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub shots_fired: u32,
    pub enemy_kills: u32,
    pub friendly_kills: u32,
    pub deaths: u32,
    pub hits_received: u32,
}

/// Live gameplay values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LiveSnapshot {
    pub current_hearts: u8,
    pub current_ammo: u16,
    pub respawning: bool,
    pub reloading: bool,
    pub game_time_remaining_s: Option<u32>,
}

/// Everything a consumer may know about one device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    pub device_id: DeviceId,
    /// Network address (local mode) or relay address (cloud mode).
    pub address: String,
    pub connection: ConnectionInfo,
    pub config: ConfigSnapshot,
    pub stats: StatsSnapshot,
    pub live: LiveSnapshot,
}

impl DeviceState {
    /// The snapshot of a device nothing has been heard from yet.
    pub fn new(device_id: impl Into<DeviceId>, address: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            address: address.into(),
            connection: ConnectionInfo::default(),
            config: ConfigSnapshot::default(),
            stats: StatsSnapshot::default(),
            live: LiveSnapshot::default(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state
    }

    /// Folds a connection state transition.
    pub fn with_connection_state(&self, state: ConnectionState, now_ms: u64) -> Self {
        let mut next = self.clone();
        next.connection.state = state;
        if state == ConnectionState::Connected {
            next.connection.last_connected_ms = Some(now_ms);
            next.connection.last_error = None;
        }
        next
    }

    /// Folds an error reported by the link.
    pub fn with_error(&self, reason: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.connection.last_error = Some(reason.into());
        next
    }

    /// Folds a decoded inbound message.
    ///
    /// Returns `None` when the message carries nothing that belongs in a
    /// snapshot (acknowledgments are consumed by the link itself).
    pub fn with_message(&self, message: &InboundMessage, now_ms: u64) -> Option<Self> {
        let mut next = self.clone();
        match message {
            InboundMessage::Status(status) => next.apply_status(status, now_ms),
            InboundMessage::HeartbeatAck(ack) => {
                next.connection.last_heartbeat_ms = Some(now_ms);
                if ack.uptime_ms.is_some() {
                    next.connection.uptime_ms = ack.uptime_ms;
                }
                if let Some(sent) = ack.timestamp_ms.filter(|sent| *sent <= now_ms) {
                    next.connection.latency_ms = Some(now_ms - sent);
                }
            }
            InboundMessage::ShotFired(shot) => {
                if let Some(ammo) = shot.ammo_remaining {
                    next.live.current_ammo = ammo;
                }
            }
            InboundMessage::HitReport(hit) => {
                if let Some(hearts) = hit.hearts_remaining {
                    next.live.current_hearts = hearts;
                } else if hit.fatal {
                    next.live.current_hearts = 0;
                }
                if hit.fatal {
                    next.live.respawning = true;
                }
            }
            InboundMessage::Respawn(respawn) => {
                next.live.respawning = false;
                if let Some(hearts) = respawn.hearts {
                    next.live.current_hearts = hearts;
                }
            }
            InboundMessage::ReloadEvent(reload) => match reload.phase {
                ReloadPhase::Started => next.live.reloading = true,
                ReloadPhase::Finished => {
                    next.live.reloading = false;
                    if let Some(ammo) = reload.ammo {
                        next.live.current_ammo = ammo;
                    }
                }
            },
            InboundMessage::GameOver(_) => {
                next.live.game_time_remaining_s = Some(0);
            }
            InboundMessage::Ack(_) => return None,
        }
        Some(next)
    }

    /// Live values above the maximums this device has echoed so far.
    ///
    /// Decoding only sees one frame at a time; this check also covers a
    /// status that carries live values but relies on an earlier config echo.
    pub fn range_warnings(&self) -> Vec<RangeWarning> {
        let mut warnings = Vec::new();
        if let Some(max) = self.config.max_hearts.filter(|_| self.config.hearts_enabled) {
            if self.live.current_hearts > max {
                warnings.push(RangeWarning::HeartsAboveMax {
                    current: self.live.current_hearts,
                    max,
                });
            }
        }
        if let Some(max) = self.config.max_ammo.filter(|_| self.config.ammo_enabled) {
            if self.live.current_ammo > max {
                warnings.push(RangeWarning::AmmoAboveMax {
                    current: self.live.current_ammo,
                    max,
                });
            }
        }
        warnings
    }

    fn apply_status(&mut self, status: &StatusMessage, now_ms: u64) {
        let conn = &mut self.connection;
        conn.last_status_ms = Some(now_ms);
        overwrite(&mut conn.uptime_ms, status.uptime_ms.map(Some));
        overwrite(&mut conn.rssi, status.rssi.map(Some));
        overwrite(&mut conn.battery_v, status.battery_v.map(Some));

        if let Some(echo) = &status.config {
            self.config.apply(echo);
        }
        if let Some(stats) = &status.stats {
            self.stats.apply(stats);
        }
        if let Some(state) = &status.state {
            self.live.apply(state);
        }
    }
}

impl ConfigSnapshot {
    fn apply(&mut self, echo: &ConfigEcho) {
        overwrite(&mut self.device_id, echo.device_id.map(Some));
        overwrite(&mut self.player_id, echo.player_id.map(Some));
        overwrite(&mut self.team_id, echo.team_id.map(Some));
        overwrite(&mut self.color, echo.color.map(Some));
        overwrite(&mut self.hearts_enabled, echo.hearts_enabled);
        overwrite(&mut self.max_hearts, echo.max_hearts.map(Some));
        overwrite(&mut self.ammo_enabled, echo.ammo_enabled);
        overwrite(&mut self.max_ammo, echo.max_ammo.map(Some));
        overwrite(&mut self.friendly_fire, echo.friendly_fire.map(Some));
        overwrite(&mut self.game_duration_s, echo.game_duration_s.map(Some));
    }
}

impl StatsSnapshot {
    fn apply(&mut self, stats: &DeviceStats) {
        overwrite(&mut self.shots_fired, stats.shots_fired);
        overwrite(&mut self.enemy_kills, stats.enemy_kills);
        overwrite(&mut self.friendly_kills, stats.friendly_kills);
        overwrite(&mut self.deaths, stats.deaths);
        overwrite(&mut self.hits_received, stats.hits_received);
    }
}

impl LiveSnapshot {
    fn apply(&mut self, state: &LiveState) {
        overwrite(&mut self.current_hearts, state.current_hearts);
        overwrite(&mut self.current_ammo, state.current_ammo);
        overwrite(&mut self.respawning, state.respawning);
        overwrite(&mut self.reloading, state.reloading);
        overwrite(&mut self.game_time_remaining_s, state.game_time_remaining_s.map(Some));
    }
}

/// Replaces `slot` only when the message carried a value.
fn overwrite<T>(slot: &mut T, incoming: Option<T>) {
    if let Some(value) = incoming {
        *slot = value;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{
        AckMessage, HeartbeatAckMessage, HitReportMessage, ReloadEventMessage, RespawnMessage,
    };

    fn full_status(uptime_ms: u64, shots: u32, hearts: u8) -> StatusMessage {
        StatusMessage {
            uptime_ms: Some(uptime_ms),
            config: Some(ConfigEcho {
                device_id: Some(1),
                player_id: Some(7),
                team_id: Some(2),
                hearts_enabled: Some(true),
                max_hearts: Some(5),
                ammo_enabled: Some(true),
                max_ammo: Some(30),
                ..Default::default()
            }),
            stats: Some(DeviceStats {
                shots_fired: Some(shots),
                enemy_kills: Some(1),
                friendly_kills: Some(0),
                deaths: Some(2),
                hits_received: Some(3),
                ..Default::default()
            }),
            state: Some(LiveState {
                current_hearts: Some(hearts),
                current_ammo: Some(12),
                respawning: Some(false),
                reloading: Some(false),
                game_time_remaining_s: Some(300),
                ..Default::default()
            }),
            rssi: Some(-60),
            battery_v: Some(3.9),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_state_has_documented_defaults() {
        let state = DeviceState::new("w1", "192.168.1.50");
        assert_eq!(state.connection_state(), ConnectionState::Disconnected);
        assert!(!state.config.hearts_enabled);
        assert!(!state.config.ammo_enabled);
        assert_eq!(state.stats, StatsSnapshot::default());
        assert!(state.connection.last_error.is_none());
    }

    #[test]
    fn test_connected_sets_timestamp_and_clears_error() {
        // Arrange
        let state = DeviceState::new("w1", "a")
            .with_connection_state(ConnectionState::Error, 10)
            .with_error("heartbeat timeout");

        // Act
        let next = state.with_connection_state(ConnectionState::Connected, 20);

        // Assert
        assert_eq!(next.connection.last_connected_ms, Some(20));
        assert!(next.connection.last_error.is_none());
        assert_eq!(state.connection.last_error.as_deref(), Some("heartbeat timeout"));
    }

    #[test]
    fn test_connection_events_leave_game_blocks_untouched() {
        let state = DeviceState::new("w1", "a")
            .with_message(&InboundMessage::Status(full_status(1, 4, 3)), 5)
            .unwrap();
        let next = state.with_connection_state(ConnectionState::Error, 6).with_error("closed");
        assert_eq!(next.stats, state.stats);
        assert_eq!(next.live, state.live);
        assert_eq!(next.config, state.config);
    }

    #[test]
    fn test_second_status_overwrites_stats_and_keeps_absent_identity() {
        // Arrange
        let first = full_status(1_000, 10, 4);
        let mut second = full_status(2_000, 11, 2);
        second.config = Some(ConfigEcho {
            team_id: Some(3),
            ..Default::default()
        });

        // Act
        let state = DeviceState::new("w1", "a")
            .with_message(&InboundMessage::Status(first), 100)
            .unwrap()
            .with_message(&InboundMessage::Status(second), 200)
            .unwrap();

        // Assert
        assert_eq!(state.stats.shots_fired, 11);
        assert_eq!(state.live.current_hearts, 2);
        assert_eq!(state.config.player_id, Some(7), "identity from first status preserved");
        assert_eq!(state.config.team_id, Some(3));
        assert_eq!(state.connection.last_status_ms, Some(200));
        assert_eq!(state.connection.uptime_ms, Some(2_000));
    }

    #[test]
    fn test_hit_report_then_partial_status_updates_hits_only() {
        let hit = InboundMessage::HitReport(HitReportMessage {
            seq_id: 7,
            shooter_id: 3,
            damage: 20,
            fatal: false,
            hearts_remaining: None,
            extra: Default::default(),
        });
        let status = InboundMessage::Status(StatusMessage {
            stats: Some(DeviceStats {
                hits_received: Some(1),
                ..Default::default()
            }),
            ..Default::default()
        });

        let state = DeviceState::new("t1", "a")
            .with_message(&hit, 1)
            .unwrap()
            .with_message(&status, 2)
            .unwrap();

        assert_eq!(state.stats.hits_received, 1);
        assert_eq!(state.stats.enemy_kills, 0);
        assert_eq!(state.stats.deaths, 0);
    }

    #[test]
    fn test_fatal_hit_marks_respawning_and_respawn_clears_it() {
        let hit = InboundMessage::HitReport(HitReportMessage {
            seq_id: 1,
            shooter_id: 2,
            damage: 100,
            fatal: true,
            hearts_remaining: None,
            extra: Default::default(),
        });
        let respawn = InboundMessage::Respawn(RespawnMessage {
            hearts: Some(5),
            ..Default::default()
        });

        let dead = DeviceState::new("t1", "a").with_message(&hit, 1).unwrap();
        assert!(dead.live.respawning);
        assert_eq!(dead.live.current_hearts, 0);

        let alive = dead.with_message(&respawn, 2).unwrap();
        assert!(!alive.live.respawning);
        assert_eq!(alive.live.current_hearts, 5);
    }

    #[test]
    fn test_reload_cycle_updates_flag_and_ammo() {
        let started = InboundMessage::ReloadEvent(ReloadEventMessage {
            phase: ReloadPhase::Started,
            ammo: None,
            extra: Default::default(),
        });
        let finished = InboundMessage::ReloadEvent(ReloadEventMessage {
            phase: ReloadPhase::Finished,
            ammo: Some(30),
            extra: Default::default(),
        });

        let reloading = DeviceState::new("w1", "a").with_message(&started, 1).unwrap();
        assert!(reloading.live.reloading);
        let done = reloading.with_message(&finished, 2).unwrap();
        assert!(!done.live.reloading);
        assert_eq!(done.live.current_ammo, 30);
    }

    #[test]
    fn test_heartbeat_ack_records_latency() {
        let ack = InboundMessage::HeartbeatAck(HeartbeatAckMessage {
            timestamp_ms: Some(1_000),
            uptime_ms: Some(42),
            ..Default::default()
        });
        let state = DeviceState::new("w1", "a").with_message(&ack, 1_035).unwrap();
        assert_eq!(state.connection.last_heartbeat_ms, Some(1_035));
        assert_eq!(state.connection.latency_ms, Some(35));
        assert_eq!(state.connection.uptime_ms, Some(42));
    }

    #[test]
    fn test_ack_produces_no_snapshot() {
        let ack = InboundMessage::Ack(AckMessage {
            success: true,
            message: None,
            extra: Default::default(),
        });
        assert!(DeviceState::new("w1", "a").with_message(&ack, 1).is_none());
    }

    #[test]
    fn test_range_warnings_use_previously_echoed_maximums() {
        // Arrange: maximums arrive first, live values later on their own.
        let configured = DeviceState::new("w1", "a")
            .with_message(&InboundMessage::Status(full_status(1, 0, 5)), 1)
            .unwrap();
        let state_only = StatusMessage {
            state: Some(LiveState {
                current_hearts: Some(9),
                current_ammo: Some(30),
                ..Default::default()
            }),
            ..Default::default()
        };

        // Act
        let next = configured
            .with_message(&InboundMessage::Status(state_only), 2)
            .unwrap();

        // Assert
        assert!(configured.range_warnings().is_empty());
        assert_eq!(
            next.range_warnings(),
            vec![RangeWarning::HeartsAboveMax { current: 9, max: 5 }]
        );
    }

    #[test]
    fn test_range_warnings_skip_disabled_counters() {
        let mut state = DeviceState::new("w1", "a");
        state.config.max_hearts = Some(3);
        state.config.hearts_enabled = false;
        state.live.current_hearts = 10;
        assert!(state.range_warnings().is_empty());
    }

    #[test]
    fn test_connection_state_display_is_snake_case() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Error.to_string(), "error");
    }
}
