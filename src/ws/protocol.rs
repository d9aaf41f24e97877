//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::checkpoint::ProgressReadout;
use crate::game::input::InputAction;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Key press or release
    Input { action: InputAction, pressed: bool },

    /// Return to the last valid checkpoint
    Respawn,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        connection_id: Uuid,
        server_time: u64,
        track: String,
        total_checkpoints: usize,
    },

    /// Race state snapshot (sent at regular intervals)
    Snapshot {
        /// Server frame number
        frame: u64,
        kart: KartSnapshot,
        /// Interpolated ghost position, if a ghost is loaded
        ghost: Option<[f32; 3]>,
        progress: ProgressReadout,
        /// Events that occurred since last snapshot
        events: Vec<RaceEvent>,
    },

    /// Error message
    Error { code: String, message: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Kart pose and motion in a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KartSnapshot {
    pub position: [f32; 3],
    /// Heading in radians, 0 faces +Z
    pub yaw: f32,
    /// Horizontal speed (m/s)
    pub speed: f32,
    /// Signed speed along the heading
    pub drive_speed: f32,
    pub steer_angle: f32,
    pub drifting: bool,
    pub drift_direction: f32,
    pub airborne: bool,
    /// Cosmetic body tilt (radians)
    pub lateral_tilt: f32,
    pub longitudinal_tilt: f32,
}

/// Race events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum RaceEvent {
    CheckpointPassed {
        index: usize,
    },

    LapCompleted {
        lap: u32,
        lap_ms: f64,
        best_lap_ms: Option<f64>,
    },

    /// Kart bounced off an obstacle
    Collision,

    Respawned {
        position: [f32; 3],
        yaw: f32,
    },

    /// A new ghost recording took over playback
    GhostLoaded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_messages_use_snake_case_tags() {
        let msg: ClientMsg =
            serde_json::from_str(r#"{"type":"input","action":"turn_left","pressed":true}"#)
                .unwrap();
        assert!(matches!(
            msg,
            ClientMsg::Input {
                action: InputAction::TurnLeft,
                pressed: true
            }
        ));

        let msg: ClientMsg = serde_json::from_str(r#"{"type":"respawn"}"#).unwrap();
        assert!(matches!(msg, ClientMsg::Respawn));

        let unknown = r#"{"type":"input","action":"drift","pressed":true}"#;
        assert!(serde_json::from_str::<ClientMsg>(unknown).is_err());
    }

    #[test]
    fn test_event_tagging() {
        let json = serde_json::to_value(RaceEvent::LapCompleted {
            lap: 2,
            lap_ms: 41_250.0,
            best_lap_ms: Some(40_000.0),
        })
        .unwrap();
        assert_eq!(json["event_type"], "lap_completed");
        assert_eq!(json["lap"], 2);
    }
}
