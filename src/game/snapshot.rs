//! Snapshot throttling and building

use glam::Vec3;

use crate::ws::protocol::{KartSnapshot, RaceEvent, ServerMsg};

use super::session::RaceSession;

/// Builds snapshots for network transmission
pub struct SnapshotBuilder {
    /// Frames since last snapshot
    frames_since_snapshot: u32,
    /// Snapshot interval in frames
    snapshot_interval: u32,
}

impl SnapshotBuilder {
    pub fn new(snapshot_interval: u32) -> Self {
        Self {
            frames_since_snapshot: 0,
            snapshot_interval: snapshot_interval.max(1),
        }
    }

    /// Interval that turns a frame rate into roughly the wanted snapshot rate
    pub fn for_rates(frame_hz: u32, snapshot_hz: u32) -> Self {
        Self::new(frame_hz / snapshot_hz.max(1))
    }

    /// Check if it's time to send a snapshot
    pub fn should_send(&mut self) -> bool {
        self.frames_since_snapshot += 1;
        if self.frames_since_snapshot >= self.snapshot_interval {
            self.frames_since_snapshot = 0;
            true
        } else {
            false
        }
    }

    /// Force snapshot on next check (used for important events)
    pub fn force_next(&mut self) {
        self.frames_since_snapshot = self.snapshot_interval;
    }

    pub fn build(
        &self,
        frame: u64,
        session: &RaceSession,
        ghost: Option<Vec3>,
        events: Vec<RaceEvent>,
    ) -> ServerMsg {
        let vehicle = session.vehicle();
        let kart = KartSnapshot {
            position: vehicle.position.to_array(),
            yaw: vehicle.yaw,
            speed: vehicle.horizontal_speed(),
            drive_speed: session.drive_speed(),
            steer_angle: vehicle.steer_angle,
            drifting: vehicle.drifting,
            drift_direction: vehicle.drift_direction,
            airborne: session.is_airborne(),
            lateral_tilt: vehicle.lateral_tilt,
            longitudinal_tilt: vehicle.longitudinal_tilt,
        };

        ServerMsg::Snapshot {
            frame,
            kart,
            ghost: ghost.map(|g| g.to_array()),
            progress: session.readout(),
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::movement::MovementConfig;
    use crate::game::track::Track;

    #[test]
    fn test_should_send_every_interval() {
        let mut builder = SnapshotBuilder::for_rates(60, 20);
        let sent: Vec<bool> = (0..6).map(|_| builder.should_send()).collect();
        assert_eq!(sent, vec![false, false, true, false, false, true]);
    }

    #[test]
    fn test_force_next_sends_immediately() {
        let mut builder = SnapshotBuilder::new(10);
        assert!(!builder.should_send());
        builder.force_next();
        assert!(builder.should_send());
        assert!(!builder.should_send());
    }

    #[test]
    fn test_snapshot_rate_above_frame_rate_sends_every_frame() {
        let mut builder = SnapshotBuilder::for_rates(30, 60);
        assert!(builder.should_send());
        assert!(builder.should_send());
    }

    #[test]
    fn test_build_carries_kart_and_ghost() {
        let track = Track::oval();
        let session = RaceSession::new(&track, MovementConfig::default(), 64, 0.0);
        let builder = SnapshotBuilder::for_rates(60, 20);

        let msg = builder.build(4, &session, Some(Vec3::new(1.0, 2.0, 3.0)), Vec::new());
        match msg {
            ServerMsg::Snapshot {
                frame,
                kart,
                ghost,
                progress,
                events,
            } => {
                assert_eq!(frame, 4);
                assert_eq!(ghost, Some([1.0, 2.0, 3.0]));
                assert_eq!(kart.position, track.spawn.position.to_array());
                assert_eq!(progress.total_checkpoints, 7);
                assert!(events.is_empty());
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }
}
