//! Race session context
//!
//! One `RaceSession` owns every piece of per-racer state: the input log, the
//! movement loop, the physics world, checkpoint progress, the lap timer and
//! the ghost. The driver calls [`RaceSession::frame`] once per render tick and
//! forwards player commands through the narrow methods below.

use glam::Vec3;
use tracing::{debug, info};

use crate::util::time::LapTimer;

use super::body::{BodyId, FlatWorld, Physics};
use super::checkpoint::{CheckpointCourse, CheckpointEvent, ProgressReadout};
use super::ghost::{Ghost, GhostRecording, PlaybackCommand};
use super::input::{InputAction, InputQueue};
use super::movement::{MovementConfig, MovementLoop};
use super::track::Track;
use super::vehicle::VehicleState;

/// Everything that happened during one frame
#[derive(Debug, Clone, Default)]
pub struct FrameOutcome {
    pub substeps: u32,
    pub collisions: u32,
    pub checkpoints: Vec<CheckpointEvent>,
    /// Recording frozen by a lap completed this frame
    pub completed_lap: Option<GhostRecording>,
    pub ghost_position: Option<Vec3>,
}

pub struct RaceSession {
    inputs: InputQueue,
    movement: MovementLoop,
    physics: Physics<FlatWorld>,
    player: BodyId,
    obstacles: Vec<BodyId>,
    course: CheckpointCourse,
    timer: LapTimer,
    ghost: Ghost,
}

fn epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl RaceSession {
    pub fn new(
        track: &Track,
        movement: MovementConfig,
        input_log_capacity: usize,
        now_ms: f64,
    ) -> Self {
        let built = track.build_world();
        let obstacles = built.scene.solid_obstacles().map(|o| o.body).collect();

        let mut inputs = InputQueue::new(input_log_capacity);
        inputs.set_session_start(now_ms);

        let mut ghost = Ghost::new();
        ghost.restart_recording(now_ms, epoch_millis());

        let mut physics = Physics::new(built.world);
        physics.set_yaw(built.player, track.spawn.yaw);
        physics.set_roll(built.player, track.spawn.roll);

        info!(
            track = %track.name,
            checkpoints = track.checkpoints.len(),
            "Race session created"
        );

        Self {
            inputs,
            movement: MovementLoop::new(movement, track.vehicle, track.spawn),
            physics,
            player: built.player,
            obstacles,
            course: track.course(),
            timer: LapTimer::new(),
            ghost,
        }
    }

    /// Log a press/release from the player
    pub fn handle_input(&mut self, action: InputAction, pressed: bool, now_ms: f64) {
        self.inputs.add_input(action, pressed, now_ms);
        self.ghost
            .recorder_mut()
            .record_input(now_ms, action, pressed);
    }

    /// Advance the session by one render frame
    pub fn frame(&mut self, frame_dt_ms: f64, now_ms: f64) -> FrameOutcome {
        let report = self.movement.tick(
            frame_dt_ms,
            &self.inputs,
            &mut self.physics,
            self.player,
            &self.obstacles,
        );

        let session_start = self.inputs.session_start_ms();
        for sample in &report.samples {
            self.ghost
                .recorder_mut()
                .record_position(session_start + sample.game_time_ms, sample.position);
        }

        let position = self.physics.position(self.player);
        let checkpoints = self.course.update(position, now_ms, &mut self.timer);

        let mut completed_lap = None;
        if checkpoints
            .iter()
            .any(|e| matches!(e, CheckpointEvent::LapCompleted { .. }))
        {
            completed_lap = self.ghost.complete_lap(now_ms, epoch_millis());
        }

        FrameOutcome {
            substeps: report.substeps,
            collisions: report.collisions,
            checkpoints,
            completed_lap,
            ghost_position: self.ghost.sample(now_ms),
        }
    }

    /// Put the kart back on the last valid checkpoint. Keys still held stay
    /// held; the replay log and the recording start over.
    pub fn respawn(&mut self, now_ms: f64) {
        let transform = self.course.respawn();

        self.inputs.reset_preserving_held(now_ms);
        self.movement.reset(transform);

        self.physics.set_position(self.player, transform.position);
        self.physics.set_linear_velocity(self.player, Vec3::ZERO);
        self.physics.set_yaw(self.player, transform.yaw);
        self.physics.set_roll(self.player, transform.roll);

        self.ghost.restart_recording(now_ms, epoch_millis());

        debug!(
            x = transform.position.x,
            y = transform.position.y,
            z = transform.position.z,
            "Respawned"
        );
    }

    /// Replace the ghost from uploaded JSON; malformed input leaves it unchanged
    pub fn import_ghost(&mut self, body: &[u8], now_ms: f64) -> bool {
        match std::str::from_utf8(body) {
            Ok(json) => self.ghost.import(json, now_ms),
            Err(e) => {
                debug!(error = %e, "Discarding ghost import that is not UTF-8");
                false
            }
        }
    }

    pub fn load_ghost(&mut self, recording: GhostRecording, now_ms: f64) {
        self.ghost.load(recording, now_ms);
    }

    pub fn export_ghost(&self) -> Option<String> {
        self.ghost.export()
    }

    pub fn control_playback(&mut self, command: PlaybackCommand, now_ms: f64) {
        self.ghost.control(command, now_ms);
    }

    /// Clock time that game time zero maps to
    pub fn session_start_ms(&self) -> f64 {
        self.inputs.session_start_ms()
    }

    pub fn readout(&self) -> ProgressReadout {
        self.course.readout(&self.timer)
    }

    pub fn vehicle(&self) -> &VehicleState {
        self.movement.vehicle()
    }

    pub fn drive_speed(&self) -> f32 {
        self.movement.drive_speed()
    }

    pub fn is_airborne(&self) -> bool {
        self.movement.is_airborne()
    }
}
