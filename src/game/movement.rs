//! Fixed-timestep movement loop
//!
//! Real frame time is banked in an accumulator and spent in constant
//! substeps. Each substep reads the physics body, runs the vehicle model and
//! writes yaw and horizontal velocity back before the body integrates.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::body::{BodyId, Physics, PhysicsBackend};
use super::checkpoint::RespawnTransform;
use super::input::{ActionSet, InputAction, InputQueue};
use super::vehicle::{self, forward_vector, VehicleControls, VehicleParams, VehicleState};

/// Loop tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementConfig {
    pub fixed_step_ms: f64,
    /// Substeps allowed per render tick; the rest carries over
    pub max_substeps: u32,
    /// Vertical speed set on a jump (m/s)
    pub jump_impulse: f32,
    /// Fraction of speed kept when bouncing off an obstacle
    pub collision_restitution: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            fixed_step_ms: 1000.0 / 120.0,
            max_substeps: 5,
            jump_impulse: 5.5,
            collision_restitution: 0.5,
        }
    }
}

/// Position after one substep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubstepSample {
    /// Session-relative game time in milliseconds
    pub game_time_ms: f64,
    pub position: Vec3,
}

/// What one render tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub substeps: u32,
    pub samples: Vec<SubstepSample>,
    pub collisions: u32,
    pub jumps: u32,
}

/// Map held actions to vehicle controls. Jump doubles as the drift button.
pub fn controls_from(held: ActionSet) -> VehicleControls {
    let axis = |positive: InputAction, negative: InputAction| {
        let mut value = 0.0;
        if held.contains(positive) {
            value += 1.0;
        }
        if held.contains(negative) {
            value -= 1.0;
        }
        value
    };

    VehicleControls {
        throttle: if held.contains(InputAction::Forward) { 1.0 } else { 0.0 },
        brake: if held.contains(InputAction::Backward) { 1.0 } else { 0.0 },
        steer: axis(InputAction::TurnLeft, InputAction::TurnRight),
        drift: held.contains(InputAction::Jump),
    }
}

/// Owner of the car's kinematic state
#[derive(Debug, Clone)]
pub struct MovementLoop {
    config: MovementConfig,
    params: VehicleParams,
    accumulator_ms: f64,
    game_time_ms: f64,
    vehicle: VehicleState,
    drive_speed: f32,
    airborne: bool,
    jump_held: bool,
    touching: Vec<BodyId>,
}

impl MovementLoop {
    pub fn new(config: MovementConfig, params: VehicleParams, spawn: RespawnTransform) -> Self {
        Self {
            config,
            params,
            accumulator_ms: 0.0,
            game_time_ms: 0.0,
            vehicle: VehicleState::at_rest(spawn.position, spawn.yaw),
            drive_speed: 0.0,
            airborne: false,
            jump_held: false,
            touching: Vec::new(),
        }
    }

    /// Consume one render frame's worth of time
    pub fn tick<B: PhysicsBackend>(
        &mut self,
        frame_dt_ms: f64,
        inputs: &InputQueue,
        physics: &mut Physics<B>,
        player: BodyId,
        obstacles: &[BodyId],
    ) -> TickReport {
        let mut report = TickReport::default();
        self.accumulator_ms += frame_dt_ms.max(0.0);

        while self.accumulator_ms >= self.config.fixed_step_ms
            && report.substeps < self.config.max_substeps
        {
            self.accumulator_ms -= self.config.fixed_step_ms;
            report.substeps += 1;
            let sample = self.substep(inputs, physics, player, obstacles, &mut report);
            report.samples.push(sample);
        }

        if self.accumulator_ms >= self.config.fixed_step_ms {
            debug!(
                backlog_ms = self.accumulator_ms,
                substeps = report.substeps,
                "Substep cap reached, carrying time over"
            );
        }

        report
    }

    fn substep<B: PhysicsBackend>(
        &mut self,
        inputs: &InputQueue,
        physics: &mut Physics<B>,
        player: BodyId,
        obstacles: &[BodyId],
        report: &mut TickReport,
    ) -> SubstepSample {
        self.game_time_ms += self.config.fixed_step_ms;
        let dt = (self.config.fixed_step_ms / 1000.0) as f32;

        // Live keys and the log replayed at this game time must agree
        let held = inputs
            .current_inputs()
            .union(inputs.active_inputs_at(self.game_time_ms));
        let controls = controls_from(held);
        let jump_down = held.contains(InputAction::Jump);
        let jump_requested = jump_down && !self.jump_held;
        self.jump_held = jump_down;

        let grounded = physics.is_grounded(player);
        let body_velocity = physics.linear_velocity(player);
        self.vehicle.position = physics.position(player);
        self.vehicle.velocity = body_velocity;

        if grounded {
            self.vehicle = vehicle::step(&self.vehicle, controls, &self.params, dt);
            self.drive_speed = self.vehicle.drive_speed;
        } else {
            // No traction in the air: keep the drive speed along the heading
            let carried = forward_vector(self.vehicle.yaw) * self.drive_speed;
            self.vehicle.velocity = Vec3::new(carried.x, body_velocity.y, carried.z);
        }

        let mut vertical = body_velocity.y;
        if grounded && jump_requested && !self.airborne {
            vertical = self.config.jump_impulse;
            self.airborne = true;
            report.jumps += 1;
            trace!(game_time_ms = self.game_time_ms, "Jump");
        } else {
            self.airborne = !grounded;
        }

        let touching: Vec<BodyId> = obstacles
            .iter()
            .copied()
            .filter(|obstacle| physics.in_contact(player, *obstacle))
            .collect();
        let new_contact = touching.iter().any(|o| !self.touching.contains(o));
        self.touching = touching;

        if new_contact {
            let keep = self.config.collision_restitution;
            self.drive_speed = -self.drive_speed * keep;
            self.vehicle.drive_speed = self.drive_speed;
            self.vehicle.velocity.x = -self.vehicle.velocity.x * keep;
            self.vehicle.velocity.z = -self.vehicle.velocity.z * keep;
            report.collisions += 1;
            debug!(drive_speed = self.drive_speed, "Obstacle hit");
        }

        // Vertical velocity stays with the body (gravity, impulses)
        physics.set_yaw(player, self.vehicle.yaw);
        physics.set_linear_velocity(
            player,
            Vec3::new(self.vehicle.velocity.x, vertical, self.vehicle.velocity.z),
        );
        physics.step(dt);

        let position = physics.position(player);
        self.vehicle.position = position;

        SubstepSample {
            game_time_ms: self.game_time_ms,
            position,
        }
    }

    /// Put the car at rest on `transform` and restart game time
    pub fn reset(&mut self, transform: RespawnTransform) {
        self.accumulator_ms = 0.0;
        self.game_time_ms = 0.0;
        self.vehicle = VehicleState::at_rest(transform.position, transform.yaw);
        self.drive_speed = 0.0;
        self.airborne = false;
        self.touching.clear();
    }

    pub fn vehicle(&self) -> &VehicleState {
        &self.vehicle
    }

    pub fn params(&self) -> &VehicleParams {
        &self.params
    }

    pub fn config(&self) -> &MovementConfig {
        &self.config
    }

    pub fn game_time_ms(&self) -> f64 {
        self.game_time_ms
    }

    pub fn accumulator_ms(&self) -> f64 {
        self.accumulator_ms
    }

    pub fn drive_speed(&self) -> f32 {
        self.drive_speed
    }

    pub fn is_airborne(&self) -> bool {
        self.airborne
    }
}
