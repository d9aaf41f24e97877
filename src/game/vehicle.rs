//! Analytic bicycle-style vehicle model with drift
//!
//! `step` is a pure function of its inputs: identical state, controls,
//! parameters and Δt always produce bit-identical output. It only touches the
//! horizontal (XZ) plane; the vertical velocity component is carried through
//! untouched because gravity and jump impulses belong to the physics body.
//!
//! Conventions: Y is up, yaw 0 faces +Z, positive steer turns left (yaw grows).

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Below this horizontal speed the car snaps to rest
pub const SPEED_EPSILON: f32 = 0.01;
/// Guards the slip-angle denominator at low forward speed
pub const SLIP_EPSILON: f32 = 0.5;
/// Minimum speed for drift entry
pub const DRIFT_MIN_SPEED: f32 = 6.0;
/// Steering input magnitude required to pick a drift direction
pub const STEER_DEADZONE: f32 = 0.1;
/// Per-second decay of residual yaw rate with no steering
pub const YAW_RATE_DAMPING: f32 = 8.0;
/// Linear lateral damping added to the cornering force
pub const LATERAL_DAMPING: f32 = 1.5;

// Cosmetic body tilt spring
const TILT_STIFFNESS: f32 = 60.0;
const TILT_DAMPING: f32 = 9.0;
const LATERAL_TILT_GAIN: f32 = 0.012;
const LONGITUDINAL_TILT_GAIN: f32 = 0.008;
const MAX_TILT: f32 = 0.25;
const HEAD_TILT_GAIN: f32 = 0.15;
const HEAD_TILT_RESPONSE: f32 = 6.0;
const CENTER_OF_MASS_HEIGHT: f32 = 0.45;

/// Tunable vehicle parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleParams {
    /// Forward acceleration at full throttle (m/s²)
    pub accel: f32,
    /// Deceleration at full brake (m/s²); continues into reverse
    pub brake_force: f32,
    /// Horizontal speed cap (m/s)
    pub max_speed: f32,
    /// Quadratic aerodynamic drag coefficient
    pub drag: f32,
    /// Linear rolling resistance coefficient
    pub rolling_resistance: f32,
    /// Maximum front wheel angle (radians)
    pub max_steer_angle: f32,
    /// Steering attenuation per m/s of speed
    pub steer_speed_falloff: f32,
    /// Smoothing rate for steer angle and drift yaw (1/s)
    pub steer_speed: f32,
    /// Axle distance (m)
    pub wheelbase: f32,
    /// Cornering stiffness
    pub grip: f32,
    /// Grip multiplier while drifting
    pub drift_grip_scale: f32,
    /// Extra heading offset held while drifting (radians)
    pub max_drift_yaw: f32,
    /// Surface friction multiplier
    pub surface_friction: f32,
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            accel: 18.0,
            brake_force: 24.0,
            max_speed: 32.0,
            drag: 0.012,
            rolling_resistance: 0.35,
            max_steer_angle: 0.6,
            steer_speed_falloff: 0.04,
            steer_speed: 8.0,
            wheelbase: 1.6,
            grip: 40.0,
            drift_grip_scale: 0.35,
            max_drift_yaw: 0.45,
            surface_friction: 1.0,
        }
    }
}

/// Normalised driver controls for one step
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VehicleControls {
    /// 0..=1
    pub throttle: f32,
    /// 0..=1
    pub brake: f32,
    /// -1..=1, positive turns left
    pub steer: f32,
    pub drift: bool,
}

impl VehicleControls {
    pub fn clamped(self) -> Self {
        Self {
            throttle: self.throttle.clamp(0.0, 1.0),
            brake: self.brake.clamp(0.0, 1.0),
            steer: self.steer.clamp(-1.0, 1.0),
            drift: self.drift,
        }
    }
}

/// Full kinematic state of the car
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f32,
    /// Also drives wheel spin in presentation
    pub yaw_rate: f32,
    pub steer_angle: f32,
    pub steer_target: f32,
    /// Signed speed along the heading
    pub drive_speed: f32,
    pub drifting: bool,
    /// -1, 0 or 1
    pub drift_direction: f32,
    pub drift_yaw: f32,
    pub lateral_tilt: f32,
    pub lateral_tilt_velocity: f32,
    pub longitudinal_tilt: f32,
    pub longitudinal_tilt_velocity: f32,
    pub head_tilt: f32,
    pub center_of_mass: Vec3,
    pub support_point: Vec3,
}

impl VehicleState {
    pub fn at_rest(position: Vec3, yaw: f32) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            yaw,
            yaw_rate: 0.0,
            steer_angle: 0.0,
            steer_target: 0.0,
            drive_speed: 0.0,
            drifting: false,
            drift_direction: 0.0,
            drift_yaw: 0.0,
            lateral_tilt: 0.0,
            lateral_tilt_velocity: 0.0,
            longitudinal_tilt: 0.0,
            longitudinal_tilt_velocity: 0.0,
            head_tilt: 0.0,
            center_of_mass: Vec3::new(0.0, CENTER_OF_MASS_HEIGHT, 0.0),
            support_point: Vec3::ZERO,
        }
    }

    pub fn forward(&self) -> Vec3 {
        forward_vector(self.yaw)
    }

    pub fn horizontal_speed(&self) -> f32 {
        Vec3::new(self.velocity.x, 0.0, self.velocity.z).length()
    }
}

impl Default for VehicleState {
    fn default() -> Self {
        Self::at_rest(Vec3::ZERO, 0.0)
    }
}

pub fn forward_vector(yaw: f32) -> Vec3 {
    Vec3::new(yaw.sin(), 0.0, yaw.cos())
}

/// Unit vector to the car's right for a given heading
pub fn right_vector(yaw: f32) -> Vec3 {
    Vec3::new(-yaw.cos(), 0.0, yaw.sin())
}

/// Advance the vehicle by one fixed step
pub fn step(
    prev: &VehicleState,
    controls: VehicleControls,
    params: &VehicleParams,
    dt: f32,
) -> VehicleState {
    let controls = controls.clamped();
    let mut next = *prev;
    let blend = (params.steer_speed * dt).min(1.0);
    let speed = prev.horizontal_speed();

    // Speed-attenuated steering
    next.steer_target =
        controls.steer * params.max_steer_angle / (1.0 + params.steer_speed_falloff * speed);
    next.steer_angle += (next.steer_target - next.steer_angle) * blend;

    // Drift entry needs speed and a steering direction; release exits at once
    if controls.drift {
        if !prev.drifting && speed > DRIFT_MIN_SPEED && controls.steer.abs() > STEER_DEADZONE {
            next.drifting = true;
            next.drift_direction = controls.steer.signum();
        }
    } else {
        next.drifting = false;
        next.drift_direction = 0.0;
    }

    let drift_goal = if next.drifting {
        next.drift_direction * params.max_drift_yaw
    } else {
        0.0
    };
    next.drift_yaw += (drift_goal - next.drift_yaw) * blend;

    // Bicycle-model yaw rate from the signed forward speed
    let forward = forward_vector(prev.yaw);
    let forward_speed = prev.velocity.dot(forward);
    let effective_steer = next.steer_angle + next.drift_yaw;
    if controls.steer.abs() <= STEER_DEADZONE && !next.drifting {
        next.yaw_rate = prev.yaw_rate * (1.0 - (YAW_RATE_DAMPING * dt).min(1.0));
    } else {
        next.yaw_rate = (forward_speed / params.wheelbase) * effective_steer.sin();
    }
    next.yaw = prev.yaw + next.yaw_rate * dt;

    // Local frame after the heading update
    let forward = forward_vector(next.yaw);
    let right = right_vector(next.yaw);
    let v_forward = prev.velocity.dot(forward);
    let v_lateral = prev.velocity.dot(right);
    let slip_angle = v_lateral.atan2(v_forward.abs() + SLIP_EPSILON);

    // Saturating cornering force
    let drift_scale = if next.drifting {
        params.drift_grip_scale
    } else {
        1.0
    };
    let grip_base = params.grip * drift_scale * params.surface_friction;
    let lateral_force = -grip_base * slip_angle / (1.0 + 2.0 * slip_angle.abs());

    let longitudinal_force = controls.throttle * params.accel
        - controls.brake * params.brake_force
        - params.drag * v_forward * v_forward.abs()
        - params.rolling_resistance * v_forward;

    let lateral_accel = lateral_force - LATERAL_DAMPING * v_lateral;
    let accel = forward * longitudinal_force + right * lateral_accel;

    let mut horizontal = Vec3::new(prev.velocity.x, 0.0, prev.velocity.z) + accel * dt;
    let horizontal_speed = horizontal.length();
    if horizontal_speed > params.max_speed {
        horizontal *= params.max_speed / horizontal_speed;
    } else if horizontal_speed < SPEED_EPSILON {
        horizontal = Vec3::ZERO;
    }

    next.velocity = Vec3::new(horizontal.x, prev.velocity.y, horizontal.z);
    next.drive_speed = horizontal.dot(forward);
    next.position = prev.position + next.velocity * dt;

    update_body_tilt(&mut next, lateral_accel, longitudinal_force, dt);

    next
}

/// Cosmetic suspension response; never feeds back into motion
fn update_body_tilt(
    state: &mut VehicleState,
    lateral_accel: f32,
    longitudinal_accel: f32,
    dt: f32,
) {
    let lateral_target = (-lateral_accel * LATERAL_TILT_GAIN).clamp(-MAX_TILT, MAX_TILT);
    let longitudinal_target =
        (-longitudinal_accel * LONGITUDINAL_TILT_GAIN).clamp(-MAX_TILT, MAX_TILT);

    let (tilt, velocity) = spring(
        state.lateral_tilt,
        state.lateral_tilt_velocity,
        lateral_target,
        dt,
    );
    state.lateral_tilt = tilt;
    state.lateral_tilt_velocity = velocity;

    let (tilt, velocity) = spring(
        state.longitudinal_tilt,
        state.longitudinal_tilt_velocity,
        longitudinal_target,
        dt,
    );
    state.longitudinal_tilt = tilt;
    state.longitudinal_tilt_velocity = velocity;

    let head_target = state.yaw_rate * HEAD_TILT_GAIN;
    state.head_tilt += (head_target - state.head_tilt) * (HEAD_TILT_RESPONSE * dt).min(1.0);

    state.center_of_mass = Vec3::new(
        state.lateral_tilt.sin() * CENTER_OF_MASS_HEIGHT,
        state.lateral_tilt.cos() * state.longitudinal_tilt.cos() * CENTER_OF_MASS_HEIGHT,
        state.longitudinal_tilt.sin() * CENTER_OF_MASS_HEIGHT,
    );
    state.support_point = Vec3::new(state.center_of_mass.x, 0.0, state.center_of_mass.z);
}

fn spring(value: f32, velocity: f32, target: f32, dt: f32) -> (f32, f32) {
    let accel = TILT_STIFFNESS * (target - value) - TILT_DAMPING * velocity;
    let velocity = velocity + accel * dt;
    (value + velocity * dt, velocity)
}
