//! Physics-body collaborator seam
//!
//! The simulation core only talks to rigid bodies through [`PhysicsBackend`]:
//! pose and velocity accessors, a ground-contact query and a pairwise contact
//! test. [`Physics`] wraps an optional backend so the first frames, before the
//! engine is up, read zeros and ignore writes.
//!
//! [`FlatWorld`] is the kinematic backend the headless server runs on: boxes
//! on flat ground with gravity, no rotation in collision and no broad phase.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Typed handle to a body owned by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BodyId(pub u32);

pub trait PhysicsBackend {
    fn position(&self, body: BodyId) -> Vec3;
    fn set_position(&mut self, body: BodyId, position: Vec3);
    fn linear_velocity(&self, body: BodyId) -> Vec3;
    fn set_linear_velocity(&mut self, body: BodyId, velocity: Vec3);
    fn yaw(&self, body: BodyId) -> f32;
    fn set_yaw(&mut self, body: BodyId, yaw: f32);
    fn set_roll(&mut self, body: BodyId, roll: f32);
    fn is_grounded(&self, body: BodyId) -> bool;
    fn in_contact(&self, a: BodyId, b: BodyId) -> bool;
    /// Integrate the world by `dt` seconds
    fn step(&mut self, dt: f32);
}

/// Backend slot that may still be empty
#[derive(Debug)]
pub struct Physics<B> {
    backend: Option<B>,
}

impl<B: PhysicsBackend> Physics<B> {
    pub fn uninitialized() -> Self {
        Self { backend: None }
    }

    pub fn new(backend: B) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    pub fn attach(&mut self, backend: B) {
        self.backend = Some(backend);
    }

    pub fn is_ready(&self) -> bool {
        self.backend.is_some()
    }

    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> Option<&mut B> {
        self.backend.as_mut()
    }

    pub fn position(&self, body: BodyId) -> Vec3 {
        self.backend
            .as_ref()
            .map(|b| b.position(body))
            .unwrap_or(Vec3::ZERO)
    }

    pub fn set_position(&mut self, body: BodyId, position: Vec3) {
        if let Some(b) = self.backend.as_mut() {
            b.set_position(body, position);
        }
    }

    pub fn linear_velocity(&self, body: BodyId) -> Vec3 {
        self.backend
            .as_ref()
            .map(|b| b.linear_velocity(body))
            .unwrap_or(Vec3::ZERO)
    }

    pub fn set_linear_velocity(&mut self, body: BodyId, velocity: Vec3) {
        if let Some(b) = self.backend.as_mut() {
            b.set_linear_velocity(body, velocity);
        }
    }

    pub fn yaw(&self, body: BodyId) -> f32 {
        self.backend.as_ref().map(|b| b.yaw(body)).unwrap_or(0.0)
    }

    pub fn set_yaw(&mut self, body: BodyId, yaw: f32) {
        if let Some(b) = self.backend.as_mut() {
            b.set_yaw(body, yaw);
        }
    }

    pub fn set_roll(&mut self, body: BodyId, roll: f32) {
        if let Some(b) = self.backend.as_mut() {
            b.set_roll(body, roll);
        }
    }

    pub fn is_grounded(&self, body: BodyId) -> bool {
        self.backend
            .as_ref()
            .map(|b| b.is_grounded(body))
            .unwrap_or(false)
    }

    pub fn in_contact(&self, a: BodyId, b: BodyId) -> bool {
        self.backend
            .as_ref()
            .map(|backend| backend.in_contact(a, b))
            .unwrap_or(false)
    }

    pub fn step(&mut self, dt: f32) {
        if let Some(b) = self.backend.as_mut() {
            b.step(dt);
        }
    }
}

impl<B: PhysicsBackend> Default for Physics<B> {
    fn default() -> Self {
        Self::uninitialized()
    }
}

/// What a scene object is, for gameplay purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectKind {
    Ground,
    Obstacle { sensor: bool },
    Player,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub body: BodyId,
    pub kind: ObjectKind,
    pub name: String,
}

/// Arena of gameplay objects keyed by body handle
#[derive(Debug, Clone, Default)]
pub struct Scene {
    objects: Vec<SceneObject>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, body: BodyId, kind: ObjectKind, name: impl Into<String>) {
        self.objects.push(SceneObject {
            body,
            kind,
            name: name.into(),
        });
    }

    pub fn player(&self) -> Option<BodyId> {
        self.objects
            .iter()
            .find(|o| o.kind == ObjectKind::Player)
            .map(|o| o.body)
    }

    /// Obstacles that physically block the car
    pub fn solid_obstacles(&self) -> impl Iterator<Item = &SceneObject> {
        self.objects
            .iter()
            .filter(|o| matches!(o.kind, ObjectKind::Obstacle { sensor: false }))
    }

    pub fn get(&self, body: BodyId) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.body == body)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Standard gravity (m/s²)
pub const GRAVITY: f32 = 9.81;
/// Gap below which a body counts as resting on a ground surface
pub const GROUND_TOLERANCE: f32 = 0.05;
/// Skin added to boxes for contact queries so resting contact still reports
pub const CONTACT_SKIN: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyRole {
    Dynamic,
    Ground,
    Solid,
    Sensor,
}

#[derive(Debug, Clone)]
struct FlatBody {
    role: BodyRole,
    position: Vec3,
    half_extents: Vec3,
    velocity: Vec3,
    yaw: f32,
    roll: f32,
}

impl FlatBody {
    fn min(&self) -> Vec3 {
        self.position - self.half_extents
    }

    fn max(&self) -> Vec3 {
        self.position + self.half_extents
    }

    fn overlaps_horizontally(&self, other: &FlatBody) -> bool {
        (self.position.x - other.position.x).abs() < self.half_extents.x + other.half_extents.x
            && (self.position.z - other.position.z).abs()
                < self.half_extents.z + other.half_extents.z
    }
}

/// Axis-aligned box world with gravity
#[derive(Debug, Clone)]
pub struct FlatWorld {
    bodies: Vec<FlatBody>,
    gravity: f32,
}

impl FlatWorld {
    pub fn new() -> Self {
        Self {
            bodies: Vec::new(),
            gravity: GRAVITY,
        }
    }

    fn push(&mut self, role: BodyRole, position: Vec3, half_extents: Vec3) -> BodyId {
        let id = BodyId(self.bodies.len() as u32);
        self.bodies.push(FlatBody {
            role,
            position,
            half_extents,
            velocity: Vec3::ZERO,
            yaw: 0.0,
            roll: 0.0,
        });
        id
    }

    /// Ground slab whose top surface sits at `height`
    pub fn add_ground(&mut self, height: f32, half_size: f32) -> BodyId {
        self.push(
            BodyRole::Ground,
            Vec3::new(0.0, height - 0.5, 0.0),
            Vec3::new(half_size, 0.5, half_size),
        )
    }

    pub fn add_solid(&mut self, position: Vec3, half_extents: Vec3) -> BodyId {
        self.push(BodyRole::Solid, position, half_extents)
    }

    pub fn add_sensor(&mut self, position: Vec3, half_extents: Vec3) -> BodyId {
        self.push(BodyRole::Sensor, position, half_extents)
    }

    pub fn add_dynamic(&mut self, position: Vec3, half_extents: Vec3) -> BodyId {
        self.push(BodyRole::Dynamic, position, half_extents)
    }

    fn body(&self, id: BodyId) -> Option<&FlatBody> {
        self.bodies.get(id.0 as usize)
    }

    fn body_mut(&mut self, id: BodyId) -> Option<&mut FlatBody> {
        self.bodies.get_mut(id.0 as usize)
    }

    /// Highest ground top under the body, if any
    fn ground_top_under(&self, body: &FlatBody) -> Option<f32> {
        self.bodies
            .iter()
            .filter(|g| g.role == BodyRole::Ground && g.overlaps_horizontally(body))
            .map(|g| g.max().y)
            .reduce(f32::max)
    }

    fn resolve(&mut self, index: usize) {
        let mut body = self.bodies[index].clone();

        if let Some(top) = self.ground_top_under(&body) {
            let bottom = body.min().y;
            if bottom < top && bottom > top - body.half_extents.y * 2.0 {
                body.position.y = top + body.half_extents.y;
                if body.velocity.y < 0.0 {
                    body.velocity.y = 0.0;
                }
            }
        }

        for solid in self.bodies.iter().filter(|s| s.role == BodyRole::Solid) {
            let (b_min, b_max) = (body.min(), body.max());
            let (s_min, s_max) = (solid.min(), solid.max());
            let overlap_x = b_max.x.min(s_max.x) - b_min.x.max(s_min.x);
            let overlap_y = b_max.y.min(s_max.y) - b_min.y.max(s_min.y);
            let overlap_z = b_max.z.min(s_max.z) - b_min.z.max(s_min.z);
            if overlap_x <= 0.0 || overlap_y <= 0.0 || overlap_z <= 0.0 {
                continue;
            }
            // Push out along the shallower horizontal axis
            if overlap_x < overlap_z {
                let dir = (body.position.x - solid.position.x).signum();
                body.position.x += dir * overlap_x;
            } else {
                let dir = (body.position.z - solid.position.z).signum();
                body.position.z += dir * overlap_z;
            }
        }

        self.bodies[index] = body;
    }
}

impl Default for FlatWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicsBackend for FlatWorld {
    fn position(&self, body: BodyId) -> Vec3 {
        self.body(body).map(|b| b.position).unwrap_or(Vec3::ZERO)
    }

    fn set_position(&mut self, body: BodyId, position: Vec3) {
        if let Some(b) = self.body_mut(body) {
            b.position = position;
        }
    }

    fn linear_velocity(&self, body: BodyId) -> Vec3 {
        self.body(body).map(|b| b.velocity).unwrap_or(Vec3::ZERO)
    }

    fn set_linear_velocity(&mut self, body: BodyId, velocity: Vec3) {
        if let Some(b) = self.body_mut(body) {
            b.velocity = velocity;
        }
    }

    fn yaw(&self, body: BodyId) -> f32 {
        self.body(body).map(|b| b.yaw).unwrap_or(0.0)
    }

    fn set_yaw(&mut self, body: BodyId, yaw: f32) {
        if let Some(b) = self.body_mut(body) {
            b.yaw = yaw;
        }
    }

    fn set_roll(&mut self, body: BodyId, roll: f32) {
        if let Some(b) = self.body_mut(body) {
            b.roll = roll;
        }
    }

    fn is_grounded(&self, body: BodyId) -> bool {
        let Some(b) = self.body(body) else {
            return false;
        };
        self.ground_top_under(b)
            .map(|top| (b.min().y - top).abs() <= GROUND_TOLERANCE)
            .unwrap_or(false)
    }

    fn in_contact(&self, a: BodyId, b: BodyId) -> bool {
        let (Some(a), Some(b)) = (self.body(a), self.body(b)) else {
            return false;
        };
        let skin = Vec3::splat(CONTACT_SKIN);
        let (a_min, a_max) = (a.min() - skin, a.max() + skin);
        let (b_min, b_max) = (b.min(), b.max());
        a_min.cmple(b_max).all() && b_min.cmple(a_max).all()
    }

    fn step(&mut self, dt: f32) {
        for index in 0..self.bodies.len() {
            if self.bodies[index].role != BodyRole::Dynamic {
                continue;
            }
            let grounded = self.is_grounded(BodyId(index as u32));
            let body = &mut self.bodies[index];
            if !(grounded && body.velocity.y <= 0.0) {
                body.velocity.y -= self.gravity * dt;
            }
            body.position += body.velocity * dt;
            self.resolve(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CAR_HALF: Vec3 = Vec3::new(0.6, 0.4, 1.0);

    fn world_with_car() -> (FlatWorld, BodyId) {
        let mut world = FlatWorld::new();
        world.add_ground(0.0, 500.0);
        let car = world.add_dynamic(Vec3::new(0.0, 0.4, 0.0), CAR_HALF);
        (world, car)
    }

    #[test]
    fn test_uninitialized_physics_returns_defaults() {
        let mut physics: Physics<FlatWorld> = Physics::uninitialized();
        let body = BodyId(0);

        physics.set_position(body, Vec3::ONE);
        physics.set_linear_velocity(body, Vec3::ONE);
        physics.step(0.1);

        assert!(!physics.is_ready());
        assert_eq!(physics.position(body), Vec3::ZERO);
        assert_eq!(physics.linear_velocity(body), Vec3::ZERO);
        assert_eq!(physics.yaw(body), 0.0);
        assert!(!physics.is_grounded(body));
        assert!(!physics.in_contact(body, BodyId(1)));
    }

    #[test]
    fn test_car_rests_on_ground() {
        let (mut world, car) = world_with_car();
        for _ in 0..120 {
            world.step(1.0 / 120.0);
        }
        assert!(world.is_grounded(car));
        assert!((world.position(car).y - 0.4).abs() < 1e-4);
    }

    #[test]
    fn test_jump_leaves_ground_and_lands() {
        let (mut world, car) = world_with_car();
        world.set_linear_velocity(car, Vec3::new(0.0, 5.0, 0.0));

        world.step(1.0 / 60.0);
        assert!(!world.is_grounded(car));

        for _ in 0..240 {
            world.step(1.0 / 60.0);
        }
        assert!(world.is_grounded(car));
    }

    #[test]
    fn test_solid_blocks_and_reports_contact() {
        let (mut world, car) = world_with_car();
        let wall = world.add_solid(Vec3::new(0.0, 1.0, 3.0), Vec3::new(5.0, 1.0, 0.5));
        world.set_linear_velocity(car, Vec3::new(0.0, 0.0, 10.0));

        for _ in 0..60 {
            world.step(1.0 / 60.0);
        }

        assert!(world.in_contact(car, wall));
        assert!(world.position(car).z <= 3.0 - 0.5 - 1.0 + 1e-3);
    }

    #[test]
    fn test_scene_lists_only_solid_obstacles() {
        let mut scene = Scene::new();
        scene.add(BodyId(0), ObjectKind::Ground, "ground");
        scene.add(BodyId(1), ObjectKind::Player, "kart");
        scene.add(BodyId(2), ObjectKind::Obstacle { sensor: false }, "barrel");
        scene.add(BodyId(3), ObjectKind::Obstacle { sensor: true }, "boost-pad");

        assert_eq!(scene.player(), Some(BodyId(1)));
        let solids: Vec<BodyId> = scene.solid_obstacles().map(|o| o.body).collect();
        assert_eq!(solids, vec![BodyId(2)]);
    }
}
