//! Track layouts: checkpoint poses, obstacles and spawn

use std::f32::consts::TAU;
use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::body::{BodyId, FlatWorld, ObjectKind, Scene};
use super::checkpoint::{CheckpointCourse, CheckpointVolume, RespawnTransform};
use super::vehicle::VehicleParams;

/// Collision box of the kart
pub const KART_HALF_EXTENTS: Vec3 = Vec3::new(0.6, 0.4, 1.0);

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("failed to read track file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid track JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("track has no checkpoints")]
    NoCheckpoints,

    #[error("{which} checkpoint index {index} out of range (last is {last})")]
    IndexOutOfRange {
        which: &'static str,
        index: usize,
        last: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstacleDef {
    pub name: String,
    pub position: Vec3,
    pub half_extents: Vec3,
    /// Sensors report contact but do not block the kart
    #[serde(default)]
    pub sensor: bool,
}

fn default_ground_half_size() -> f32 {
    500.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    #[serde(default)]
    pub ground_height: f32,
    #[serde(default = "default_ground_half_size")]
    pub ground_half_size: f32,
    pub spawn: RespawnTransform,
    pub checkpoints: Vec<CheckpointVolume>,
    #[serde(default)]
    pub start_index: usize,
    #[serde(default)]
    pub end_index: usize,
    #[serde(default)]
    pub obstacles: Vec<ObstacleDef>,
    #[serde(default)]
    pub vehicle: VehicleParams,
}

/// Physics world and scene arena built from a track
#[derive(Debug)]
pub struct TrackWorld {
    pub world: FlatWorld,
    pub scene: Scene,
    pub player: BodyId,
}

impl Track {
    /// Built-in ellipse with eight gates, start/finish at the origin facing +Z
    pub fn oval() -> Self {
        const GATES: usize = 8;
        let (a, b) = (40.0_f32, 60.0_f32);

        let checkpoints = (0..GATES)
            .map(|i| {
                let theta = i as f32 * TAU / GATES as f32;
                let (sin, cos) = theta.sin_cos();
                CheckpointVolume {
                    position: Vec3::new(a * (cos - 1.0), 1.0, b * sin),
                    yaw: (-a * sin).atan2(b * cos),
                    roll: 0.0,
                    half_extents: Vec3::new(8.0, 2.0, 1.0),
                }
            })
            .collect();

        Self {
            name: "oval".to_string(),
            ground_height: 0.0,
            ground_half_size: default_ground_half_size(),
            spawn: RespawnTransform {
                position: Vec3::new(0.0, KART_HALF_EXTENTS.y, -4.0),
                yaw: 0.0,
                roll: 0.0,
            },
            checkpoints,
            start_index: 0,
            end_index: 0,
            obstacles: vec![
                ObstacleDef {
                    name: "infield-barrier".to_string(),
                    position: Vec3::new(-a, 1.0, 0.0),
                    half_extents: Vec3::new(4.0, 1.0, 20.0),
                    sensor: false,
                },
                ObstacleDef {
                    name: "boost-pad".to_string(),
                    position: Vec3::new(-a, 0.05, b),
                    half_extents: Vec3::new(3.0, 0.05, 3.0),
                    sensor: true,
                },
            ],
            vehicle: VehicleParams::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, TrackError> {
        let track: Track = serde_json::from_str(json)?;
        track.validate()?;
        Ok(track)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, TrackError> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        let track = Self::from_json(&json)?;
        info!(
            name = %track.name,
            checkpoints = track.checkpoints.len(),
            obstacles = track.obstacles.len(),
            "Loaded track"
        );
        Ok(track)
    }

    fn validate(&self) -> Result<(), TrackError> {
        let last = self
            .checkpoints
            .len()
            .checked_sub(1)
            .ok_or(TrackError::NoCheckpoints)?;

        for (which, index) in [("start", self.start_index), ("end", self.end_index)] {
            if index > last {
                return Err(TrackError::IndexOutOfRange { which, index, last });
            }
        }
        Ok(())
    }

    /// Ground, obstacles and the kart, registered in both the world and the scene
    pub fn build_world(&self) -> TrackWorld {
        let mut world = FlatWorld::new();
        let mut scene = Scene::new();

        let ground = world.add_ground(self.ground_height, self.ground_half_size);
        scene.add(ground, ObjectKind::Ground, "ground");

        for obstacle in &self.obstacles {
            let body = if obstacle.sensor {
                world.add_sensor(obstacle.position, obstacle.half_extents)
            } else {
                world.add_solid(obstacle.position, obstacle.half_extents)
            };
            scene.add(
                body,
                ObjectKind::Obstacle {
                    sensor: obstacle.sensor,
                },
                obstacle.name.clone(),
            );
        }

        let player = world.add_dynamic(self.spawn.position, KART_HALF_EXTENTS);
        scene.add(player, ObjectKind::Player, "kart");

        TrackWorld {
            world,
            scene,
            player,
        }
    }

    pub fn course(&self) -> CheckpointCourse {
        CheckpointCourse::new(
            self.checkpoints.clone(),
            self.start_index,
            self.end_index,
            self.spawn,
        )
    }
}

impl Default for Track {
    fn default() -> Self {
        Self::oval()
    }
}
