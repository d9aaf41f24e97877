//! Ordered checkpoint traversal and lap counting

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::util::time::LapTimer;

use super::vehicle::{forward_vector, right_vector};

/// Height added to a checkpoint's position when used as a respawn point
pub const RESPAWN_LIFT: f32 = 0.5;

/// An oriented checkpoint trigger box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckpointVolume {
    pub position: Vec3,
    pub yaw: f32,
    #[serde(default)]
    pub roll: f32,
    pub half_extents: Vec3,
}

impl CheckpointVolume {
    /// Point-in-box test in the checkpoint's yaw frame (roll is ignored)
    pub fn contains(&self, point: Vec3) -> bool {
        let d = point - self.position;
        let local_x = d.dot(right_vector(self.yaw));
        let local_z = d.dot(forward_vector(self.yaw));
        local_x.abs() <= self.half_extents.x
            && d.y.abs() <= self.half_extents.y
            && local_z.abs() <= self.half_extents.z
    }

    pub fn respawn_transform(&self) -> RespawnTransform {
        RespawnTransform {
            position: self.position + Vec3::Y * RESPAWN_LIFT,
            yaw: self.yaw,
            roll: self.roll,
        }
    }
}

/// Pose the car is reset to on respawn
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RespawnTransform {
    pub position: Vec3,
    pub yaw: f32,
    #[serde(default)]
    pub roll: f32,
}

/// Result of a validated checkpoint entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub index: usize,
    pub lap_completed: bool,
}

/// Checkpoint ordering state machine.
///
/// Indices run `0..=total`. `last` only moves through [`CheckpointProgress::enter`];
/// a lap is counted when the end checkpoint is entered straight after `total`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointProgress {
    total: usize,
    last: usize,
    laps: u32,
    inside: Vec<bool>,
    start_index: usize,
    end_index: usize,
    /// False until the first valid entry; blocks a lap on the opening frame
    visited_any: bool,
}

impl CheckpointProgress {
    pub fn new(total: usize, start_index: usize, end_index: usize) -> Self {
        Self {
            total,
            last: 0,
            laps: 0,
            inside: vec![false; total + 1],
            start_index,
            end_index,
            visited_any: false,
        }
    }

    /// Feed the overlap state of checkpoint `index` for this frame.
    /// Only a false→true edge can produce a transition.
    pub fn observe(&mut self, index: usize, overlapping: bool) -> Option<Transition> {
        let was_inside = self.inside.get(index).copied()?;
        self.inside[index] = overlapping;
        if overlapping && !was_inside {
            self.enter(index)
        } else {
            None
        }
    }

    /// Attempt the ordered transition into `index`
    pub fn enter(&mut self, index: usize) -> Option<Transition> {
        if !self.is_valid_transition(index) {
            debug!(index, last = self.last, "Ignoring out-of-order checkpoint");
            return None;
        }

        let previous = self.last;
        let lap_completed =
            index == self.end_index && previous == self.total && self.visited_any;

        self.last = index;
        self.visited_any = true;
        if lap_completed {
            self.laps += 1;
        }

        Some(Transition {
            index,
            lap_completed,
        })
    }

    fn is_valid_transition(&self, index: usize) -> bool {
        if index > self.total {
            return false;
        }
        let next_in_order = index == self.last + 1;
        let restart =
            index == self.start_index && (self.last == 0 || self.last == self.total);
        let wrap = self.last == self.total && (index == 0 || index == 1);
        next_in_order || restart || wrap
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn last(&self) -> usize {
        self.last
    }

    pub fn laps(&self) -> u32 {
        self.laps
    }
}

/// Read-only view for presentation layers
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressReadout {
    pub total_checkpoints: usize,
    pub last_index: usize,
    pub laps: u32,
    pub last_lap_ms: Option<f64>,
    pub best_lap_ms: Option<f64>,
}

/// Something that happened at a checkpoint this frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CheckpointEvent {
    Passed { index: usize },
    LapCompleted { index: usize, lap: u32, lap_ms: f64 },
}

/// Checkpoint volumes together with their ordering state and respawn pose
#[derive(Debug, Clone)]
pub struct CheckpointCourse {
    volumes: Vec<CheckpointVolume>,
    progress: CheckpointProgress,
    respawn: RespawnTransform,
}

impl CheckpointCourse {
    /// `volumes` must be non-empty; the last volume's index is `total`
    pub fn new(
        volumes: Vec<CheckpointVolume>,
        start_index: usize,
        end_index: usize,
        spawn: RespawnTransform,
    ) -> Self {
        let total = volumes.len().saturating_sub(1);
        Self {
            progress: CheckpointProgress::new(total, start_index, end_index),
            volumes,
            respawn: spawn,
        }
    }

    /// Test every checkpoint against the car position and apply the
    /// resulting transitions in index order.
    pub fn update(
        &mut self,
        position: Vec3,
        now_ms: f64,
        timer: &mut LapTimer,
    ) -> Vec<CheckpointEvent> {
        let mut events = Vec::new();

        for index in 0..self.volumes.len() {
            let volume = self.volumes[index];
            let Some(transition) = self.progress.observe(index, volume.contains(position)) else {
                continue;
            };

            self.respawn = volume.respawn_transform();

            // Timing starts at the first valid entry, whichever gate it is
            if !timer.is_running() && !transition.lap_completed {
                timer.start_lap(now_ms);
            }

            let lap_ms = if transition.lap_completed {
                timer.complete_lap(now_ms)
            } else {
                None
            };

            match lap_ms {
                Some(lap_ms) => {
                    let lap = self.progress.laps();
                    info!(lap, lap_ms, "Lap completed");
                    events.push(CheckpointEvent::LapCompleted { index, lap, lap_ms });
                }
                None => {
                    debug!(index, "Checkpoint passed");
                    events.push(CheckpointEvent::Passed { index });
                }
            }
        }

        events
    }

    pub fn respawn(&self) -> RespawnTransform {
        self.respawn
    }

    pub fn progress(&self) -> &CheckpointProgress {
        &self.progress
    }

    pub fn volumes(&self) -> &[CheckpointVolume] {
        &self.volumes
    }

    pub fn readout(&self, timer: &LapTimer) -> ProgressReadout {
        ProgressReadout {
            total_checkpoints: self.progress.total(),
            last_index: self.progress.last(),
            laps: self.progress.laps(),
            last_lap_ms: timer.last_lap_ms(),
            best_lap_ms: timer.best_lap_ms(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visit(progress: &mut CheckpointProgress, order: &[usize]) {
        for &index in order {
            progress.observe(index, true);
            progress.observe(index, false);
        }
    }

    fn line_course() -> CheckpointCourse {
        let volumes = (0..4)
            .map(|i| CheckpointVolume {
                position: Vec3::new(0.0, 0.0, i as f32 * 20.0),
                yaw: 0.0,
                roll: 0.0,
                half_extents: Vec3::new(5.0, 2.0, 1.0),
            })
            .collect();
        let spawn = RespawnTransform {
            position: Vec3::new(0.0, 0.5, -5.0),
            yaw: 0.0,
            roll: 0.0,
        };
        CheckpointCourse::new(volumes, 0, 0, spawn)
    }

    #[test]
    fn test_full_traversal_counts_one_lap() {
        let mut progress = CheckpointProgress::new(3, 0, 0);
        visit(&mut progress, &[0, 1, 2, 3]);
        assert_eq!(progress.laps(), 0);

        visit(&mut progress, &[0]);
        assert_eq!(progress.laps(), 1);
        assert_eq!(progress.last(), 0);
    }

    #[test]
    fn test_skipped_checkpoint_is_ignored() {
        let mut progress = CheckpointProgress::new(3, 0, 0);
        visit(&mut progress, &[0, 2]);
        assert_eq!(progress.last(), 0);
        assert_eq!(progress.laps(), 0);
    }

    #[test]
    fn test_wrap_to_first_checkpoint_after_total() {
        let mut progress = CheckpointProgress::new(3, 0, 0);
        visit(&mut progress, &[0, 1, 2, 3, 1]);
        assert_eq!(progress.last(), 1);
        assert_eq!(progress.laps(), 0);
    }

    #[test]
    fn test_staying_inside_does_not_retrigger() {
        let mut progress = CheckpointProgress::new(3, 0, 0);
        assert!(progress.observe(0, true).is_some());
        assert!(progress.observe(0, true).is_none());
        assert!(progress.observe(1, true).is_some());
        assert!(progress.observe(1, true).is_none());
        assert_eq!(progress.last(), 1);
    }

    #[test]
    fn test_opening_entry_never_completes_a_lap() {
        // A course whose end index sits at total, entered first from spawn
        let mut progress = CheckpointProgress::new(0, 0, 0);
        let first = progress.enter(0);
        assert_eq!(
            first,
            Some(Transition {
                index: 0,
                lap_completed: false
            })
        );
        assert_eq!(progress.laps(), 0);

        progress.observe(0, false);
        assert!(progress.observe(0, true).is_some_and(|t| t.lap_completed));
        assert_eq!(progress.laps(), 1);
    }

    #[test]
    fn test_out_of_range_index_is_ignored() {
        let mut progress = CheckpointProgress::new(3, 0, 0);
        assert!(progress.observe(7, true).is_none());
        assert!(progress.enter(9).is_none());
    }

    #[test]
    fn test_volume_respects_yaw() {
        let volume = CheckpointVolume {
            position: Vec3::ZERO,
            yaw: std::f32::consts::FRAC_PI_2,
            roll: 0.0,
            half_extents: Vec3::new(6.0, 2.0, 0.5),
        };
        // Rotated a quarter turn, the wide axis now runs along Z
        assert!(volume.contains(Vec3::new(0.0, 0.0, 5.0)));
        assert!(!volume.contains(Vec3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn test_course_times_laps_and_moves_respawn() {
        let mut course = line_course();
        let mut timer = LapTimer::new();
        let away = Vec3::new(50.0, 0.0, 10.0);

        let mut now = 0.0;
        for z in [0.0, 20.0, 40.0, 60.0] {
            now += 1_000.0;
            course.update(Vec3::new(0.0, 0.0, z), now, &mut timer);
            course.update(away, now + 10.0, &mut timer);
        }
        assert_eq!(course.respawn().position, Vec3::new(0.0, RESPAWN_LIFT, 60.0));

        let events = course.update(Vec3::ZERO, 9_000.0, &mut timer);
        assert_eq!(
            events,
            vec![CheckpointEvent::LapCompleted {
                index: 0,
                lap: 1,
                lap_ms: 8_000.0
            }]
        );

        let readout = course.readout(&timer);
        assert_eq!(readout.laps, 1);
        assert_eq!(readout.total_checkpoints, 3);
        assert_eq!(readout.last_index, 0);
        assert_eq!(readout.best_lap_ms, Some(8_000.0));
    }

    #[test]
    fn test_lap_started_past_first_gate_is_timed() {
        // Spawn sits behind gate 0, so the racer can reach gate 1 first
        let mut course = line_course();
        let mut timer = LapTimer::new();
        let away = Vec3::new(50.0, 0.0, 10.0);

        let mut now = 0.0;
        for z in [20.0, 40.0, 60.0] {
            now += 5_000.0;
            course.update(Vec3::new(0.0, 0.0, z), now, &mut timer);
            course.update(away, now + 10.0, &mut timer);
        }

        let events = course.update(Vec3::ZERO, 20_000.0, &mut timer);
        assert_eq!(
            events,
            vec![CheckpointEvent::LapCompleted {
                index: 0,
                lap: 1,
                lap_ms: 15_000.0
            }]
        );
        assert_eq!(course.readout(&timer).best_lap_ms, Some(15_000.0));
    }

    #[test]
    fn test_invalid_entry_keeps_respawn() {
        let mut course = line_course();
        let mut timer = LapTimer::new();
        let spawn = course.respawn();

        let events = course.update(Vec3::new(0.0, 0.0, 40.0), 100.0, &mut timer);
        assert!(events.is_empty());
        assert_eq!(course.respawn(), spawn);
    }
}
