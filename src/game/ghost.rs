//! Lap ghost recording, persistence format and interpolated playback

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::input::InputAction;

/// Current persisted format version
pub const GHOST_FORMAT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum GhostError {
    #[error("malformed recording: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported recording version {0}")]
    UnsupportedVersion(u32),

    #[error("recording io failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostMeta {
    pub version: u32,
    /// Unix epoch milliseconds
    #[serde(rename = "createdAt")]
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputSample {
    /// Milliseconds since recording start
    pub t: f64,
    pub action: InputAction,
    pub pressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Milliseconds since recording start
    pub t: f64,
    pub position: [f32; 3],
}

/// One recorded lap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostRecording {
    pub meta: GhostMeta,
    pub inputs: Vec<InputSample>,
    pub positions: Vec<PositionSample>,
}

impl GhostRecording {
    pub fn new(created_at: i64) -> Self {
        Self {
            meta: GhostMeta {
                version: GHOST_FORMAT_VERSION,
                created_at,
            },
            inputs: Vec::new(),
            positions: Vec::new(),
        }
    }

    pub fn to_json(&self) -> Result<String, GhostError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, GhostError> {
        let recording: GhostRecording = serde_json::from_str(json)?;
        if recording.meta.version != GHOST_FORMAT_VERSION {
            return Err(GhostError::UnsupportedVersion(recording.meta.version));
        }
        Ok(recording)
    }

    /// Recorded length in milliseconds
    pub fn duration_ms(&self) -> f64 {
        self.positions.last().map(|s| s.t).unwrap_or(0.0)
    }

    /// Position at `t`, linearly interpolated between the bracketing
    /// samples and clamped to the first/last sample outside the range.
    pub fn position_at(&self, t: f64) -> Option<Vec3> {
        let first = self.positions.first()?;
        if t <= first.t {
            return Some(Vec3::from_array(first.position));
        }

        // Recordings are a single lap long, a linear scan is enough
        for pair in self.positions.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if t >= a.t && t < b.t {
                let span = b.t - a.t;
                let frac = if span > 0.0 { ((t - a.t) / span) as f32 } else { 0.0 };
                return Some(Vec3::from_array(a.position).lerp(Vec3::from_array(b.position), frac));
            }
        }

        self.positions.last().map(|s| Vec3::from_array(s.position))
    }
}

/// Appends samples for the lap in progress
#[derive(Debug, Clone, Default)]
pub struct GhostRecorder {
    active: Option<GhostRecording>,
    session_start_ms: f64,
}

impl GhostRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a fresh recording; sample times are relative to `now_ms`
    pub fn start(&mut self, now_ms: f64, created_at: i64) {
        self.active = Some(GhostRecording::new(created_at));
        self.session_start_ms = now_ms;
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn record_position(&mut self, time_ms: f64, position: Vec3) {
        if let Some(recording) = self.active.as_mut() {
            recording.positions.push(PositionSample {
                t: time_ms - self.session_start_ms,
                position: position.to_array(),
            });
        }
    }

    pub fn record_input(&mut self, time_ms: f64, action: InputAction, pressed: bool) {
        if let Some(recording) = self.active.as_mut() {
            recording.inputs.push(InputSample {
                t: time_ms - self.session_start_ms,
                action,
                pressed,
            });
        }
    }

    /// Stop recording and hand back what was captured
    pub fn finish(&mut self) -> Option<GhostRecording> {
        self.active.take()
    }

    pub fn sample_count(&self) -> usize {
        self.active.as_ref().map(|r| r.positions.len()).unwrap_or(0)
    }
}

/// Plays a recording back against a wall-clock playhead
#[derive(Debug, Clone, Default)]
pub struct GhostPlayer {
    recording: Option<GhostRecording>,
    started_at_ms: f64,
    offset_ms: f64,
    paused: bool,
}

impl GhostPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the recording and restart playback from zero
    pub fn load(&mut self, recording: GhostRecording, now_ms: f64) {
        self.recording = Some(recording);
        self.started_at_ms = now_ms;
        self.offset_ms = 0.0;
        self.paused = false;
    }

    pub fn recording(&self) -> Option<&GhostRecording> {
        self.recording.as_ref()
    }

    pub fn playhead_ms(&self, now_ms: f64) -> f64 {
        if self.paused {
            self.offset_ms
        } else {
            self.offset_ms + (now_ms - self.started_at_ms)
        }
    }

    pub fn pause(&mut self, now_ms: f64) {
        if !self.paused {
            self.offset_ms = self.playhead_ms(now_ms);
            self.paused = true;
        }
    }

    pub fn resume(&mut self, now_ms: f64) {
        if self.paused {
            self.started_at_ms = now_ms;
            self.paused = false;
        }
    }

    /// Jump to an absolute recording time
    pub fn seek(&mut self, t_ms: f64, now_ms: f64) {
        self.offset_ms = t_ms.max(0.0);
        self.started_at_ms = now_ms;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Ghost position for this frame
    pub fn sample(&self, now_ms: f64) -> Option<Vec3> {
        self.recording
            .as_ref()?
            .position_at(self.playhead_ms(now_ms))
    }
}

/// Playback command from clients
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlaybackCommand {
    Pause,
    Resume,
    Seek { t: f64 },
}

/// Recorder and player wired together: each completed lap becomes the ghost
#[derive(Debug, Clone, Default)]
pub struct Ghost {
    recorder: GhostRecorder,
    player: GhostPlayer,
    last_completed: Option<GhostRecording>,
}

impl Ghost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorder(&self) -> &GhostRecorder {
        &self.recorder
    }

    pub fn recorder_mut(&mut self) -> &mut GhostRecorder {
        &mut self.recorder
    }

    pub fn player(&self) -> &GhostPlayer {
        &self.player
    }

    pub fn restart_recording(&mut self, now_ms: f64, created_at: i64) {
        self.recorder.start(now_ms, created_at);
    }

    /// Freeze the running recording, play it from zero and start recording
    /// the next lap. Returns the frozen recording.
    pub fn complete_lap(&mut self, now_ms: f64, created_at: i64) -> Option<GhostRecording> {
        let finished = self.recorder.finish();
        if let Some(recording) = finished.as_ref() {
            info!(
                samples = recording.positions.len(),
                inputs = recording.inputs.len(),
                "Ghost recording swapped into playback"
            );
            self.last_completed = Some(recording.clone());
            self.player.load(recording.clone(), now_ms);
        }
        self.recorder.start(now_ms, created_at);
        finished
    }

    /// JSON for the most recent completed (or imported) recording
    pub fn export(&self) -> Option<String> {
        let recording = self.last_completed.as_ref()?;
        match recording.to_json() {
            Ok(json) => Some(json),
            Err(e) => {
                debug!(error = %e, "Failed to serialize ghost recording");
                None
            }
        }
    }

    /// Replace the playback recording. Malformed input is dropped and the
    /// current recording stays in place.
    pub fn import(&mut self, json: &str, now_ms: f64) -> bool {
        match GhostRecording::from_json(json) {
            Ok(recording) => {
                self.load(recording, now_ms);
                true
            }
            Err(e) => {
                debug!(error = %e, "Discarding ghost import");
                false
            }
        }
    }

    pub fn load(&mut self, recording: GhostRecording, now_ms: f64) {
        self.last_completed = Some(recording.clone());
        self.player.load(recording, now_ms);
    }

    pub fn control(&mut self, command: PlaybackCommand, now_ms: f64) {
        match command {
            PlaybackCommand::Pause => self.player.pause(now_ms),
            PlaybackCommand::Resume => self.player.resume(now_ms),
            PlaybackCommand::Seek { t } => self.player.seek(t, now_ms),
        }
    }

    pub fn sample(&self, now_ms: f64) -> Option<Vec3> {
        self.player.sample(now_ms)
    }
}
