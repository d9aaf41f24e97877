//! Race session driver and frame loop

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::store::save_recording;
use crate::util::time::Clock;
use crate::ws::protocol::{RaceEvent, ServerMsg};

use super::checkpoint::{CheckpointEvent, ProgressReadout};
use super::ghost::{GhostRecording, PlaybackCommand};
use super::input::InputAction;
use super::session::{FrameOutcome, RaceSession};
use super::snapshot::SnapshotBuilder;

/// Commands accepted by the running session
#[derive(Debug)]
pub enum SessionCommand {
    Input {
        action: InputAction,
        pressed: bool,
        /// Session clock time the transition was received
        timestamp_ms: f64,
    },
    Respawn,
    /// Raw upload body; anything that is not a valid recording is dropped
    ImportGhost(Vec<u8>),
    ExportGhost(oneshot::Sender<Option<String>>),
    Playback(PlaybackCommand),
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub frame_hz: u32,
    pub snapshot_hz: u32,
    /// Where completed laps are saved, if anywhere
    pub ghost_path: Option<PathBuf>,
}

/// Handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub track_name: Arc<str>,
    command_tx: mpsc::Sender<SessionCommand>,
    events_tx: broadcast::Sender<ServerMsg>,
    progress: Arc<RwLock<ProgressReadout>>,
    clock: Arc<dyn Clock>,
}

impl SessionHandle {
    /// Queue a command; false once the runner has stopped
    pub async fn send(&self, command: SessionCommand) -> bool {
        self.command_tx.send(command).await.is_ok()
    }

    /// Queue a key transition stamped with the session clock
    pub async fn input(&self, action: InputAction, pressed: bool) -> bool {
        let timestamp_ms = self.clock.now_ms();
        self.send(SessionCommand::Input {
            action,
            pressed,
            timestamp_ms,
        })
        .await
    }

    pub async fn export_ghost(&self) -> Option<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if !self.send(SessionCommand::ExportGhost(reply_tx)).await {
            return None;
        }
        reply_rx.await.ok().flatten()
    }

    /// Latest published progress readout
    pub fn progress(&self) -> ProgressReadout {
        *self.progress.read()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.events_tx.subscribe()
    }
}

/// Owns the session and drives it from a fixed-rate ticker
pub struct SessionRunner {
    session: RaceSession,
    clock: Arc<dyn Clock>,
    config: RunnerConfig,
    command_rx: mpsc::Receiver<SessionCommand>,
    events_tx: broadcast::Sender<ServerMsg>,
    progress: Arc<RwLock<ProgressReadout>>,
    snapshot_builder: SnapshotBuilder,
    pending_events: Vec<RaceEvent>,
    frame: u64,
    last_frame_ms: f64,
}

impl SessionRunner {
    pub fn new(
        session: RaceSession,
        clock: Arc<dyn Clock>,
        config: RunnerConfig,
        track_name: &str,
    ) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::channel(256);
        let (events_tx, _) = broadcast::channel(64);
        let progress = Arc::new(RwLock::new(session.readout()));

        let handle = SessionHandle {
            track_name: Arc::from(track_name),
            command_tx,
            events_tx: events_tx.clone(),
            progress: progress.clone(),
            clock: clock.clone(),
        };

        // Game time starts with the session, not with the first tick
        let last_frame_ms = session.session_start_ms();
        let runner = Self {
            snapshot_builder: SnapshotBuilder::for_rates(config.frame_hz, config.snapshot_hz),
            session,
            clock,
            config,
            command_rx,
            events_tx,
            progress,
            pending_events: Vec::new(),
            frame: 0,
            last_frame_ms,
        };

        (runner, handle)
    }

    /// Run frames until every handle has been dropped
    pub async fn run(mut self) {
        info!(
            frame_hz = self.config.frame_hz,
            snapshot_hz = self.config.snapshot_hz,
            "Session runner started"
        );

        let frame_duration = Duration::from_micros(1_000_000 / self.config.frame_hz.max(1) as u64);
        let mut ticker = interval(frame_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if !self.run_frame() {
                break;
            }
        }

        info!(frames = self.frame, "Session runner stopped");
    }

    /// One frame with the real time elapsed since the previous one
    fn run_frame(&mut self) -> bool {
        let now = self.clock.now_ms();
        let frame_dt = (now - self.last_frame_ms).max(0.0);
        self.last_frame_ms = now;

        if !self.process_commands(now) {
            return false;
        }

        let outcome = self.session.frame(frame_dt, now);
        self.collect_events(&outcome);

        if let Some(recording) = outcome.completed_lap {
            self.persist(recording);
        }

        *self.progress.write() = self.session.readout();

        if self.snapshot_builder.should_send() {
            let events = std::mem::take(&mut self.pending_events);
            let snapshot =
                self.snapshot_builder
                    .build(self.frame, &self.session, outcome.ghost_position, events);
            // No subscribers is fine
            let _ = self.events_tx.send(snapshot);
        }

        self.frame += 1;
        true
    }

    /// Drain queued commands in arrival order
    fn process_commands(&mut self, now: f64) -> bool {
        loop {
            match self.command_rx.try_recv() {
                Ok(command) => self.apply(command, now),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => {
                    debug!("All session handles dropped");
                    return false;
                }
            }
        }
    }

    fn apply(&mut self, command: SessionCommand, now: f64) {
        match command {
            SessionCommand::Input {
                action,
                pressed,
                timestamp_ms,
            } => {
                self.session.handle_input(action, pressed, timestamp_ms);
            }
            SessionCommand::Respawn => {
                self.session.respawn(now);
                let vehicle = self.session.vehicle();
                self.pending_events.push(RaceEvent::Respawned {
                    position: vehicle.position.to_array(),
                    yaw: vehicle.yaw,
                });
                self.snapshot_builder.force_next();
            }
            SessionCommand::ImportGhost(json) => {
                if self.session.import_ghost(&json, now) {
                    self.pending_events.push(RaceEvent::GhostLoaded);
                }
            }
            SessionCommand::ExportGhost(reply) => {
                let _ = reply.send(self.session.export_ghost());
            }
            SessionCommand::Playback(command) => {
                self.session.control_playback(command, now);
            }
        }
    }

    fn collect_events(&mut self, outcome: &FrameOutcome) {
        for _ in 0..outcome.collisions {
            self.pending_events.push(RaceEvent::Collision);
        }

        for event in &outcome.checkpoints {
            match *event {
                CheckpointEvent::Passed { index } => {
                    self.pending_events.push(RaceEvent::CheckpointPassed { index });
                }
                CheckpointEvent::LapCompleted { lap, lap_ms, .. } => {
                    self.pending_events.push(RaceEvent::LapCompleted {
                        lap,
                        lap_ms,
                        best_lap_ms: self.session.readout().best_lap_ms,
                    });
                    self.snapshot_builder.force_next();
                }
            }
        }

        if outcome.completed_lap.is_some() {
            self.pending_events.push(RaceEvent::GhostLoaded);
        }
    }

    /// Save a finished lap in the background
    fn persist(&self, recording: GhostRecording) {
        let Some(path) = self.config.ghost_path.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = save_recording(&path, &recording).await {
                warn!(path = %path.display(), error = %e, "Failed to save ghost recording");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::movement::MovementConfig;
    use crate::game::track::Track;
    use tokio_test::assert_ok;

    /// Clock the test moves by hand
    #[derive(Default)]
    struct ManualClock {
        now_ms: parking_lot::Mutex<f64>,
    }

    impl ManualClock {
        fn advance(&self, ms: f64) {
            *self.now_ms.lock() += ms;
        }
    }

    impl Clock for ManualClock {
        fn now_ms(&self) -> f64 {
            *self.now_ms.lock()
        }
    }

    fn runner(clock: Arc<ManualClock>) -> (SessionRunner, SessionHandle) {
        let track = Track::oval();
        let session = RaceSession::new(&track, MovementConfig::default(), 1024, clock.now_ms());
        let config = RunnerConfig {
            frame_hz: 60,
            snapshot_hz: 20,
            ghost_path: None,
        };
        SessionRunner::new(session, clock, config, &track.name)
    }

    #[tokio::test]
    async fn test_input_moves_kart_and_publishes_progress() {
        let clock = Arc::new(ManualClock::default());
        let (mut runner, handle) = runner(clock.clone());
        let start_z = runner.session.vehicle().position.z;

        assert!(handle.input(InputAction::Forward, true).await);
        for _ in 0..60 {
            clock.advance(1000.0 / 60.0);
            assert!(runner.run_frame());
        }

        assert!(runner.session.vehicle().position.z > start_z + 1.0);
        assert_eq!(handle.progress().total_checkpoints, 7);
        assert_eq!(handle.progress().last_index, 0);
    }

    #[tokio::test]
    async fn test_startup_gap_counts_toward_first_frame() {
        let clock = Arc::new(ManualClock::default());
        let track = Track::oval();
        let session = RaceSession::new(&track, MovementConfig::default(), 1024, clock.now_ms());

        // Track and ghost loading happen between session creation and the runner
        clock.advance(250.0);
        let config = RunnerConfig {
            frame_hz: 60,
            snapshot_hz: 20,
            ghost_path: None,
        };
        let (mut runner, _handle) =
            SessionRunner::new(session, clock.clone(), config, &track.name);
        assert_eq!(runner.last_frame_ms, 0.0);

        assert!(runner.run_frame());
        assert_eq!(runner.last_frame_ms, 250.0);
    }

    #[tokio::test]
    async fn test_snapshots_follow_snapshot_rate() {
        let clock = Arc::new(ManualClock::default());
        let (mut runner, handle) = runner(clock.clone());
        let mut rx = handle.subscribe();

        for _ in 0..2 {
            clock.advance(16.0);
            runner.run_frame();
        }
        assert!(rx.try_recv().is_err());

        clock.advance(16.0);
        runner.run_frame();
        let msg = assert_ok!(rx.try_recv());
        assert!(matches!(msg, ServerMsg::Snapshot { frame: 2, ghost: None, .. }));
    }

    #[tokio::test]
    async fn test_respawn_is_reported_in_next_frame() {
        let clock = Arc::new(ManualClock::default());
        let (mut runner, handle) = runner(clock.clone());
        let mut rx = handle.subscribe();

        assert!(handle.send(SessionCommand::Respawn).await);
        clock.advance(16.0);
        runner.run_frame();

        let msg = assert_ok!(rx.try_recv());
        match msg {
            ServerMsg::Snapshot { events, .. } => {
                assert!(matches!(events.as_slice(), [RaceEvent::Respawned { .. }]));
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ghost_import_and_export_through_handle() {
        let clock = Arc::new(ManualClock::default());
        let (runner, handle) = runner(clock);
        let task = tokio::spawn(runner.run());

        assert_eq!(handle.export_ghost().await, None);

        assert!(handle.send(SessionCommand::ImportGhost("not json".into())).await);
        assert_eq!(handle.export_ghost().await, None);

        let json = r#"{"meta":{"version":1,"createdAt":5},"inputs":[],"positions":[{"t":0.0,"position":[1.0,2.0,3.0]}]}"#;
        assert!(handle.send(SessionCommand::ImportGhost(json.into())).await);
        let exported = handle.export_ghost().await.expect("ghost after import");
        let recording = assert_ok!(GhostRecording::from_json(&exported));
        assert_eq!(recording.positions[0].position, [1.0, 2.0, 3.0]);

        drop(handle);
        let joined = assert_ok!(tokio::time::timeout(Duration::from_secs(2), task).await);
        assert_ok!(joined);
    }
}
