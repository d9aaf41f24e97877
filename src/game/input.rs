//! Time-ordered input log with a live "currently held" set
//!
//! Every press/release is logged with a monotonic timestamp so the held set at
//! any session-relative time can be rebuilt from the log alone. The movement
//! loop consults both the live set and the rebuilt one each substep.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Default number of events kept before the oldest is evicted.
///
/// Roughly an hour of hard driving at ~4 transitions per second.
pub const DEFAULT_INPUT_LOG_CAPACITY: usize = 16_384;

/// Player actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputAction {
    Forward,
    Backward,
    TurnLeft,
    TurnRight,
    /// Hop when grounded; held while steering it also requests drift
    Jump,
}

impl InputAction {
    pub const ALL: [InputAction; 5] = [
        InputAction::Forward,
        InputAction::Backward,
        InputAction::TurnLeft,
        InputAction::TurnRight,
        InputAction::Jump,
    ];

    fn bit(self) -> u8 {
        match self {
            InputAction::Forward => 1 << 0,
            InputAction::Backward => 1 << 1,
            InputAction::TurnLeft => 1 << 2,
            InputAction::TurnRight => 1 << 3,
            InputAction::Jump => 1 << 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InputAction::Forward => "forward",
            InputAction::Backward => "backward",
            InputAction::TurnLeft => "turn_left",
            InputAction::TurnRight => "turn_right",
            InputAction::Jump => "jump",
        }
    }
}

impl fmt::Display for InputAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown input action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for InputAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InputAction::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// Set of held actions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<InputAction>", into = "Vec<InputAction>")]
pub struct ActionSet(u8);

impl ActionSet {
    pub const EMPTY: ActionSet = ActionSet(0);

    pub fn contains(self, action: InputAction) -> bool {
        self.0 & action.bit() != 0
    }

    pub fn insert(&mut self, action: InputAction) {
        self.0 |= action.bit();
    }

    pub fn remove(&mut self, action: InputAction) {
        self.0 &= !action.bit();
    }

    pub fn set(&mut self, action: InputAction, pressed: bool) {
        if pressed {
            self.insert(action);
        } else {
            self.remove(action);
        }
    }

    pub fn union(self, other: ActionSet) -> ActionSet {
        ActionSet(self.0 | other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = InputAction> {
        InputAction::ALL
            .into_iter()
            .filter(move |action| self.contains(*action))
    }
}

impl FromIterator<InputAction> for ActionSet {
    fn from_iter<T: IntoIterator<Item = InputAction>>(iter: T) -> Self {
        let mut set = ActionSet::EMPTY;
        for action in iter {
            set.insert(action);
        }
        set
    }
}

impl From<Vec<InputAction>> for ActionSet {
    fn from(actions: Vec<InputAction>) -> Self {
        actions.into_iter().collect()
    }
}

impl From<ActionSet> for Vec<InputAction> {
    fn from(set: ActionSet) -> Self {
        set.iter().collect()
    }
}

/// A single logged press or release
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputEvent {
    pub action: InputAction,
    pub pressed: bool,
    /// Monotonic clock time in milliseconds
    pub timestamp_ms: f64,
    pub sequence: u64,
}

/// Input log plus the live held set.
///
/// The log is kept sorted by timestamp; events with equal timestamps keep
/// arrival order. `active` always mirrors the pressed state of the latest
/// event per action. `baseline` is the held set just before the oldest
/// retained event, so evictions never change what the log reconstructs for
/// times at or after that event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputQueue {
    events: VecDeque<InputEvent>,
    capacity: usize,
    active: ActionSet,
    baseline: ActionSet,
    session_start_ms: f64,
    next_sequence: u64,
}

impl InputQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity: capacity.max(1),
            active: ActionSet::EMPTY,
            baseline: ActionSet::EMPTY,
            session_start_ms: 0.0,
            next_sequence: 0,
        }
    }

    /// Log a press or release and return its sequence number
    pub fn add_input(&mut self, action: InputAction, pressed: bool, timestamp_ms: f64) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let index = self
            .events
            .partition_point(|event| event.timestamp_ms <= timestamp_ms);
        self.events.insert(
            index,
            InputEvent {
                action,
                pressed,
                timestamp_ms,
                sequence,
            },
        );

        // A late event older than a logged one for the same action must not
        // override the newer state.
        let newest_for_action = self
            .events
            .iter()
            .skip(index + 1)
            .all(|event| event.action != action);
        if newest_for_action {
            self.active.set(action, pressed);
        }

        while self.events.len() > self.capacity {
            if let Some(evicted) = self.events.pop_front() {
                self.baseline.set(evicted.action, evicted.pressed);
            }
        }

        sequence
    }

    /// Snapshot of the currently held actions
    pub fn current_inputs(&self) -> ActionSet {
        self.active
    }

    /// Rebuild the held set at a session-relative time from the log alone
    pub fn active_inputs_at(&self, game_time_ms: f64) -> ActionSet {
        let mut set = self.baseline;
        for event in &self.events {
            if event.timestamp_ms - self.session_start_ms > game_time_ms {
                break;
            }
            set.set(event.action, event.pressed);
        }
        set
    }

    /// Drop the log, the held set and the sequence counter
    pub fn clear(&mut self) {
        self.events.clear();
        self.active = ActionSet::EMPTY;
        self.baseline = ActionSet::EMPTY;
        self.next_sequence = 0;
    }

    /// Clear everything and start a new session at `time_ms`
    pub fn set_session_start(&mut self, time_ms: f64) {
        self.clear();
        self.session_start_ms = time_ms;
    }

    /// Start a new session at `time_ms` but keep keys that are still held,
    /// both live and in the reconstructed state.
    pub fn reset_preserving_held(&mut self, time_ms: f64) {
        let held = self.active;
        self.set_session_start(time_ms);
        self.active = held;
        self.baseline = held;
    }

    pub fn session_start_ms(&self) -> f64 {
        self.session_start_ms
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn events(&self) -> impl Iterator<Item = &InputEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_LOG_CAPACITY)
    }
}
