//! Race simulation modules

pub mod body;
pub mod checkpoint;
pub mod ghost;
pub mod input;
pub mod movement;
pub mod race;
pub mod session;
pub mod snapshot;
pub mod track;
pub mod vehicle;

pub use race::{RunnerConfig, SessionRunner};
pub use session::RaceSession;
