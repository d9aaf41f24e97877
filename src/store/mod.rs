//! Persistence for ghost recordings

pub mod ghost_files;

pub use ghost_files::{load_if_present, save_recording};
