//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::game::input::DEFAULT_INPUT_LOG_CAPACITY;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS, comma-separated
    pub client_origin: String,

    /// Render ticks per second driving the session
    pub frame_hz: u32,
    /// Simulation substep length in milliseconds
    pub fixed_step_ms: f64,
    /// Substeps allowed per render tick
    pub max_substeps: u32,
    /// Snapshots per second sent to clients
    pub snapshot_hz: u32,
    /// Input events retained for replay
    pub input_log_capacity: usize,

    /// Ghost file loaded at startup and rewritten after each lap
    pub ghost_path: Option<PathBuf>,
    /// Track layout JSON; the built-in oval when unset
    pub track_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // PORT wins over SERVER_ADDR for hosted deploys
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),

            frame_hz: parse_var("FRAME_HZ", 60)?,
            fixed_step_ms: parse_var("FIXED_STEP_MS", 1000.0 / 120.0)?,
            max_substeps: parse_var("MAX_SUBSTEPS", 5)?,
            snapshot_hz: parse_var("SNAPSHOT_HZ", 20)?,
            input_log_capacity: parse_var("INPUT_LOG_CAPACITY", DEFAULT_INPUT_LOG_CAPACITY)?,

            ghost_path: env::var_os("GHOST_PATH").map(PathBuf::from),
            track_path: env::var_os("TRACK_PATH").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_hz == 0 {
            return Err(ConfigError::OutOfRange("FRAME_HZ"));
        }
        if self.snapshot_hz == 0 {
            return Err(ConfigError::OutOfRange("SNAPSHOT_HZ"));
        }
        if !(self.fixed_step_ms.is_finite() && self.fixed_step_ms > 0.0) {
            return Err(ConfigError::OutOfRange("FIXED_STEP_MS"));
        }
        if self.max_substeps == 0 {
            return Err(ConfigError::OutOfRange("MAX_SUBSTEPS"));
        }
        if self.input_log_capacity == 0 {
            return Err(ConfigError::OutOfRange("INPUT_LOG_CAPACITY"));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Environment variable out of range: {0}")]
    OutOfRange(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
