//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::race::SessionHandle;
use crate::util::rate_limit::{create_limiter, Limiter, GHOST_IMPORT_RATE_LIMIT};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session: SessionHandle,
    pub ghost_import_limiter: Arc<Limiter>,
}

impl AppState {
    pub fn new(config: Config, session: SessionHandle) -> Self {
        Self {
            config: Arc::new(config),
            session,
            ghost_import_limiter: create_limiter(GHOST_IMPORT_RATE_LIMIT),
        }
    }
}
