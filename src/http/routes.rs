//! HTTP route definitions

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer,
};
use tracing::{debug, warn};

use crate::app::AppState;
use crate::game::checkpoint::ProgressReadout;
use crate::game::ghost::PlaybackCommand;
use crate::game::race::SessionCommand;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Upper bound for a plain HTTP request
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Ghost uploads may be long laps recorded at the fixed-step rate
pub const MAX_GHOST_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/progress", get(progress_handler))
        .route(
            "/ghost",
            get(export_ghost_handler)
                .post(import_ghost_handler)
                .layer(DefaultBodyLimit::max(MAX_GHOST_BODY_BYTES)),
        )
        .route("/ghost/playback", post(playback_handler))
        .route("/ws", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    track: String,
    laps: u32,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        track: state.session.track_name.to_string(),
        laps: state.session.progress().laps,
    })
}

// ============================================================================
// Progress readout
// ============================================================================

async fn progress_handler(State(state): State<AppState>) -> Json<ProgressReadout> {
    Json(state.session.progress())
}

// ============================================================================
// Ghost endpoints
// ============================================================================

async fn export_ghost_handler(State(state): State<AppState>) -> Result<Response, AppError> {
    let json = state
        .session
        .export_ghost()
        .await
        .ok_or_else(|| AppError::NotFound("No completed lap recording".to_string()))?;

    Ok(([(header::CONTENT_TYPE, "application/json")], json).into_response())
}

/// Accepts any body; the session drops recordings it cannot parse
async fn import_ghost_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    if state.ghost_import_limiter.check().is_err() {
        warn!("Rate limited ghost import");
        return Err(AppError::RateLimited);
    }

    debug!(bytes = body.len(), "Ghost import received");
    if !state.session.send(SessionCommand::ImportGhost(body.to_vec())).await {
        return Err(AppError::Internal("Session is not running".to_string()));
    }
    Ok(StatusCode::ACCEPTED)
}

async fn playback_handler(
    State(state): State<AppState>,
    Json(command): Json<PlaybackCommand>,
) -> Result<StatusCode, AppError> {
    if !state.session.send(SessionCommand::Playback(command)).await {
        return Err(AppError::Internal("Session is not running".to_string()));
    }
    Ok(StatusCode::ACCEPTED)
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::game::movement::MovementConfig;
    use crate::game::race::{RunnerConfig, SessionRunner};
    use crate::game::session::RaceSession;
    use crate::game::track::Track;
    use crate::util::time::{Clock, MonotonicClock};

    fn test_config() -> Config {
        Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "debug".to_string(),
            client_origin: "http://localhost:5173".to_string(),
            frame_hz: 60,
            fixed_step_ms: 1000.0 / 120.0,
            max_substeps: 5,
            snapshot_hz: 20,
            input_log_capacity: 1024,
            ghost_path: None,
            track_path: None,
        }
    }

    fn app() -> Router {
        let clock = Arc::new(MonotonicClock::new());
        let track = Track::oval();
        let session = RaceSession::new(&track, MovementConfig::default(), 1024, clock.now_ms());
        let runner_config = RunnerConfig {
            frame_hz: 60,
            snapshot_hz: 20,
            ghost_path: None,
        };
        let (runner, handle) = SessionRunner::new(session, clock, runner_config, &track.name);
        tokio::spawn(runner.run());
        build_router(AppState::new(test_config(), handle))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_progress() {
        let app = app();

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["track"], "oval");

        let response = app
            .oneshot(Request::get("/progress").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["total_checkpoints"], 7);
        assert_eq!(json["laps"], 0);
        assert!(json["best_lap_ms"].is_null());
    }

    #[tokio::test]
    async fn test_ghost_export_is_404_until_a_lap_exists() {
        let response = app()
            .oneshot(Request::get("/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_ghost_import_is_accepted_and_dropped() {
        let app = app();

        let response = app
            .clone()
            .oneshot(Request::post("/ghost").body(Body::from("{oops")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(Request::get("/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_imported_ghost_can_be_exported() {
        let app = app();
        let recording = r#"{"meta":{"version":1,"createdAt":1},"inputs":[{"t":4.0,"action":"forward","pressed":true}],"positions":[{"t":0.0,"position":[0.0,0.4,0.0]}]}"#;

        let response = app
            .clone()
            .oneshot(Request::post("/ghost").body(Body::from(recording)).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(Request::get("/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["inputs"][0]["action"], "forward");
        assert_eq!(json["meta"]["createdAt"], 1);
    }

    #[tokio::test]
    async fn test_non_utf8_ghost_import_is_accepted_and_dropped() {
        let app = app();

        let response = app
            .clone()
            .oneshot(Request::post("/ghost").body(Body::from(vec![0xff, 0xfe, 0x7b])).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(Request::get("/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_long_recording_import_round_trips() {
        let app = app();
        // Eight minutes of 120 Hz samples, past axum's 2 MB default limit
        let positions: Vec<String> = (0..57_600)
            .map(|i| format!(r#"{{"t":{}.5,"position":[12.25,0.4,-31.75]}}"#, i * 8))
            .collect();
        let recording = format!(
            r#"{{"meta":{{"version":1,"createdAt":7}},"inputs":[],"positions":[{}]}}"#,
            positions.join(",")
        );
        assert!(recording.len() > 2 * 1024 * 1024);

        let response = app
            .clone()
            .oneshot(Request::post("/ghost").body(Body::from(recording)).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(Request::get("/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["meta"]["createdAt"], 7);
        assert_eq!(json["positions"].as_array().map(Vec::len), Some(57_600));
    }

    #[tokio::test]
    async fn test_playback_command_accepted() {
        let response = app()
            .oneshot(
                Request::post("/ghost/playback")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"action":"seek","t":250.0}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
