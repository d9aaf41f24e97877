//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::race::{SessionCommand, SessionHandle};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let connection_id = Uuid::new_v4();
    info!(connection_id = %connection_id, "WebSocket upgrade");
    ws.on_upgrade(move |socket| handle_socket(socket, connection_id, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, connection_id: Uuid, state: AppState) {
    let (mut ws_sink, ws_stream) = socket.split();
    let session = state.session.clone();

    let welcome = ServerMsg::Welcome {
        connection_id,
        server_time: unix_millis(),
        track: session.track_name.to_string(),
        total_checkpoints: session.progress().total_checkpoints,
    };

    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(connection_id = %connection_id, error = %e, "Failed to send welcome");
        return;
    }

    let snapshot_rx = session.subscribe();
    run_connection(connection_id, ws_sink, ws_stream, session, snapshot_rx).await;

    info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Pump broadcasts out and client messages in until either side closes
async fn run_connection(
    connection_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    session: SessionHandle,
    mut snapshot_rx: broadcast::Receiver<ServerMsg>,
) {
    let rate_limiter = ConnectionRateLimiter::new();
    // Replies meant for this client only (pong, errors)
    let (direct_tx, mut direct_rx) = mpsc::channel::<ServerMsg>(16);

    let writer_handle = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                direct = direct_rx.recv() => match direct {
                    Some(msg) => msg,
                    None => break,
                },
                broadcast = snapshot_rx.recv() => match broadcast {
                    Ok(msg) => msg,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(
                            connection_id = %connection_id,
                            lagged_count = n,
                            "Client lagged, skipping {} messages", n
                        );
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!(connection_id = %connection_id, "Session channel closed");
                        break;
                    }
                },
            };

            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let parsed = serde_json::from_str::<ClientMsg>(&text);
                if !admit(&rate_limiter, parsed.as_ref().ok()) {
                    warn!(connection_id = %connection_id, "Rate limited client message");
                    continue;
                }

                match parsed {
                    Ok(msg) => {
                        if !dispatch(&session, &direct_tx, msg).await {
                            debug!(connection_id = %connection_id, "Session stopped");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(
                            connection_id = %connection_id,
                            error = %e,
                            "Failed to parse client message"
                        );
                        let _ = direct_tx
                            .send(ServerMsg::Error {
                                code: "bad_message".to_string(),
                                message: e.to_string(),
                            })
                            .await;
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(connection_id = %connection_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(connection_id = %connection_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

/// Rate check for one client message. Key releases always pass so a
/// throttled client can never leave an action held.
fn admit(limiter: &ConnectionRateLimiter, msg: Option<&ClientMsg>) -> bool {
    match msg {
        Some(ClientMsg::Input { pressed: false, .. }) => true,
        _ => limiter.check_input(),
    }
}

/// Forward one client message; false once the session is gone
async fn dispatch(
    session: &SessionHandle,
    direct_tx: &mpsc::Sender<ServerMsg>,
    msg: ClientMsg,
) -> bool {
    match msg {
        ClientMsg::Input { action, pressed } => session.input(action, pressed).await,
        ClientMsg::Respawn => session.send(SessionCommand::Respawn).await,
        ClientMsg::Ping { t } => {
            let _ = direct_tx.send(ServerMsg::Pong { t }).await;
            true
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::input::InputAction;

    /// One message per second, already spent
    fn exhausted() -> ConnectionRateLimiter {
        let limiter = ConnectionRateLimiter::with_rate(1);
        let press = ClientMsg::Input {
            action: InputAction::Forward,
            pressed: true,
        };
        assert!(admit(&limiter, Some(&press)));
        limiter
    }

    #[test]
    fn test_release_passes_exhausted_limiter() {
        let limiter = exhausted();
        let release = ClientMsg::Input {
            action: InputAction::Forward,
            pressed: false,
        };
        assert!(admit(&limiter, Some(&release)));
        assert!(admit(&limiter, Some(&release)));
    }

    #[test]
    fn test_presses_pings_and_garbage_are_limited() {
        let limiter = exhausted();
        let press = ClientMsg::Input {
            action: InputAction::TurnLeft,
            pressed: true,
        };
        assert!(!admit(&limiter, Some(&press)));
        assert!(!admit(&limiter, Some(&ClientMsg::Ping { t: 1 })));
        assert!(!admit(&limiter, Some(&ClientMsg::Respawn)));
        assert!(!admit(&limiter, None));
    }
}
