//! WebSocket push channel
//!
//! Outbound: every hub message for this connection.
//! Inbound: `{"event": "stream:connect" | "stream:disconnect" | "detect:frame", "data": {...}}`.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Calibration;
use crate::realtime_hub::{CommandErrorMessage, HubMessage};
use crate::state::AppState;

/// Inbound command
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientCommand {
    #[serde(rename = "stream:connect")]
    Connect { id: String },
    #[serde(rename = "stream:disconnect")]
    Disconnect { id: String },
    #[serde(rename = "detect:frame")]
    DetectFrame {
        id: String,
        /// base64 JPEG
        image: String,
        #[serde(default)]
        calibration: Option<Calibration>,
    },
}

impl ClientCommand {
    fn name(&self) -> &'static str {
        match self {
            ClientCommand::Connect { .. } => "stream:connect",
            ClientCommand::Disconnect { .. } => "stream:disconnect",
            ClientCommand::DetectFrame { .. } => "detect:frame",
        }
    }
}

/// WebSocket upgrade handler
pub(super) async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut rx) = state.realtime.register().await;

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    handle_text(&recv_state, conn_id, &text).await;
                }
                Ok(Message::Close(_)) => {
                    tracing::info!(connection_id = %conn_id, "WebSocket client disconnected");
                    break;
                }
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.sessions.disconnect_watcher(conn_id).await;
    state.realtime.unregister(&conn_id).await;
}

/// Parse and run one inbound frame; failures go back to the sender
async fn handle_text(state: &AppState, conn_id: Uuid, text: &str) {
    let command = match serde_json::from_str::<ClientCommand>(text) {
        Ok(command) => command,
        Err(e) => {
            tracing::debug!(connection_id = %conn_id, error = %e, "Unparseable command");
            reply_error(state, conn_id, "unknown", e.to_string()).await;
            return;
        }
    };

    let name = command.name();
    if let Err(e) = handle_command(state, conn_id, command).await {
        tracing::warn!(connection_id = %conn_id, command = %name, error = %e, "Command failed");
        reply_error(state, conn_id, name, e.to_string()).await;
    }
}

async fn handle_command(state: &AppState, conn_id: Uuid, command: ClientCommand) -> Result<()> {
    match command {
        ClientCommand::Connect { id } => {
            let snapshot = state.sessions.connect(&id, conn_id).await?;
            state
                .realtime
                .send_to(&conn_id, HubMessage::Session(snapshot))
                .await;
        }
        ClientCommand::Disconnect { id } => {
            if let Some(snapshot) = state.sessions.disconnect(&id, conn_id).await? {
                state
                    .realtime
                    .send_to(&conn_id, HubMessage::Session(snapshot))
                    .await;
            }
        }
        ClientCommand::DetectFrame {
            id,
            image,
            calibration,
        } => {
            let image = STANDARD
                .decode(image.trim())
                .map_err(|e| Error::Validation(format!("image is not base64: {}", e)))?;
            let calibration = match calibration {
                Some(calibration) => Some(calibration),
                None => state.sessions.calibration(&id).await,
            };
            state
                .orchestrator
                .detect_frame(&id, image, calibration, conn_id)
                .await?;
        }
    }
    Ok(())
}

async fn reply_error(state: &AppState, conn_id: Uuid, command: &str, message: String) {
    state
        .realtime
        .send_to(
            &conn_id,
            HubMessage::CommandError(CommandErrorMessage {
                command: command.to_string(),
                message,
            }),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        let connect: ClientCommand =
            serde_json::from_str(r#"{"event":"stream:connect","data":{"id":"cam-1"}}"#).unwrap();
        assert!(matches!(connect, ClientCommand::Connect { ref id } if id == "cam-1"));

        let detect: ClientCommand = serde_json::from_str(
            r#"{"event":"detect:frame","data":{"id":"cam-1","image":"/9j/2Q==","calibration":{"focal_length":600.0,"shoulder_length":0.45,"threshold":1.2}}}"#,
        )
        .unwrap();
        match detect {
            ClientCommand::DetectFrame { calibration, .. } => {
                assert_eq!(calibration.unwrap().threshold, 1.2);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let bare: ClientCommand =
            serde_json::from_str(r#"{"event":"detect:frame","data":{"id":"c","image":""}}"#)
                .unwrap();
        assert_eq!(bare.name(), "detect:frame");
    }

    #[test]
    fn test_unknown_command_rejected() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"event":"stream:pause","data":{}}"#).is_err());
    }
}
