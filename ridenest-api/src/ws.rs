//! Real-time socket.
//!
//! ```text
//! Client            Socket task               Hub
//!   ├─ GET /ws?token ──>│                        │
//!   │                   ├─ connect() ───────────>│
//!   ├─ join-ride ──────>├─ join_ride() ─────────>│
//!   │                   │<── outbound queue ─────┤
//!   │<─ frames ─────────┤                        │
//! ```
//!
//! Frames are JSON objects tagged by `event`. Malformed or refused client frames are
//! answered with an `error` frame on the same connection.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use ridenest_core::{Identity, Operation};
use ridenest_hub::{ChannelId, ConnectionHandle, HubError};
use ridenest_shared::models::events::{ClientEvent, HubEvent};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{error::AppError, state::AppState};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = params
        .token
        .ok_or_else(|| AppError::AuthenticationError("Missing token".to_string()))?;
    let identity = state
        .verifier
        .verify(&token)
        .map_err(|_| AppError::AuthenticationError("Invalid or expired token".to_string()))?;

    state.gate.authorize(&identity, Operation::Subscribe)?;

    info!(user_id = %identity.user_id, role = %identity.role, "WebSocket connection requested");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, identity)))
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: Identity) {
    let (handle, outbound) = state.hub.connect(identity).await;
    let connection = handle.id;

    let (mut sender, mut receiver) = socket.split();

    // Drain the hub's queue for this connection into the socket
    let mut send_task = tokio::spawn(async move {
        let mut frames = ReceiverStream::new(outbound);
        while let Some(frame) = frames.next().await {
            if sender.send(Message::Text(frame.as_ref().into())).await.is_err() {
                break;
            }
        }
        debug!("WebSocket send task terminated");
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => dispatch(&recv_state, &handle, text.as_str()).await,
                Message::Close(_) => break,
                Message::Binary(_) => {
                    reply_error(&recv_state, &handle, "Binary frames are not supported".to_string()).await;
                }
                _ => {}
            }
        }
        debug!("WebSocket receive task terminated");
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub.disconnect(connection).await;
    info!(%connection, "WebSocket connection closed");
}

async fn dispatch(state: &AppState, handle: &ConnectionHandle, raw: &str) {
    let event = match serde_json::from_str::<ClientEvent>(raw) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Unparseable client frame");
            reply_error(state, handle, format!("Invalid frame: {}", e)).await;
            return;
        }
    };

    if let Err(message) = apply(state, handle, event).await {
        reply_error(state, handle, message).await;
    }
}

async fn apply(state: &AppState, handle: &ConnectionHandle, event: ClientEvent) -> Result<(), String> {
    let hub = &state.hub;
    let id = handle.id;

    match event {
        ClientEvent::JoinRide { ride_id } => {
            authorize(state, handle, Operation::Subscribe)?;
            hub.join_ride(id, ride_id).await.map_err(describe)
        }
        ClientEvent::LeaveRide { ride_id } => {
            hub.leave(id, &ChannelId::Ride(ride_id)).await;
            Ok(())
        }
        ClientEvent::VehicleLocation { ride_id, lat, lng } => {
            authorize(state, handle, Operation::PublishLocation)?;
            hub.publish_location(id, ride_id, lat, lng).await.map(|_| ()).map_err(describe)
        }
        ClientEvent::JoinGroupChat { group_id } => {
            authorize(state, handle, Operation::Subscribe)?;
            hub.join_group(id, group_id).await.map_err(describe)
        }
        ClientEvent::LeaveGroupChat { group_id } => {
            hub.leave(id, &ChannelId::Group(group_id)).await;
            Ok(())
        }
        ClientEvent::GroupMessage { group_id, message } => {
            authorize(state, handle, Operation::Subscribe)?;
            hub.group_message(group_id, handle.identity.user_id.clone(), message)
                .await
                .map(|_| ())
                .map_err(describe)
        }
        ClientEvent::JoinDispatch => {
            authorize(state, handle, Operation::WatchDispatch)?;
            hub.join_dispatch(id).await.map_err(describe)
        }
    }
}

fn authorize(state: &AppState, handle: &ConnectionHandle, operation: Operation) -> Result<(), String> {
    state
        .gate
        .authorize(&handle.identity, operation)
        .map_err(|e| e.to_string())
}

fn describe(err: HubError) -> String {
    err.to_string()
}

async fn reply_error(state: &AppState, handle: &ConnectionHandle, message: String) {
    if let Err(e) = state.hub.send_to(handle.id, &HubEvent::Error { message }).await {
        warn!(connection = %handle.id, error = %e, "Could not send error frame");
    }
}
