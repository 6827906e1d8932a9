//! Per-connection lifecycle: authenticate, admit, register, dispatch,
//! deregister.
//!
//! Each connection runs one task that multiplexes its outbound channel and
//! inbound frames with `tokio::select!`. Nothing touches the presence
//! registry until both authentication and admission have succeeded, so a
//! rejected connection can never leak a registry entry.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::SplitSink, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use crate::presence::{ConnectionHandle, Outbound};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::state::AppState;
use crate::store::StoreError;
use crate::types::IdentityClaim;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let json = serde_json::to_string(event).map_err(axum::Error::new)?;
    sender.send(Message::Text(json.into())).await
}

/// Handle an individual WebSocket connection from handshake to teardown.
async fn handle_socket(socket: WebSocket, params: WsQuery, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Authentication failure terminates the transport with no registry
    // interaction.
    let claim = match state.auth.authenticate(params.token.as_deref()) {
        Ok(claim) => claim,
        Err(e) => {
            tracing::warn!("WebSocket rejected: {}", e);
            let _ = send_event(
                &mut sender,
                &ServerEvent::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    // Admission rejections are reported to the client before teardown.
    if let Err(e) = state.coordinator.admit(&claim.room_id).await {
        tracing::info!(room = %claim.room_id, user = %claim.user_id, "Admission rejected: {}", e);
        let _ = send_event(
            &mut sender,
            &ServerEvent::Error {
                message: e.to_string(),
            },
        )
        .await;
        return;
    }

    let (handle, mut rx) = ConnectionHandle::channel();
    if let Some(stale) = state
        .presence
        .register(claim.room_id.clone(), claim.user_id.clone(), handle.clone())
        .await
    {
        // Reconnect supersedes the old session; its task will observe a
        // mismatched handle on deregister and suppress user.left.
        tracing::info!(room = %claim.room_id, user = %claim.user_id, "Replacing superseded connection");
        stale.shutdown();
    }

    // The room can finish closing between admit and register; a late
    // registration must not outlive the eviction sweep.
    match confirm_registration(&state, &claim, &handle).await {
        Ok(true) => {}
        Ok(false) => {
            // Deliver the queued room.closed before dropping the transport
            while let Some(outbound) = rx.recv().await {
                match outbound {
                    Outbound::Event(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Outbound::Shutdown => break,
                }
            }
            let _ = sender.close().await;
            return;
        }
        Err(e) => {
            tracing::error!(room = %claim.room_id, "Registration check failed: {}", e);
            state
                .presence
                .deregister(&claim.room_id, &claim.user_id, &handle)
                .await;
            let _ = send_event(
                &mut sender,
                &ServerEvent::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    }

    broadcast_joined(&state, &claim).await;
    tracing::debug!(room = %claim.room_id, user = %claim.user_id, conn = handle.conn_id(), "Connection registered");

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(Outbound::Event(event)) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Shutdown) => {
                        // Forced disconnect; queued events were flushed first
                        let _ = sender.close().await;
                        break;
                    }
                    None => break,
                }
            }

            frame = receiver.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => {
                                if let Some(reply) = handle_event(&state, &claim, event).await {
                                    handle.push(reply);
                                }
                            }
                            Err(e) => {
                                tracing::debug!(user = %claim.user_id, "Unparseable event: {}", e);
                                handle.push(ServerEvent::Error {
                                    message: format!("invalid event: {}", e),
                                });
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(user = %claim.user_id, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    finish_connection(&state, &claim, &handle).await;
    tracing::debug!(room = %claim.room_id, user = %claim.user_id, "Connection closed");
}

/// Dispatch one inbound event. Local rejections come back as an `error`
/// event for the sender; successful operations broadcast through the
/// registry and return nothing.
pub async fn handle_event(
    state: &AppState,
    claim: &IdentityClaim,
    event: ClientEvent,
) -> Option<ServerEvent> {
    match event {
        ClientEvent::MessageSend { content } => {
            match state.relay.relay(&claim.room_id, &claim.user_id, &content).await {
                Ok(()) => None,
                Err(e) => {
                    tracing::debug!(user = %claim.user_id, "Send rejected: {}", e);
                    Some(ServerEvent::Error {
                        message: e.to_string(),
                    })
                }
            }
        }
        ClientEvent::RoomClose {} => {
            // Rejected locally without involving the coordinator
            if !claim.is_admin {
                return Some(ServerEvent::Error {
                    message: "only the room admin can close the room".to_string(),
                });
            }
            match state
                .coordinator
                .close(&claim.room_id, &claim.user_id, claim.is_admin)
                .await
            {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!(room = %claim.room_id, "Close failed: {}", e);
                    Some(ServerEvent::Error {
                        message: e.to_string(),
                    })
                }
            }
        }
    }
}

/// Re-check room openness after registering. Admission and registration
/// are not covered by the room's sequencing lock, so a closure can land
/// between them; a registration that lost that race is rolled back here
/// and the connection still learns the room is gone. Returns whether the
/// connection may proceed.
pub async fn confirm_registration(
    state: &AppState,
    claim: &IdentityClaim,
    handle: &ConnectionHandle,
) -> Result<bool, StoreError> {
    if state.coordinator.is_open(&claim.room_id).await? {
        return Ok(true);
    }
    if state
        .presence
        .deregister(&claim.room_id, &claim.user_id, handle)
        .await
    {
        // The eviction sweep ran before this registration landed, so this
        // handle never got the closure notice. Queue it ourselves.
        tracing::info!(room = %claim.room_id, user = %claim.user_id, "Registration raced a closure; rolling back");
        handle.push(ServerEvent::RoomClosed {
            room_id: claim.room_id.clone(),
        });
        handle.shutdown();
    }
    Ok(false)
}

/// Announce a newly registered member to the room's *other* members.
pub async fn broadcast_joined(state: &AppState, claim: &IdentityClaim) {
    for (member_id, handle) in state.presence.members_of(&claim.room_id).await {
        if member_id != claim.user_id {
            handle.push(ServerEvent::UserJoined {
                user_id: claim.user_id.clone(),
            });
        }
    }
}

/// Deregister on any exit path. `user.left` is only broadcast when this
/// connection actually held the registry entry; a superseded handle leaves
/// silently because the user is still present under its replacement.
pub async fn finish_connection(state: &AppState, claim: &IdentityClaim, handle: &ConnectionHandle) {
    let removed = state
        .presence
        .deregister(&claim.room_id, &claim.user_id, handle)
        .await;
    if removed {
        for (_, member) in state.presence.members_of(&claim.room_id).await {
            member.push(ServerEvent::UserLeft {
                user_id: claim.user_id.clone(),
            });
        }
    } else {
        tracing::debug!(room = %claim.room_id, user = %claim.user_id, "Deregister no-op (superseded)");
    }
}
