use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use twofold_db::StoreError;
use twofold_types::events::{GatewayCommand, GatewayEvent};

use crate::Gateway;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one authenticated WebSocket connection until it closes.
///
/// The credential was already verified at the HTTP upgrade, so the
/// connection starts Authenticated: it is registered, bootstrap-joined to the
/// user's rooms, and then serves commands. No ready event is sent.
pub async fn handle_connection(
    socket: WebSocket,
    gateway: Gateway,
    user_id: Uuid,
    username: String,
) {
    let (mut sender, mut receiver) = socket.split();

    let (conn_id, mut events_rx) = gateway.dispatcher.register_connection(user_id);
    info!("{} ({}) connected to gateway as {}", username, user_id, conn_id);

    bootstrap_join(&gateway, conn_id, user_id).await;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode gateway event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "Heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let gateway_recv = gateway.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(text.as_str()) {
                    Ok(cmd) => handle_command(&gateway_recv, conn_id, user_id, cmd).await,
                    Err(e) => {
                        let raw = text.as_str();
                        let cut = raw.char_indices().nth(200).map_or(raw.len(), |(i, _)| i);
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            &raw[..cut]
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.dispatcher.unregister_connection(conn_id);
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Subscribe a fresh connection to every room its user is in.
/// A store failure is logged; the connection stays usable.
pub async fn bootstrap_join(gateway: &Gateway, conn_id: Uuid, user_id: Uuid) {
    let db = gateway.db.clone();
    let rooms = match tokio::task::spawn_blocking(move || db.list_rooms_for(user_id)).await {
        Ok(Ok(rooms)) => rooms,
        Ok(Err(e)) => {
            warn!("Bootstrap join for {} failed to list rooms: {}", user_id, e);
            return;
        }
        Err(e) => {
            warn!("Bootstrap join for {}: spawn_blocking join error: {}", user_id, e);
            return;
        }
    };

    let joined = rooms
        .iter()
        .filter(|room| gateway.dispatcher.join_room(conn_id, room.id))
        .count();
    if joined < rooms.len() {
        warn!(
            "{} bootstrap-joined only {} of {} rooms",
            user_id,
            joined,
            rooms.len()
        );
    } else {
        debug!("{} bootstrap-joined {} rooms", user_id, joined);
    }
}

pub async fn handle_command(
    gateway: &Gateway,
    conn_id: Uuid,
    user_id: Uuid,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::JoinRoom(room_id) => {
            join_room(gateway, conn_id, user_id, room_id).await
        }
        GatewayCommand::SendMessage { room_id, text } => {
            send_message(gateway, conn_id, user_id, room_id, text).await
        }
    }
}

async fn join_room(gateway: &Gateway, conn_id: Uuid, user_id: Uuid, room_id: Uuid) {
    let verdict = if gateway.policy.strict_membership {
        check_membership(gateway, user_id, room_id).await
    } else {
        // Legacy behaviour: any authenticated connection may listen to any room id.
        Ok(())
    };

    let verdict = verdict.and_then(|()| {
        if gateway.dispatcher.join_room(conn_id, room_id) {
            Ok(())
        } else {
            Err("subscription limit reached".to_string())
        }
    });

    match verdict {
        Ok(()) => debug!("{} joined room {}", user_id, room_id),
        Err(reason) => {
            warn!("{} refused join of room {}: {}", user_id, room_id, reason);
            gateway
                .dispatcher
                .send_to_connection(conn_id, GatewayEvent::JoinRejected { room_id, reason });
        }
    }
}

async fn check_membership(gateway: &Gateway, user_id: Uuid, room_id: Uuid) -> Result<(), String> {
    let db = gateway.db.clone();
    match tokio::task::spawn_blocking(move || db.get_room(room_id)).await {
        Ok(Ok(Some(room))) if room.has_participant(user_id) => Ok(()),
        Ok(Ok(Some(_))) => Err("not a participant of this room".to_string()),
        Ok(Ok(None)) => Err("room not found".to_string()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("internal error: {}", e)),
    }
}

/// Append then fan out. The broadcast happens inside the append's critical
/// section, so every subscriber sees a room's messages in append order.
async fn send_message(
    gateway: &Gateway,
    conn_id: Uuid,
    user_id: Uuid,
    room_id: Uuid,
    text: String,
) {
    let db = gateway.db.clone();
    let dispatcher = gateway.dispatcher.clone();
    let result = tokio::task::spawn_blocking(move || {
        db.append_message_then(room_id, user_id, &text, |message| {
            dispatcher.publish_to_room(room_id, GatewayEvent::MessageReceived(message.clone()));
        })
    })
    .await;

    let reason = match result {
        Ok(Ok(message)) => {
            debug!("{} sent {} to room {}", user_id, message.id, room_id);
            return;
        }
        Ok(Err(e @ StoreError::Internal(_))) => {
            warn!("{} send to room {} failed: {:#}", user_id, room_id, e);
            "internal error".to_string()
        }
        Ok(Err(e)) => {
            warn!("{} send to room {} rejected: {}", user_id, room_id, e);
            e.to_string()
        }
        Err(e) => {
            warn!(
                "{} send to room {}: spawn_blocking join error: {}",
                user_id, room_id, e
            );
            "internal error".to_string()
        }
    };

    // Silent by default: legacy clients treat sends as fire-and-forget.
    if gateway.policy.ack_send_failures {
        gateway
            .dispatcher
            .send_to_connection(conn_id, GatewayEvent::SendFailed { room_id, reason });
    }
}
