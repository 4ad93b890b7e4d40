use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::membership::{self, JoinOutcome, JoinPolicy, Role};
use crate::protocol::{ClientMessage, ServerMessage, UserProfile};
use crate::state::{RegistryError, RoomRegistry};
use crate::sync::unix_millis;

pub type ClientSender = mpsc::UnboundedSender<ServerMessage>;
pub type ClientSenders = Arc<RwLock<HashMap<Uuid, ClientSender>>>;

/// Everything a connection handler needs: the registry, the outbound sender
/// of every live connection, and the join admission policy.
#[derive(Clone)]
pub struct AppState {
    pub registry: RoomRegistry,
    pub senders: ClientSenders,
    pub policy: JoinPolicy,
}

impl AppState {
    pub fn new(policy: JoinPolicy) -> Self {
        Self {
            registry: RoomRegistry::new(),
            senders: Arc::new(RwLock::new(HashMap::new())),
            policy,
        }
    }
}

/// Bind a fresh connection identity: outbound channel plus registry session.
pub(crate) async fn register_connection(
    state: &AppState,
    conn_id: Uuid,
) -> mpsc::UnboundedReceiver<ServerMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    state.senders.write().await.insert(conn_id, tx);
    state.registry.add_session(conn_id);
    rx
}

/// Drive one WebSocket connection from upgrade to cleanup.
pub async fn handle_connection(socket: WebSocket, state: AppState) {
    let conn_id = Uuid::new_v4();
    let mut rx = register_connection(&state, conn_id).await;

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Forward queued server messages to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {}", e);
                    continue;
                }
            };

            if let Err(e) = ws_sender.send(WsMessage::Text(json)).await {
                tracing::error!("Failed to send message: {}", e);
                break;
            }
        }
    });

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => {
                handle_message(&text, conn_id, &state).await;
            }
            Ok(WsMessage::Close(_)) => {
                tracing::info!("Connection {} closing", conn_id);
                break;
            }
            Err(e) => {
                tracing::error!("WebSocket error on {}: {}", conn_id, e);
                break;
            }
            _ => {}
        }
    }

    cleanup_connection(&state, conn_id).await;
    send_task.abort();
}

/// Disconnection at any point unconditionally removes the participant from
/// every relevant set; survivors get a participant-left notice, and a room
/// that died with the connection needs none.
pub(crate) async fn cleanup_connection(state: &AppState, conn_id: Uuid) {
    state.senders.write().await.remove(&conn_id);
    if let Some(outcome) = state.registry.remove_session(conn_id) {
        if outcome.was_active && !outcome.room_deleted {
            broadcast_to_room(
                state,
                &outcome.room_id,
                Some(conn_id),
                ServerMessage::ParticipantLeft { conn_id },
            )
            .await;
        }
    }
}

/// Dispatch one inbound message. Malformed payloads are dropped without a
/// reply; they are transient glitches, not protocol errors.
pub(crate) async fn handle_message(text: &str, conn_id: Uuid, state: &AppState) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!("Dropping malformed message from {}: {}", conn_id, e);
            return;
        }
    };

    match msg {
        ClientMessage::CreateRoom {
            room_name,
            service,
            content_url,
            host_id,
            host_name,
            host_photo,
        } => {
            let host = UserProfile {
                user_id: host_id,
                user_name: host_name,
                user_photo: host_photo,
            };
            match state
                .registry
                .create_room(room_name, service, content_url, host)
            {
                Ok(room_id) => {
                    if let Err(e) = state.registry.attach_host(&room_id, conn_id) {
                        tracing::error!("Host attach to fresh room {} failed: {}", room_id, e);
                        return;
                    }
                    send_to(state, conn_id, ServerMessage::RoomCreated { room_id }).await;
                }
                Err(e) => {
                    send_to(
                        state,
                        conn_id,
                        ServerMessage::Error {
                            message: e.to_string(),
                        },
                    )
                    .await;
                }
            }
        }

        ClientMessage::JoinRoom {
            room_id,
            user_id,
            user_name,
            user_photo,
        } => {
            let profile = UserProfile {
                user_id,
                user_name,
                user_photo,
            };
            match membership::resolve_join(
                &state.registry,
                state.policy,
                &room_id,
                conn_id,
                profile.clone(),
            ) {
                JoinOutcome::Active { info, role } => {
                    send_to(state, conn_id, ServerMessage::RoomJoined(info)).await;
                    if role == Role::Follower {
                        broadcast_to_room(
                            state,
                            &room_id,
                            Some(conn_id),
                            ServerMessage::ParticipantJoined { conn_id },
                        )
                        .await;
                    }
                }
                JoinOutcome::Parked { host_conn } => {
                    send_to(state, conn_id, ServerMessage::JoinRequestPending).await;
                    if let Some(host_conn) = host_conn {
                        send_to(state, host_conn, ServerMessage::NewJoinRequest(profile)).await;
                    }
                }
                JoinOutcome::NotFound => {
                    send_to(state, conn_id, ServerMessage::RoomNotFound).await;
                }
            }
        }

        ClientMessage::AcceptJoinRequest { room_id, user_data } => {
            let Some(actor) = session_profile(state, conn_id) else {
                return;
            };
            match membership::accept(&state.registry, &room_id, &actor, &user_data.user_id) {
                Ok((requester, info)) => {
                    send_to(state, requester, ServerMessage::JoinRequestAccepted(info)).await;
                    broadcast_to_room(
                        state,
                        &room_id,
                        Some(requester),
                        ServerMessage::ParticipantJoined { conn_id: requester },
                    )
                    .await;
                }
                Err(e) => {
                    tracing::warn!("Accept from {} refused: {}", conn_id, e);
                }
            }
        }

        ClientMessage::RejectJoinRequest { room_id, user_data } => {
            let Some(actor) = session_profile(state, conn_id) else {
                return;
            };
            match membership::reject(&state.registry, &room_id, &actor, &user_data.user_id) {
                Ok(requester) => {
                    send_to(state, requester, ServerMessage::JoinRequestRejected).await;
                }
                Err(e) => {
                    tracing::warn!("Reject from {} refused: {}", conn_id, e);
                }
            }
        }

        ClientMessage::LeaveRoom => {
            if let Some(outcome) = state.registry.leave_current_room(conn_id) {
                if outcome.was_active && !outcome.room_deleted {
                    broadcast_to_room(
                        state,
                        &outcome.room_id,
                        Some(conn_id),
                        ServerMessage::ParticipantLeft { conn_id },
                    )
                    .await;
                }
            }
        }

        ClientMessage::VideoState {
            room_id,
            state: sample,
        } => {
            let Some(actor) = session_profile(state, conn_id) else {
                return;
            };
            // Only the host's player is authoritative
            if let Err(e) = membership::ensure_host(&state.registry, &room_id, &actor) {
                tracing::debug!("Dropping state push from {}: {}", conn_id, e);
                return;
            }
            let stamped = sample.stamped(unix_millis());
            match state.registry.update_video_state(&room_id, stamped.clone()) {
                Ok(()) => {
                    broadcast_to_room(
                        state,
                        &room_id,
                        Some(conn_id),
                        ServerMessage::VideoStateUpdate { state: stamped },
                    )
                    .await;
                }
                Err(e @ RegistryError::StaleUpdate { .. }) => {
                    tracing::debug!("Dropping {}", e);
                }
                Err(e) => {
                    tracing::debug!("Dropping state push for {}: {}", room_id, e);
                }
            }
        }

        ClientMessage::ChatMessage { room_id, message } => {
            // Relayed verbatim within the sender's own room; pending
            // requesters have no voice yet.
            let session = state.registry.session(conn_id);
            let active_here = session
                .as_ref()
                .map(|s| {
                    s.room_id.as_deref() == Some(room_id.as_str())
                        && matches!(s.role, Some(Role::Host) | Some(Role::Follower))
                })
                .unwrap_or(false);
            if !active_here {
                tracing::debug!("Dropping chat from {} outside room {}", conn_id, room_id);
                return;
            }
            broadcast_to_room(
                state,
                &room_id,
                Some(conn_id),
                ServerMessage::ChatMessage {
                    user_id: conn_id,
                    message,
                },
            )
            .await;
        }
    }
}

fn session_profile(state: &AppState, conn_id: Uuid) -> Option<UserProfile> {
    state.registry.session(conn_id).and_then(|s| s.profile)
}

async fn send_to(state: &AppState, conn_id: Uuid, msg: ServerMessage) {
    if let Some(tx) = state.senders.read().await.get(&conn_id) {
        let _ = tx.send(msg);
    }
}

async fn broadcast_to_room(
    state: &AppState,
    room_id: &str,
    except: Option<Uuid>,
    msg: ServerMessage,
) {
    let members = state.registry.participants(room_id);
    fan_out(&state.senders, &members, except, msg).await;
}

/// Queue a message to a set of connections, skipping `except`.
pub(crate) async fn fan_out(
    senders: &ClientSenders,
    targets: &[Uuid],
    except: Option<Uuid>,
    msg: ServerMessage,
) {
    let senders = senders.read().await;
    for conn_id in targets {
        if Some(*conn_id) == except {
            continue;
        }
        if let Some(tx) = senders.get(conn_id) {
            let _ = tx.send(msg.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{StateSample, StreamingService};
    use tokio::sync::mpsc::UnboundedReceiver;

    async fn connect(state: &AppState) -> (Uuid, UnboundedReceiver<ServerMessage>) {
        let conn_id = Uuid::new_v4();
        let rx = register_connection(state, conn_id).await;
        (conn_id, rx)
    }

    async fn send(state: &AppState, conn_id: Uuid, msg: ClientMessage) {
        let text = serde_json::to_string(&msg).unwrap();
        handle_message(&text, conn_id, state).await;
    }

    fn create_room_msg(host_id: &str) -> ClientMessage {
        ClientMessage::CreateRoom {
            room_name: "movie night".to_string(),
            service: StreamingService::Youtube,
            content_url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            host_id: host_id.to_string(),
            host_name: "Host".to_string(),
            host_photo: None,
        }
    }

    fn join_room_msg(room_id: &str, user_id: &str) -> ClientMessage {
        ClientMessage::JoinRoom {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            user_name: format!("{} name", user_id),
            user_photo: None,
        }
    }

    fn sample(current_time: f64, is_playing: bool) -> StateSample {
        StateSample {
            current_time,
            is_playing,
            playback_rate: 1.0,
            video_id: None,
        }
    }

    async fn created_room_id(rx: &mut UnboundedReceiver<ServerMessage>) -> String {
        match rx.recv().await.unwrap() {
            ServerMessage::RoomCreated { room_id } => room_id,
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_host_state_reaches_later_joiner() {
        let state = AppState::new(JoinPolicy::Auto);
        let (host, mut host_rx) = connect(&state).await;
        let (guest, mut guest_rx) = connect(&state).await;

        send(&state, host, create_room_msg("host-uid")).await;
        let room_id = created_room_id(&mut host_rx).await;

        send(
            &state,
            host,
            ClientMessage::VideoState {
                room_id: room_id.clone(),
                state: sample(0.0, true),
            },
        )
        .await;

        send(&state, guest, join_room_msg(&room_id, "guest-uid")).await;
        match guest_rx.recv().await.unwrap() {
            ServerMessage::RoomJoined(info) => {
                assert_eq!(info.room_name, "movie night");
                assert_eq!(info.host_id, "host-uid");
                assert_eq!(info.video_state.current_time, 0.0);
                assert!(info.video_state.is_playing);
                assert!(info.video_state.timestamp > 0);
            }
            other => panic!("unexpected message: {:?}", other),
        }

        // The host hears about the new participant
        match host_rx.recv().await.unwrap() {
            ServerMessage::ParticipantJoined { conn_id } => assert_eq!(conn_id, guest),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_gated_join_goes_through_host_approval() {
        let state = AppState::new(JoinPolicy::Gated);
        let (host, mut host_rx) = connect(&state).await;
        let (guest, mut guest_rx) = connect(&state).await;

        send(&state, host, create_room_msg("host-uid")).await;
        let room_id = created_room_id(&mut host_rx).await;

        send(&state, guest, join_room_msg(&room_id, "guest-uid")).await;
        assert!(matches!(
            guest_rx.recv().await.unwrap(),
            ServerMessage::JoinRequestPending
        ));
        let requester = match host_rx.recv().await.unwrap() {
            ServerMessage::NewJoinRequest(profile) => profile,
            other => panic!("unexpected message: {:?}", other),
        };
        assert_eq!(requester.user_id, "guest-uid");

        send(
            &state,
            host,
            ClientMessage::AcceptJoinRequest {
                room_id: room_id.clone(),
                user_data: requester,
            },
        )
        .await;
        match guest_rx.recv().await.unwrap() {
            ServerMessage::JoinRequestAccepted(info) => {
                assert_eq!(info.room_name, "movie night");
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(
            state.registry.session(guest).unwrap().role,
            Some(Role::Follower)
        );
    }

    #[tokio::test]
    async fn test_gated_reject_notifies_requester() {
        let state = AppState::new(JoinPolicy::Gated);
        let (host, mut host_rx) = connect(&state).await;
        let (guest, mut guest_rx) = connect(&state).await;

        send(&state, host, create_room_msg("host-uid")).await;
        let room_id = created_room_id(&mut host_rx).await;

        send(&state, guest, join_room_msg(&room_id, "guest-uid")).await;
        guest_rx.recv().await.unwrap(); // join-request-pending
        let requester = match host_rx.recv().await.unwrap() {
            ServerMessage::NewJoinRequest(profile) => profile,
            other => panic!("unexpected message: {:?}", other),
        };

        send(
            &state,
            host,
            ClientMessage::RejectJoinRequest {
                room_id: room_id.clone(),
                user_data: requester,
            },
        )
        .await;
        assert!(matches!(
            guest_rx.recv().await.unwrap(),
            ServerMessage::JoinRequestRejected
        ));
        assert_eq!(state.registry.session(guest).unwrap().room_id, None);
    }

    #[tokio::test]
    async fn test_room_vanishes_after_last_participant_leaves() {
        let state = AppState::new(JoinPolicy::Auto);
        let (host, mut host_rx) = connect(&state).await;

        send(&state, host, create_room_msg("host-uid")).await;
        let room_id = created_room_id(&mut host_rx).await;

        send(&state, host, ClientMessage::LeaveRoom).await;
        assert!(state.registry.room_info(&room_id).is_none());

        let (guest, mut guest_rx) = connect(&state).await;
        send(&state, guest, join_room_msg(&room_id, "guest-uid")).await;
        assert!(matches!(
            guest_rx.recv().await.unwrap(),
            ServerMessage::RoomNotFound
        ));
    }

    #[tokio::test]
    async fn test_state_push_from_follower_is_refused() {
        let state = AppState::new(JoinPolicy::Auto);
        let (host, mut host_rx) = connect(&state).await;
        let (guest, mut guest_rx) = connect(&state).await;

        send(&state, host, create_room_msg("host-uid")).await;
        let room_id = created_room_id(&mut host_rx).await;
        send(&state, guest, join_room_msg(&room_id, "guest-uid")).await;
        guest_rx.recv().await.unwrap(); // room-joined
        host_rx.recv().await.unwrap(); // participant-joined

        send(
            &state,
            guest,
            ClientMessage::VideoState {
                room_id: room_id.clone(),
                state: sample(99.0, true),
            },
        )
        .await;

        assert!(host_rx.try_recv().is_err());
        let info = state.registry.room_info(&room_id).unwrap();
        assert_eq!(info.video_state.current_time, 0.0);
    }

    #[tokio::test]
    async fn test_chat_relays_to_room_minus_sender() {
        let state = AppState::new(JoinPolicy::Auto);
        let (host, mut host_rx) = connect(&state).await;
        let (guest, mut guest_rx) = connect(&state).await;

        send(&state, host, create_room_msg("host-uid")).await;
        let room_id = created_room_id(&mut host_rx).await;
        send(&state, guest, join_room_msg(&room_id, "guest-uid")).await;
        guest_rx.recv().await.unwrap(); // room-joined
        host_rx.recv().await.unwrap(); // participant-joined

        send(
            &state,
            guest,
            ClientMessage::ChatMessage {
                room_id: room_id.clone(),
                message: "hello".to_string(),
            },
        )
        .await;

        match host_rx.recv().await.unwrap() {
            ServerMessage::ChatMessage { user_id, message } => {
                assert_eq!(user_id, guest);
                assert_eq!(message, "hello");
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(guest_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_notifies_survivors() {
        let state = AppState::new(JoinPolicy::Auto);
        let (host, mut host_rx) = connect(&state).await;
        let (guest, mut guest_rx) = connect(&state).await;

        send(&state, host, create_room_msg("host-uid")).await;
        let room_id = created_room_id(&mut host_rx).await;
        send(&state, guest, join_room_msg(&room_id, "guest-uid")).await;
        guest_rx.recv().await.unwrap(); // room-joined
        host_rx.recv().await.unwrap(); // participant-joined

        cleanup_connection(&state, guest).await;

        match host_rx.recv().await.unwrap() {
            ServerMessage::ParticipantLeft { conn_id } => assert_eq!(conn_id, guest),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(state.registry.room_info(&room_id).is_some());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped_silently() {
        let state = AppState::new(JoinPolicy::Auto);
        let (host, mut host_rx) = connect(&state).await;

        handle_message("{not json", host, &state).await;
        handle_message(
            r#"{"type":"video-state","payload":{"roomId":"x","state":{"currentTime":1.0}}}"#,
            host,
            &state,
        )
        .await;

        assert!(host_rx.try_recv().is_err());
    }
}
