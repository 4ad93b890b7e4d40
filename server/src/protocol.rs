use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    CreateRoom {
        room_name: String,
        service: StreamingService,
        content_url: String,
        host_id: String,
        host_name: String,
        host_photo: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: String,
        user_id: String,
        user_name: String,
        user_photo: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AcceptJoinRequest {
        room_id: String,
        user_data: UserProfile,
    },
    #[serde(rename_all = "camelCase")]
    RejectJoinRequest {
        room_id: String,
        user_data: UserProfile,
    },
    LeaveRoom,
    #[serde(rename_all = "camelCase")]
    VideoState {
        room_id: String,
        state: StateSample,
    },
    #[serde(rename_all = "camelCase")]
    ChatMessage { room_id: String, message: String },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    RoomCreated { room_id: String },
    RoomJoined(RoomInfo),
    RoomNotFound,
    JoinRequestPending,
    JoinRequestAccepted(RoomInfo),
    JoinRequestRejected,
    NewJoinRequest(UserProfile),
    #[serde(rename_all = "camelCase")]
    VideoStateUpdate { state: VideoState },
    #[serde(rename_all = "camelCase")]
    SyncCheck { timestamp: u64, current_time: f64 },
    #[serde(rename_all = "camelCase")]
    ChatMessage { user_id: Uuid, message: String },
    #[serde(rename_all = "camelCase")]
    ParticipantJoined { conn_id: Uuid },
    #[serde(rename_all = "camelCase")]
    ParticipantLeft { conn_id: Uuid },
    Error { message: String },
}

/// Supported content providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamingService {
    Youtube,
    Netflix,
    Prime,
    Disney,
    Hbomax,
}

/// Identity supplied by the login provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: String,
    pub user_name: String,
    pub user_photo: Option<String>,
}

/// Playback state as sampled by the host's player. The server stamps the
/// receive time before storing or relaying it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSample {
    pub current_time: f64,
    pub is_playing: bool,
    pub playback_rate: f64,
    pub video_id: Option<String>,
}

/// Authoritative playback state held per room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoState {
    pub current_time: f64,
    pub is_playing: bool,
    pub playback_rate: f64,
    pub video_id: Option<String>,
    /// Milliseconds since the unix epoch at which this state was sampled
    pub timestamp: u64,
}

impl VideoState {
    /// State a room starts with before the host touches the player
    pub fn initial(video_id: Option<String>) -> Self {
        Self {
            current_time: 0.0,
            is_playing: false,
            playback_rate: 1.0,
            video_id,
            timestamp: 0,
        }
    }
}

impl StateSample {
    pub fn stamped(self, timestamp: u64) -> VideoState {
        VideoState {
            current_time: self.current_time,
            is_playing: self.is_playing,
            playback_rate: self.playback_rate,
            video_id: self.video_id,
            timestamp,
        }
    }
}

/// Snapshot handed to a participant entering a room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_name: String,
    pub host_name: String,
    pub host_id: String,
    pub host_photo: Option<String>,
    pub service: StreamingService,
    pub content_url: String,
    pub video_state: VideoState,
}

/// Room state tracked by the server
#[derive(Debug, Clone)]
pub struct Room {
    pub name: String,
    pub service: StreamingService,
    pub content_url: String,
    pub host: UserProfile,
    /// Connection of the host's own session, once attached
    pub host_conn: Option<Uuid>,
    /// Connections currently active in the room
    pub participants: HashSet<Uuid>,
    /// Join requests awaiting the host's decision, in request order
    pub pending: Vec<PendingJoin>,
    pub video_state: VideoState,
}

impl Room {
    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            room_name: self.name.clone(),
            host_name: self.host.user_name.clone(),
            host_id: self.host.user_id.clone(),
            host_photo: self.host.user_photo.clone(),
            service: self.service,
            content_url: self.content_url.clone(),
            video_state: self.video_state.clone(),
        }
    }
}

/// A join request parked until the host accepts or rejects it
#[derive(Debug, Clone)]
pub struct PendingJoin {
    pub conn_id: Uuid,
    pub profile: UserProfile,
}

/// Connection metadata tracked per session
#[derive(Debug, Clone, Default)]
pub struct SessionInfo {
    pub room_id: Option<String>,
    pub profile: Option<UserProfile>,
    pub role: Option<crate::membership::Role>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_wire_format() {
        let json = r#"{
            "type": "video-state",
            "payload": {
                "roomId": "abc123",
                "state": {
                    "currentTime": 12.5,
                    "isPlaying": true,
                    "playbackRate": 1.0,
                    "videoId": "dQw4w9WgXcQ"
                }
            }
        }"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::VideoState { room_id, state } => {
                assert_eq!(room_id, "abc123");
                assert_eq!(state.current_time, 12.5);
                assert!(state.is_playing);
                assert_eq!(state.video_id.as_deref(), Some("dQw4w9WgXcQ"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_server_message_tags_are_kebab_case() {
        let msg = ServerMessage::SyncCheck {
            timestamp: 1000,
            current_time: 42.0,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"sync-check""#));
        assert!(json.contains(r#""currentTime":42.0"#));

        let msg = ServerMessage::RoomNotFound;
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"room-not-found""#));
    }

    #[test]
    fn test_malformed_state_fails_deserialization() {
        // isPlaying missing: the whole message must be rejected, not defaulted
        let json = r#"{
            "type": "video-state",
            "payload": {
                "roomId": "abc123",
                "state": { "currentTime": 3.0, "playbackRate": 1.0, "videoId": null }
            }
        }"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }

    #[test]
    fn test_service_tags_are_lowercase() {
        let service: StreamingService = serde_json::from_str(r#""hbomax""#).unwrap();
        assert_eq!(service, StreamingService::Hbomax);
        assert_eq!(
            serde_json::to_string(&StreamingService::Youtube).unwrap(),
            r#""youtube""#
        );
    }
}
