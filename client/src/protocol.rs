use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from client to server (must match the server protocol)
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

/// Messages sent from server to client (must match the server protocol)
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

/// Playback state sampled from the local player; the server stamps the
/// receive time before storing or relaying it
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
