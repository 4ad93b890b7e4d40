use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::membership::Role;
use crate::protocol::{
    PendingJoin, Room, RoomInfo, SessionInfo, StreamingService, UserProfile, VideoState,
};
use crate::youtube;

const LOG_TAG: &str = "[Lockstep Server]";
const ROOM_ID_LEN: usize = 6;
const ROOM_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
/// A fresh id clashing with a live room is astronomically unlikely; a couple
/// of retries before giving up keeps create_room total.
const CREATE_ATTEMPTS: usize = 4;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RegistryError {
    #[error("room not found")]
    RoomNotFound,
    #[error("could not allocate a unique room id")]
    IdCollision,
    #[error("stale video state: timestamp {submitted} is not newer than {stored}")]
    StaleUpdate { stored: u64, submitted: u64 },
    #[error("a join request for this user is already pending")]
    DuplicateRequest,
    #[error("no pending join request for this user")]
    NoSuchRequest,
}

/// What happened to the room when a connection left it
#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    pub room_id: String,
    /// The connection was an active participant (not merely pending)
    pub was_active: bool,
    pub room_deleted: bool,
}

/// A room due for a periodic sync-check broadcast
#[derive(Debug, Clone)]
pub struct SyncTarget {
    pub participants: Vec<Uuid>,
    pub current_time: f64,
}

/// Shared registry of rooms and connection sessions. The single source of
/// truth: every mutation of one room happens under that room's map entry
/// guard, so readers never observe a half-applied change.
#[derive(Clone)]
pub struct RoomRegistry {
    /// All live rooms: room_id -> Room
    rooms: Arc<DashMap<String, Room>>,
    /// All connected sessions: conn_id -> SessionInfo
    sessions: Arc<DashMap<Uuid, SessionInfo>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn add_session(&self, conn_id: Uuid) {
        self.sessions.insert(conn_id, SessionInfo::default());
        tracing::info!("{LOG_TAG} Connection {} registered", conn_id);
    }

    pub fn session(&self, conn_id: Uuid) -> Option<SessionInfo> {
        self.sessions.get(&conn_id).map(|s| s.clone())
    }

    /// Drop a session entirely, cascading room cleanup. Used on disconnect.
    pub fn remove_session(&self, conn_id: Uuid) -> Option<LeaveOutcome> {
        let outcome = self.leave_current_room(conn_id);
        self.sessions.remove(&conn_id);
        tracing::info!("{LOG_TAG} Connection {} removed", conn_id);
        outcome
    }

    /// Detach a session from whatever room it is in, keeping the session
    /// alive. Used for an explicit leave-room.
    pub fn leave_current_room(&self, conn_id: Uuid) -> Option<LeaveOutcome> {
        let room_id = self
            .sessions
            .get(&conn_id)
            .and_then(|s| s.room_id.clone())?;
        let outcome = self.remove_participant(&room_id, conn_id)?;

        if let Some(mut session) = self.sessions.get_mut(&conn_id) {
            session.room_id = None;
            session.role = None;
        }
        Some(outcome)
    }

    /// Create a room with zero participants. The host's own connection
    /// attaches separately via `attach_host`.
    pub fn create_room(
        &self,
        name: String,
        service: StreamingService,
        content_url: String,
        host: UserProfile,
    ) -> Result<String, RegistryError> {
        let video_id = match service {
            StreamingService::Youtube => youtube::extract_video_id(&content_url),
            _ => None,
        };

        for _ in 0..CREATE_ATTEMPTS {
            let room_id = generate_room_id();
            if self.rooms.contains_key(&room_id) {
                continue;
            }
            let room = Room {
                name: name.clone(),
                service,
                content_url: content_url.clone(),
                host: host.clone(),
                host_conn: None,
                participants: HashSet::new(),
                pending: Vec::new(),
                video_state: VideoState::initial(video_id.clone()),
            };
            self.rooms.insert(room_id.clone(), room);
            tracing::info!(
                "{LOG_TAG} Room {} ({}) created by {}",
                room_id,
                name,
                host.user_name
            );
            return Ok(room_id);
        }
        Err(RegistryError::IdCollision)
    }

    pub fn room_info(&self, room_id: &str) -> Option<RoomInfo> {
        self.rooms.get(room_id).map(|room| room.info())
    }

    /// Attach the host's own connection as an active participant.
    pub fn attach_host(&self, room_id: &str, conn_id: Uuid) -> Result<RoomInfo, RegistryError> {
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or(RegistryError::RoomNotFound)?;
        room.participants.insert(conn_id);
        room.host_conn = Some(conn_id);
        let info = room.info();
        let profile = room.host.clone();
        drop(room);

        self.bind_session(conn_id, room_id, profile, Role::Host);
        Ok(info)
    }

    /// Move a connection into the active participant set.
    pub fn add_participant(
        &self,
        room_id: &str,
        conn_id: Uuid,
        profile: UserProfile,
    ) -> Result<RoomInfo, RegistryError> {
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or(RegistryError::RoomNotFound)?;
        // A participant is in exactly one of participants/pending.
        room.pending.retain(|p| p.profile.user_id != profile.user_id);
        room.participants.insert(conn_id);
        let info = room.info();
        drop(room);

        self.bind_session(conn_id, room_id, profile, Role::Follower);
        Ok(info)
    }

    /// Park a join request for the host to decide on. Returns the host's
    /// connection, if attached, so the caller can notify it.
    pub fn push_pending(
        &self,
        room_id: &str,
        conn_id: Uuid,
        profile: UserProfile,
    ) -> Result<Option<Uuid>, RegistryError> {
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or(RegistryError::RoomNotFound)?;
        // The host is never parked in pending, and a user requests at most once.
        if room.host.user_id == profile.user_id
            || room.pending.iter().any(|p| p.profile.user_id == profile.user_id)
        {
            return Err(RegistryError::DuplicateRequest);
        }
        room.pending.push(PendingJoin {
            conn_id,
            profile: profile.clone(),
        });
        let host_conn = room.host_conn;
        drop(room);

        self.bind_session(conn_id, room_id, profile, Role::Pending);
        Ok(host_conn)
    }

    /// Remove and return the pending request for `user_id`, in either decision.
    pub fn take_pending(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<PendingJoin, RegistryError> {
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or(RegistryError::RoomNotFound)?;
        let index = room
            .pending
            .iter()
            .position(|p| p.profile.user_id == user_id)
            .ok_or(RegistryError::NoSuchRequest)?;
        Ok(room.pending.remove(index))
    }

    /// Replace a room's video state wholesale. Updates whose timestamp is not
    /// strictly newer than the stored one are rejected, so out-of-order
    /// delivery can never rewind the authoritative state.
    pub fn update_video_state(
        &self,
        room_id: &str,
        state: VideoState,
    ) -> Result<(), RegistryError> {
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or(RegistryError::RoomNotFound)?;
        if state.timestamp <= room.video_state.timestamp {
            return Err(RegistryError::StaleUpdate {
                stored: room.video_state.timestamp,
                submitted: state.timestamp,
            });
        }
        room.video_state = state;
        Ok(())
    }

    /// Remove a connection from a room's sets. The room is reclaimed the
    /// moment its active participant set empties; a pending-only departure
    /// never tears the room down.
    pub fn remove_participant(&self, room_id: &str, conn_id: Uuid) -> Option<LeaveOutcome> {
        let mut room = self.rooms.get_mut(room_id)?;
        room.pending.retain(|p| p.conn_id != conn_id);
        let was_active = room.participants.remove(&conn_id);
        if room.host_conn == Some(conn_id) {
            room.host_conn = None;
        }
        let room_deleted = was_active && room.participants.is_empty();
        drop(room);

        if room_deleted {
            self.rooms.remove(room_id);
            tracing::info!("{LOG_TAG} Room {} deleted (empty)", room_id);
        }
        Some(LeaveOutcome {
            room_id: room_id.to_string(),
            was_active,
            room_deleted,
        })
    }

    /// The single authority check consulted by every privileged operation.
    pub fn is_host(&self, room_id: &str, user_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .map(|room| room.host.user_id == user_id)
            .unwrap_or(false)
    }

    pub fn participants(&self, room_id: &str) -> Vec<Uuid> {
        self.rooms
            .get(room_id)
            .map(|room| room.participants.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Rooms currently playing, snapshotted for the periodic sync-check loop.
    pub fn sync_targets(&self) -> Vec<SyncTarget> {
        self.rooms
            .iter()
            .filter(|entry| entry.video_state.is_playing)
            .map(|entry| SyncTarget {
                participants: entry.participants.iter().copied().collect(),
                current_time: entry.video_state.current_time,
            })
            .collect()
    }

    /// Detach a session from its room without touching the room itself.
    /// Used when a pending request reaches a terminal state.
    pub fn unbind_session(&self, conn_id: Uuid) {
        if let Some(mut session) = self.sessions.get_mut(&conn_id) {
            session.room_id = None;
            session.role = None;
        }
    }

    fn bind_session(&self, conn_id: Uuid, room_id: &str, profile: UserProfile, role: Role) {
        if let Some(mut session) = self.sessions.get_mut(&conn_id) {
            session.room_id = Some(room_id.to_string());
            session.profile = Some(profile);
            session.role = Some(role);
        } else {
            self.sessions.insert(
                conn_id,
                SessionInfo {
                    room_id: Some(room_id.to_string()),
                    profile: Some(profile),
                    role: Some(role),
                },
            );
        }
    }

    #[cfg(test)]
    fn room(&self, room_id: &str) -> Option<Room> {
        self.rooms.get(room_id).map(|r| r.clone())
    }
}

fn generate_room_id() -> String {
    let mut raw = Uuid::new_v4().as_u128();
    let mut code = String::with_capacity(ROOM_ID_LEN);
    for _ in 0..ROOM_ID_LEN {
        code.push(ROOM_ID_ALPHABET[(raw % 36) as usize] as char);
        raw /= 36;
    }
    code
}
