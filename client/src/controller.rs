use anyhow::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::latency::{adjusted_target, LatencyEstimator};
use crate::player::Player;
use crate::protocol::{RoomInfo, ServerMessage, StateSample, StreamingService, UserProfile, VideoState};
use crate::sync::{unix_millis, SyncClient};
use crate::youtube;

/// Followers seek only when drift exceeds this many seconds. Tight enough to
/// feel together, loose enough to avoid seek-storms from network jitter.
/// A tunable, not a protocol requirement.
pub const DRIFT_THRESHOLD_SECS: f64 = 0.3;

/// Per-participant playback coordination: relays the host's player
/// transitions to the server, and steers a follower's player toward the
/// authoritative state carried by pushes and sync-checks.
pub struct RoomController<P> {
    player: Arc<P>,
    sync: Arc<SyncClient>,
    profile: UserProfile,
    state: Mutex<ControllerState>,
    /// A correction runs to completion before the next may start;
    /// overlapping triggers are dropped, never queued.
    correcting: AtomicBool,
}

#[derive(Default)]
struct ControllerState {
    room_id: Option<String>,
    /// Room id we asked to join, adopted when the snapshot arrives
    requested_room: Option<String>,
    is_host: bool,
    video_id: Option<String>,
    latency: LatencyEstimator,
}

impl<P: Player> RoomController<P> {
    pub fn new(player: Arc<P>, sync: Arc<SyncClient>, profile: UserProfile) -> Self {
        Self {
            player,
            sync,
            profile,
            state: Mutex::new(ControllerState::default()),
            correcting: AtomicBool::new(false),
        }
    }

    /// Ask the server for a new room hosted by this participant.
    pub fn create_room(
        &self,
        room_name: String,
        service: StreamingService,
        content_url: String,
    ) -> Result<()> {
        if service == StreamingService::Youtube {
            self.state.lock().video_id = youtube::extract_video_id(&content_url);
        }
        self.sync
            .create_room(room_name, service, content_url, self.profile.clone())
    }

    /// Request to join an existing room.
    pub fn join_room(&self, room_id: String) -> Result<()> {
        self.state.lock().requested_room = Some(room_id.clone());
        self.sync.join_room(room_id, self.profile.clone())
    }

    /// Feed every inbound server message through here. Membership and chat
    /// notices are the embedder's concern; only playback and room-entry
    /// messages act on the player.
    pub fn handle_server_message(&self, msg: &ServerMessage) {
        match msg {
            ServerMessage::RoomCreated { room_id } => {
                let mut state = self.state.lock();
                state.room_id = Some(room_id.clone());
                state.is_host = true;
            }
            ServerMessage::RoomJoined(info) | ServerMessage::JoinRequestAccepted(info) => {
                let requested = self.state.lock().requested_room.take();
                match requested {
                    Some(room_id) => self.enter_room(&room_id, info),
                    None => tracing::warn!("Room snapshot arrived without a pending join"),
                }
            }
            ServerMessage::RoomNotFound | ServerMessage::JoinRequestRejected => {
                // Terminal join outcomes; a later attempt starts fresh
                self.state.lock().requested_room = None;
            }
            ServerMessage::VideoStateUpdate { state } => {
                self.apply_state_update(state, unix_millis());
            }
            ServerMessage::SyncCheck {
                timestamp,
                current_time,
            } => {
                self.apply_sync_check(*timestamp, *current_time, unix_millis());
            }
            _ => {}
        }
    }

    pub fn room_id(&self) -> Option<String> {
        self.state.lock().room_id.clone()
    }

    pub fn is_host(&self) -> bool {
        self.state.lock().is_host
    }

    /// Smoothed one-way latency estimate, for diagnostics
    pub fn smoothed_latency_ms(&self) -> Option<f64> {
        self.state.lock().latency.smoothed_ms()
    }

    /// Adopt a room snapshot and cold-start the local player from its
    /// current video state.
    pub fn enter_room(&self, room_id: &str, info: &RoomInfo) {
        let is_host = info.host_id == self.profile.user_id;
        {
            let mut state = self.state.lock();
            state.room_id = Some(room_id.to_string());
            state.is_host = is_host;
            state.video_id = info.video_state.video_id.clone();
        }
        if !is_host {
            self.cold_start(&info.video_state);
        }
    }

    /// Host-side push: call on every local play, pause, seek, or rate
    /// transition. Samples the player and sends the new authoritative state.
    /// No-ops for followers and while the player is still loading.
    pub fn publish_state(&self) -> Result<()> {
        let (room_id, video_id) = {
            let state = self.state.lock();
            if !state.is_host {
                return Ok(());
            }
            match state.room_id.clone() {
                Some(room_id) => (room_id, state.video_id.clone()),
                None => return Ok(()),
            }
        };
        let Some(current_time) = self.player.position() else {
            return Ok(());
        };
        let sample = StateSample {
            current_time,
            is_playing: self.player.is_playing(),
            playback_rate: self.player.playback_rate(),
            video_id,
        };
        self.sync.send_video_state(room_id, sample)
    }

    /// Full authoritative state arrived: steer position, play/pause state,
    /// and rate toward it.
    pub(crate) fn apply_state_update(&self, state: &VideoState, now_ms: u64) {
        if self.is_host() {
            // Hosts are never corrected by their own broadcasts
            return;
        }
        if self.player.position().is_none() {
            return;
        }
        let latency_ms = self.state.lock().latency.observe(state.timestamp, now_ms);
        let target = adjusted_target(state.current_time, latency_ms);
        self.correct_to(target, false);

        if state.is_playing && !self.player.is_playing() {
            self.player.play();
        } else if !state.is_playing && self.player.is_playing() {
            self.player.pause();
        }
        if self.player.playback_rate() != state.playback_rate {
            self.player.set_playback_rate(state.playback_rate);
        }
    }

    /// Periodic heartbeat arrived: force a resync only when drift against
    /// the latency-adjusted position is past the threshold.
    pub(crate) fn apply_sync_check(&self, timestamp: u64, current_time: f64, now_ms: u64) {
        if self.is_host() {
            return;
        }
        let Some(local) = self.player.position() else {
            return;
        };
        let latency_ms = self.state.lock().latency.observe(timestamp, now_ms);
        let target = adjusted_target(current_time, latency_ms);
        if (local - target).abs() > DRIFT_THRESHOLD_SECS {
            self.correct_to(target, true);
        }
    }

    fn cold_start(&self, video_state: &VideoState) {
        if self.player.position().is_none() {
            return;
        }
        self.player.seek(video_state.current_time);
        if video_state.is_playing {
            self.player.play();
        } else {
            self.player.pause();
        }
        if self.player.playback_rate() != video_state.playback_rate {
            self.player.set_playback_rate(video_state.playback_rate);
        }
    }

    fn correct_to(&self, target: f64, force: bool) {
        if self.correcting.swap(true, Ordering::AcqRel) {
            tracing::debug!("Correction already in flight; dropping trigger");
            return;
        }
        if let Some(current) = self.player.position() {
            if force || (current - target).abs() > DRIFT_THRESHOLD_SECS {
                tracing::debug!("Syncing playback: {:.3} -> {:.3}", current, target);
                self.player.seek(target);
            }
        }
        self.correcting.store(false, Ordering::Release);
    }

    #[cfg(test)]
    fn force_correction_in_flight(&self, in_flight: bool) {
        self.correcting.store(in_flight, Ordering::Release);
    }
}
