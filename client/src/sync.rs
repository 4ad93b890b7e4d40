use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::{
    sync::{mpsc, oneshot},
    time::sleep,
};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use uuid::Uuid;

use crate::constants::{
    KEEPALIVE_INTERVAL, RECONNECT_BASE_DELAY, RECONNECT_MAX_ATTEMPTS, RECONNECT_MAX_DELAY,
};
use crate::protocol::{ClientMessage, ServerMessage, StateSample, StreamingService, UserProfile};

/// WebSocket transport to the coordinating server. Connection state lives
/// behind an Arc so send handles stay cheap to clone into tasks.
pub struct SyncClient {
    inner: Arc<SyncClientState>,
}

struct SyncClientState {
    tx: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
    stats: Mutex<SyncStats>,
}

#[derive(Default)]
struct SyncStats {
    bytes_out: u64,
    bytes_in: u64,
    messages_out: u64,
    messages_in: u64,
    last_ping_sent: Option<Instant>,
    last_ping_nonce: Option<u64>,
    last_rtt_ms: Option<f32>,
    reconnect_attempts: u32,
    connected_since: Option<Instant>,
}

pub struct SyncStatsSnapshot {
    pub bytes_out: u64,
    pub bytes_in: u64,
    pub messages_out: u64,
    pub messages_in: u64,
    pub last_rtt_ms: Option<f32>,
    pub connected_duration: Option<f32>,
    pub reconnect_attempts: u32,
}

impl Default for SyncClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncClient {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SyncClientState {
                tx: Mutex::new(None),
                stats: Mutex::new(SyncStats::default()),
            }),
        }
    }

    /// Connect to the sync server. Returns a receiver that resolves when the
    /// socket closes.
    pub async fn connect<F>(&self, server_url: &str, on_message: F) -> Result<oneshot::Receiver<()>>
    where
        F: Fn(ServerMessage) + Send + Sync + 'static,
    {
        let (ws_stream, _) = connect_async(server_url)
            .await
            .context("Failed to connect to server")?;

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        *self.inner.tx.lock() = Some(tx.clone());
        self.inner.mark_connected();

        let (disconnect_tx, disconnect_rx) = oneshot::channel();
        let disconnect_signal = Arc::new(Mutex::new(Some(disconnect_tx)));

        // Sender task
        let send_inner = Arc::clone(&self.inner);
        let send_signal = Arc::clone(&disconnect_signal);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if ws_sender.send(msg).await.is_err() {
                    break;
                }
            }
            send_inner.clear_transport();
            if let Some(tx) = send_signal.lock().take() {
                let _ = tx.send(());
            }
        });

        let handler = Arc::new(on_message);
        let recv_inner = Arc::clone(&self.inner);
        let recv_signal = Arc::clone(&disconnect_signal);
        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        recv_inner.record_incoming(text.len() as u64);
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(parsed) => handler(parsed),
                            // Transient glitch, not worth a correction attempt
                            Err(e) => tracing::debug!("Dropping malformed message: {}", e),
                        }
                    }
                    Ok(WsMessage::Pong(payload)) => {
                        recv_inner.handle_ws_pong(&payload);
                    }
                    Ok(WsMessage::Close(_)) => break,
                    Err(_) => break,
                    _ => {}
                }
            }
            recv_inner.clear_transport();
            if let Some(tx) = recv_signal.lock().take() {
                let _ = tx.send(());
            }
        });

        // Keep-alive pings
        let ping_inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                sleep(KEEPALIVE_INTERVAL).await;
                if ping_inner.send_keepalive().is_err() {
                    break;
                }
            }
        });

        Ok(disconnect_rx)
    }

    /// Connect with bounded retries and capped exponential backoff.
    /// Exhaustion is fatal: the caller surfaces a connection-lost state and
    /// the participant re-joins manually.
    pub async fn connect_with_backoff<F>(
        &self,
        server_url: &str,
        on_message: F,
    ) -> Result<oneshot::Receiver<()>>
    where
        F: Fn(ServerMessage) + Send + Sync + 'static,
    {
        let handler = Arc::new(on_message);
        let mut attempt: u32 = 0;
        loop {
            let handler = Arc::clone(&handler);
            match self.connect(server_url, move |msg| handler(msg)).await {
                Ok(disconnect_rx) => return Ok(disconnect_rx),
                Err(e) => {
                    attempt += 1;
                    self.inner.mark_disconnected();
                    if attempt >= RECONNECT_MAX_ATTEMPTS {
                        return Err(e.context(format!(
                            "Connection lost after {} attempts",
                            attempt
                        )));
                    }
                    let delay = backoff_delay(attempt);
                    tracing::warn!(
                        "Connect attempt {} to {} failed ({}); retrying in {:?}",
                        attempt,
                        server_url,
                        e,
                        delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    pub fn stats_snapshot(&self) -> SyncStatsSnapshot {
        self.inner.snapshot()
    }

    /// Create a new room, becoming its host
    pub fn create_room(
        &self,
        room_name: String,
        service: StreamingService,
        content_url: String,
        host: UserProfile,
    ) -> Result<()> {
        self.send_message(ClientMessage::CreateRoom {
            room_name,
            service,
            content_url,
            host_id: host.user_id,
            host_name: host.user_name,
            host_photo: host.user_photo,
        })
    }

    /// Request to join an existing room
    pub fn join_room(&self, room_id: String, user: UserProfile) -> Result<()> {
        self.send_message(ClientMessage::JoinRoom {
            room_id,
            user_id: user.user_id,
            user_name: user.user_name,
            user_photo: user.user_photo,
        })
    }

    /// Approve a pending join request (host only)
    pub fn accept_join_request(&self, room_id: String, user_data: UserProfile) -> Result<()> {
        self.send_message(ClientMessage::AcceptJoinRequest { room_id, user_data })
    }

    /// Turn down a pending join request (host only)
    pub fn reject_join_request(&self, room_id: String, user_data: UserProfile) -> Result<()> {
        self.send_message(ClientMessage::RejectJoinRequest { room_id, user_data })
    }

    /// Leave the current room
    pub fn leave_room(&self) -> Result<()> {
        self.send_message(ClientMessage::LeaveRoom)
    }

    /// Push an authoritative playback state (host only)
    pub fn send_video_state(&self, room_id: String, state: StateSample) -> Result<()> {
        self.send_message(ClientMessage::VideoState { room_id, state })
    }

    /// Send a chat line to the rest of the room
    pub fn send_chat(&self, room_id: String, message: String) -> Result<()> {
        self.send_message(ClientMessage::ChatMessage { room_id, message })
    }

    fn send_message(&self, msg: ClientMessage) -> Result<()> {
        let json = serde_json::to_string(&msg).context("Failed to serialize message")?;
        self.inner.record_outgoing(json.len() as u64);
        if let Some(tx) = self.inner.tx.lock().clone() {
            tx.send(WsMessage::Text(json.into()))
                .context("Failed to queue message to socket")?;
        }
        Ok(())
    }
}

impl SyncClientState {
    fn record_outgoing(&self, bytes: u64) {
        let mut stats = self.stats.lock();
        stats.bytes_out += bytes;
        stats.messages_out += 1;
    }

    fn record_incoming(&self, bytes: u64) {
        let mut stats = self.stats.lock();
        stats.bytes_in += bytes;
        stats.messages_in += 1;
    }

    fn handle_ws_pong(&self, payload: &[u8]) {
        self.record_incoming(payload.len() as u64);
        if payload.len() < 8 {
            return;
        }
        let mut nonce_bytes = [0u8; 8];
        nonce_bytes.copy_from_slice(&payload[..8]);
        let nonce = u64::from_le_bytes(nonce_bytes);

        let mut stats = self.stats.lock();
        if stats.last_ping_nonce == Some(nonce) {
            if let Some(sent) = stats.last_ping_sent {
                stats.last_rtt_ms = Some(sent.elapsed().as_secs_f32() * 1000.0);
            }
            stats.last_ping_nonce = None;
            stats.last_ping_sent = None;
        }
    }

    fn send_keepalive(&self) -> Result<(), ()> {
        let nonce = Uuid::new_v4().as_u128() as u64;
        {
            let mut stats = self.stats.lock();
            stats.last_ping_nonce = Some(nonce);
            stats.last_ping_sent = Some(Instant::now());
        }

        let payload = nonce.to_le_bytes().to_vec();
        self.record_outgoing(payload.len() as u64);
        if let Some(tx) = self.tx.lock().clone() {
            tx.send(WsMessage::Ping(payload.into())).map_err(|_| ())
        } else {
            Err(())
        }
    }

    fn clear_transport(&self) {
        *self.tx.lock() = None;
        let mut stats = self.stats.lock();
        stats.last_ping_nonce = None;
        stats.last_ping_sent = None;
        stats.connected_since = None;
    }

    fn mark_connected(&self) {
        self.stats.lock().connected_since = Some(Instant::now());
    }

    fn mark_disconnected(&self) {
        let mut stats = self.stats.lock();
        stats.connected_since = None;
        stats.reconnect_attempts += 1;
    }

    fn snapshot(&self) -> SyncStatsSnapshot {
        let stats = self.stats.lock();
        SyncStatsSnapshot {
            bytes_out: stats.bytes_out,
            bytes_in: stats.bytes_in,
            messages_out: stats.messages_out,
            messages_in: stats.messages_in,
            last_rtt_ms: stats.last_rtt_ms,
            connected_duration: stats
                .connected_since
                .map(|inst| inst.elapsed().as_secs_f32()),
            reconnect_attempts: stats.reconnect_attempts,
        }
    }
}

/// Delay before the given (1-based) reconnect attempt: doubling from the base
/// delay, capped.
pub fn backoff_delay(attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(6);
    let delay = RECONNECT_BASE_DELAY * 2u32.pow(shift);
    delay.min(RECONNECT_MAX_DELAY)
}

/// Milliseconds since the unix epoch
pub(crate) fn unix_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}
