use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::protocol::ServerMessage;
use crate::session::{fan_out, AppState};

/// Cadence of the periodic reconciliation broadcast. Tight enough to catch
/// passive drift during uninterrupted playback, loose enough not to flood
/// idle rooms.
pub const SYNC_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Periodic reconciliation loop. Host pushes only fire on discrete
/// play/pause/seek transitions, so without this heartbeat followers would
/// drift silently during continuous playback.
pub async fn run_sync_check_loop(state: AppState) {
    let mut ticker = tokio::time::interval(SYNC_CHECK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        emit_sync_checks(&state, unix_millis()).await;
    }
}

/// One tick: broadcast the stored position of every room that is playing.
/// Paused rooms stay quiet.
pub(crate) async fn emit_sync_checks(state: &AppState, now: u64) {
    for target in state.registry.sync_targets() {
        let msg = ServerMessage::SyncCheck {
            timestamp: now,
            current_time: target.current_time,
        };
        fan_out(&state.senders, &target.participants, None, msg).await;
    }
}

/// Milliseconds since the unix epoch, the room clock used for stamping
/// video states and sync-checks.
pub fn unix_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|dur| dur.as_millis() as u64)
        .unwrap_or(0)
}
