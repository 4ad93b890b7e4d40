use std::time::Duration;

pub const DEFAULT_WS_URL: &str = "ws://localhost:3001/ws";

/// Reconnection gives up after this many failed attempts; past that the
/// connection-lost state is fatal and requires a manual restart.
pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(5);

/// WebSocket keep-alive ping cadence
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(12);
