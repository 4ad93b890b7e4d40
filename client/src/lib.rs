//! Participant-side library for Lockstep watch rooms: a WebSocket sync
//! client, a latency estimator, and a controller that keeps a local player
//! (anything implementing [`Player`]) in step with the room's host.

pub mod constants;
pub mod controller;
pub mod latency;
pub mod player;
pub mod protocol;
pub mod sync;
pub mod youtube;

pub use controller::{RoomController, DRIFT_THRESHOLD_SECS};
pub use latency::LatencyEstimator;
pub use player::Player;
pub use sync::SyncClient;
