/// Seam to the embedding mechanism for whatever provider is rendering the
/// video. Implementations wrap an iframe bridge, a native player, or a test
/// double; the sync logic only ever talks to this trait.
pub trait Player: Send + Sync {
    /// Current playback position in seconds, or `None` while the player is
    /// still loading. Every sync handler no-ops on `None`.
    fn position(&self) -> Option<f64>;

    fn is_playing(&self) -> bool;

    fn playback_rate(&self) -> f64;

    fn play(&self);

    fn pause(&self);

    /// Jump to an absolute position in seconds
    fn seek(&self, seconds: f64);

    fn set_playback_rate(&self, rate: f64);
}
