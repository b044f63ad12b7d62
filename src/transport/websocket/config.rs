//! Tunables for the reconnecting WebSocket transport. Grounded on the
//! teacher's `sleep_backoff` (1s → 2s → … capped at 30s) generalized into an
//! explicit, overridable policy rather than a hardcoded loop.

use std::time::Duration;

/// What to do when a bounded queue (send or receive) is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFullBehavior {
    /// Reject the new message with [`crate::error::TransportError::QueueFull`].
    Error,
    /// Silently evict the oldest queued message to make room.
    DropOldest,
    /// Silently refuse the new message, keeping the queue as-is.
    DropNewest,
}

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after every failed attempt.
    pub multiplier: f64,
    /// Ceiling the delay is clamped to, no matter how many attempts fail.
    pub max_delay: Duration,
    /// `None` means retry forever; `Some(n)` gives up after `n` attempts and
    /// surfaces `TransportError::ReconnectFailed`.
    pub max_attempts: Option<u32>,
    /// Interval between heartbeat pings while connected.
    pub heartbeat_interval: Duration,
    /// How long to wait for a pong before declaring the heartbeat dead and
    /// forcing a reconnect.
    pub heartbeat_timeout: Duration,
    /// Deadline for the initial TCP+TLS+WS handshake.
    pub connect_timeout: Duration,
    /// Default deadline for an individual `call()`, absent a per-call override.
    pub request_timeout: Duration,
    /// Capacity of the outbound (send) queue.
    pub send_queue_capacity: usize,
    /// Capacity of the inbound (receive / subscription fan-out) queue.
    pub receive_queue_capacity: usize,
    /// Overflow policy shared by both queues.
    pub queue_full_behavior: QueueFullBehavior,
    /// Whether an unplanned close schedules a reconnect attempt at all.
    pub auto_reconnect: bool,
    /// If false, a non-empty auth token is refused over a `ws://` (as
    /// opposed to `wss://`) connection — `InsecureConnection` instead of
    /// leaking the token over plaintext.
    pub allow_insecure_auth: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: None,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            send_queue_capacity: 1000,
            receive_queue_capacity: 1000,
            queue_full_behavior: QueueFullBehavior::Error,
            auto_reconnect: true,
            allow_insecure_auth: false,
        }
    }
}

impl ReconnectConfig {
    /// Compute the delay before reconnect attempt number `attempt` (1-based),
    /// clamped to `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi((attempt.saturating_sub(1)) as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor).min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }
}
