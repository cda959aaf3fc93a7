//! Protocol timing and sizing knobs.

use shared::TILE_SIZE;
use std::time::Duration;

/// Every delay the synchronization protocol uses.
///
/// `Default` yields the values both peers must agree on for interoperation;
/// tests shrink nothing and drive time explicitly instead.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub tile_size: u32,
    pub room_code_attempts: u32,
    /// Upper bound on waiting for the transport provider to answer a
    /// registration or a connection attempt.
    pub provider_timeout: Duration,
    /// Host waits this long after the channel opens before sending INIT.
    pub init_delay: Duration,
    /// Host re-sends INIT this long after each local match start.
    pub match_init_delay: Duration,
    pub ready_offsets: Vec<Duration>,
    pub heartbeat_interval: Duration,
    pub handshake_retry_interval: Duration,
    pub handshake_max_attempts: u32,
    pub countdown_from: u8,
    pub countdown_step: Duration,
    pub countdown_resend_gap: Duration,
    pub start_offsets: Vec<Duration>,
    pub rematch_offsets: Vec<Duration>,
    pub game_over_offsets: Vec<Duration>,
    /// Period of the render/simulation frame loop.
    pub frame_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tile_size: TILE_SIZE,
            room_code_attempts: 5,
            provider_timeout: Duration::from_secs(5),
            init_delay: Duration::from_millis(500),
            match_init_delay: Duration::from_millis(200),
            ready_offsets: vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
            ],
            heartbeat_interval: Duration::from_millis(500),
            handshake_retry_interval: Duration::from_secs(1),
            handshake_max_attempts: 5,
            countdown_from: 3,
            countdown_step: Duration::from_secs(1),
            countdown_resend_gap: Duration::from_millis(50),
            start_offsets: vec![
                Duration::ZERO,
                Duration::from_millis(50),
                Duration::from_millis(100),
            ],
            rematch_offsets: vec![
                Duration::ZERO,
                Duration::from_millis(100),
                Duration::from_millis(200),
            ],
            game_over_offsets: vec![
                Duration::ZERO,
                Duration::from_millis(50),
                Duration::from_millis(100),
            ],
            frame_interval: Duration::from_millis(16),
        }
    }
}
