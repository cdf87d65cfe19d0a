//! Engine configuration.
//!
//! All bounds are caller-tunable; the defaults mirror what the protocol
//! tolerates in practice. No wait in the engine is unbounded.

use std::time::Duration;

/// Tunable limits and timeouts for one engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Requested bytes per chunk. Must not exceed the remote handle's
    /// maximum payload — that limit is the handle's, not ours, so callers
    /// who know it set it here. Clamped only against the bytes remaining.
    pub chunk_size: u32,
    /// Transient chunk failures tolerated before the transfer turns fatal.
    pub max_chunk_retries: u32,
    /// Base delay for the incremental retry backoff (attempt N waits N×this).
    pub retry_backoff: Duration,
    /// Deadline for one candidate's validation call.
    pub probe_timeout: Duration,
    /// How long a failed probe result is cached before re-probing is allowed.
    pub probe_cooldown: Duration,
    /// Chunked-transfer fatal errors tolerated before the cached handle is
    /// invalidated and put into cooldown.
    pub handle_failure_threshold: u32,
    /// Bound on waiting for playback metadata; capture proceeds anyway when
    /// it elapses (some sources never signal metadata reliably).
    pub metadata_timeout: Duration,
    /// Accelerated playback rate for capture.
    pub capture_rate: f64,
    /// Hard stop for a capture run. Segments recorded by then are kept as a
    /// partial artifact; zero segments means the capture failed.
    pub capture_ceiling: Duration,
    /// Cadence for capture progress estimation and completion proximity checks.
    pub capture_poll: Duration,
    /// Whole-request timeout for the direct fetch strategy.
    pub fetch_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1024 * 1024,
            max_chunk_retries: 3,
            retry_backoff: Duration::from_millis(250),
            probe_timeout: Duration::from_millis(500),
            probe_cooldown: Duration::from_secs(60),
            handle_failure_threshold: 3,
            metadata_timeout: Duration::from_secs(3),
            capture_rate: 2.0,
            capture_ceiling: Duration::from_secs(5 * 60),
            capture_poll: Duration::from_millis(500),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}
