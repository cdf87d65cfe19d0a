//! Error taxonomy for the acquisition engine.
//!
//! Transient errors are retried inside the owning component; everything else
//! is returned as a structured result to the orchestrator, which decides
//! fallback-chain advancement. Errors never terminate a task silently.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every failure the engine can report.
#[derive(Debug, Error)]
pub enum AcquireError {
    /// The resolver produced no descriptor, or an incomplete one.
    #[error("descriptor missing or incomplete: {0}")]
    DescriptorMissing(String),

    /// No remote handle responded to validation, or the probe is cooling down.
    #[error("no usable remote handle: {0}")]
    ProbeFailed(String),

    /// A recoverable chunk failure (empty or malformed payload). Retried by
    /// the transfer client; never escapes to the orchestrator.
    #[error("transient transfer failure: {0}")]
    TransferTransient(String),

    /// Retries exhausted or the channel is unusable. Aborts the transfer
    /// with no partial artifact and triggers fallback.
    #[error("chunked transfer failed: {0}")]
    TransferFatal(String),

    /// Playback start was rejected by autoplay policy. Requires a user
    /// gesture; surfaced immediately rather than retried.
    #[error("playback start rejected; a user gesture is required")]
    CaptureBlocked,

    /// Realtime capture produced no usable data.
    #[error("realtime capture failed: {0}")]
    CaptureError(String),

    /// Direct fetch failed (network or cross-origin). Carries what the
    /// privileged collaborator needs to escalate.
    #[error("direct fetch blocked for {url}")]
    FetchBlocked { url: String, filename: String },

    /// The artifact sink rejected the finished artifact.
    #[error("artifact persistence failed: {0}")]
    PersistFailed(String),

    /// The task was cancelled at a suspension point.
    #[error("task cancelled")]
    Cancelled,

    /// A bounded wait elapsed.
    #[error("{0} timed out")]
    Timeout(&'static str),
}

impl AcquireError {
    /// Whether the transfer client may retry this error locally.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransferTransient(_))
    }

    /// The serializable kind, for event payloads.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DescriptorMissing(_) => ErrorKind::DescriptorMissing,
            Self::ProbeFailed(_) => ErrorKind::ProbeFailed,
            Self::TransferTransient(_) => ErrorKind::TransferTransient,
            Self::TransferFatal(_) => ErrorKind::TransferFatal,
            Self::CaptureBlocked => ErrorKind::CaptureBlocked,
            Self::CaptureError(_) => ErrorKind::CaptureError,
            Self::FetchBlocked { .. } => ErrorKind::FetchBlocked,
            Self::PersistFailed(_) => ErrorKind::PersistFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

/// Flat error discriminant carried in task events and outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    DescriptorMissing,
    ProbeFailed,
    TransferTransient,
    TransferFatal,
    CaptureBlocked,
    CaptureError,
    FetchBlocked,
    PersistFailed,
    Cancelled,
    Timeout,
}
