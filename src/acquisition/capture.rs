// Copyright 2026 Siphon Contributors
// SPDX-License-Identifier: Apache-2.0

//! Realtime playback capture — the lossy middle strategy.
//!
//! Drives an off-screen playback surface at an accelerated, muted rate and
//! records the live stream into segments. The produced container format is
//! whatever the recorder negotiated; it is read back, never assumed from
//! the source.
//!
//! Completion is an awaited suspension point, not a callback: the drive
//! loop `select!`s over the end-of-playback signal, a duration-proximity
//! tick, the hard ceiling, and cancellation, whichever fires first.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::descriptor::SourceLocator;
use crate::errors::AcquireError;
use crate::sink::Artifact;

use super::chunked::ProgressFn;

/// What the surface learned about the media, possibly nothing.
#[derive(Debug, Clone, Default)]
pub struct MediaMetadata {
    /// Total duration in seconds, when the source signals it.
    pub duration_secs: Option<f64>,
}

/// Why playback could not start.
#[derive(Debug, Error)]
pub enum PlayError {
    /// Autoplay policy rejected the start. Needs a user gesture; the
    /// capture client surfaces this immediately instead of hanging.
    #[error("autoplay policy rejected playback start")]
    Rejected,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// An off-screen playback surface bound to one source.
///
/// Futures returned by `ended` may be dropped and re-requested; each call
/// must yield a future that resolves once playback has reached the end.
#[async_trait]
pub trait PlaybackSurface: Send + Sync {
    /// Resolve once media metadata is available. The client bounds this
    /// wait and proceeds anyway on timeout.
    async fn await_metadata(&mut self) -> anyhow::Result<MediaMetadata>;

    /// Set playback rate and mute state before starting.
    async fn configure(&mut self, rate: f64, muted: bool) -> anyhow::Result<()>;

    /// Begin playback.
    async fn play(&mut self) -> Result<(), PlayError>;

    /// Start live-stream capture, yielding the recorder sink.
    async fn begin_capture(&mut self) -> anyhow::Result<Box<dyn Recorder>>;

    /// Fraction of the media buffered so far, in `[0, 1]`.
    async fn buffered_fraction(&self) -> anyhow::Result<f64>;

    /// Current playback position in seconds.
    async fn position_secs(&self) -> anyhow::Result<f64>;

    /// Resolves when playback reaches the end of the media.
    async fn ended(&mut self) -> anyhow::Result<()>;

    /// Tear the surface down.
    async fn close(self: Box<Self>) -> anyhow::Result<()>;
}

/// Recorder attached to a captured stream.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// The next recorded segment, or `None` once stopped and fully flushed.
    async fn next_segment(&mut self) -> anyhow::Result<Option<Bytes>>;

    /// Container mime type the recorder negotiated (e.g.
    /// `video/webm;codecs=vp8,opus`).
    fn mime_type(&self) -> String;

    /// Stop recording and flush pending segments.
    async fn stop(&mut self) -> anyhow::Result<()>;
}

/// Creates playback surfaces for source locators.
#[async_trait]
pub trait SurfaceProvider: Send + Sync {
    async fn open(&self, source: &SourceLocator) -> anyhow::Result<Box<dyn PlaybackSurface>>;
}

/// How close to the known duration playback must get for the proximity
/// check to declare completion (seconds of media time).
const COMPLETION_PROXIMITY_SECS: f64 = 0.5;

/// Elapsed-time progress ramp cap when duration is unknown. Stays below the
/// aggregator's own pre-terminal cap so completion is never claimed early.
const UNKNOWN_DURATION_RAMP_CAP: u8 = 95;

/// Realtime capture client.
pub struct RealtimeCaptureClient {
    metadata_timeout: Duration,
    rate: f64,
    ceiling: Duration,
    poll: Duration,
}

impl RealtimeCaptureClient {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            metadata_timeout: config.metadata_timeout,
            rate: config.capture_rate,
            ceiling: config.capture_ceiling,
            poll: config.capture_poll,
        }
    }

    /// Capture a re-encoded copy of the media behind `source`.
    ///
    /// A capture cut short by the hard ceiling or a recorder failure with
    /// at least one recorded segment yields a partial artifact; with zero
    /// segments it is a `CaptureError`.
    pub async fn capture(
        &self,
        provider: &dyn SurfaceProvider,
        source: &SourceLocator,
        cancel: &CancellationToken,
        on_progress: ProgressFn<'_>,
    ) -> Result<Artifact, AcquireError> {
        let mut surface = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
            opened = provider.open(source) => opened
                .map_err(|e| AcquireError::CaptureError(format!("surface unavailable: {e}")))?,
        };

        let metadata = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = surface.close().await;
                return Err(AcquireError::Cancelled);
            }
            m = tokio::time::timeout(self.metadata_timeout, surface.await_metadata()) => match m {
                Ok(Ok(m)) => m,
                Ok(Err(e)) => {
                    // Some sources never signal metadata reliably; proceed blind.
                    tracing::debug!(error = %e, "metadata unavailable; proceeding");
                    MediaMetadata::default()
                }
                Err(_) => {
                    tracing::debug!("metadata wait timed out; proceeding");
                    MediaMetadata::default()
                }
            },
        };

        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AcquireError::Cancelled),
            r = self.start_playback(surface.as_mut()) => r,
        };
        if let Err(e) = started {
            let _ = surface.close().await;
            return Err(e);
        }

        let mut recorder = match surface.begin_capture().await {
            Ok(r) => r,
            Err(e) => {
                let _ = surface.close().await;
                return Err(AcquireError::CaptureError(format!(
                    "capture start failed: {e}"
                )));
            }
        };

        let result = self
            .drive(surface.as_mut(), recorder.as_mut(), &metadata, cancel, on_progress)
            .await;
        let _ = surface.close().await;
        result
    }

    /// Configure accelerated muted playback and start it. Muting is what
    /// makes the autoplay grant likely; rejection still happens and must
    /// surface as `CaptureBlocked`, not a hang.
    async fn start_playback(&self, surface: &mut dyn PlaybackSurface) -> Result<(), AcquireError> {
        surface
            .configure(self.rate, true)
            .await
            .map_err(|e| AcquireError::CaptureError(format!("configure failed: {e}")))?;
        match surface.play().await {
            Ok(()) => Ok(()),
            Err(PlayError::Rejected) => Err(AcquireError::CaptureBlocked),
            Err(PlayError::Other(e)) => {
                Err(AcquireError::CaptureError(format!("playback failed: {e}")))
            }
        }
    }

    async fn drive(
        &self,
        surface: &mut dyn PlaybackSurface,
        recorder: &mut dyn Recorder,
        metadata: &MediaMetadata,
        cancel: &CancellationToken,
        on_progress: ProgressFn<'_>,
    ) -> Result<Artifact, AcquireError> {
        let started = Instant::now();
        let ceiling = tokio::time::sleep(self.ceiling);
        tokio::pin!(ceiling);
        let mut tick = tokio::time::interval(self.poll);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut buf = BytesMut::new();
        let mut segments = 0usize;
        // Set when the capture is cut short (ceiling or recorder failure):
        // whatever was recorded is not the whole media.
        let mut truncated = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = recorder.stop().await;
                    return Err(AcquireError::Cancelled);
                }
                _ = &mut ceiling => {
                    tracing::warn!(segments, "capture hit the hard ceiling; force-stopping");
                    truncated = true;
                    break;
                }
                segment = recorder.next_segment() => match segment {
                    Ok(Some(bytes)) => {
                        buf.extend_from_slice(&bytes);
                        segments += 1;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "recorder failed mid-capture");
                        truncated = true;
                        break;
                    }
                },
                r = surface.ended() => {
                    if let Err(e) = r {
                        tracing::debug!(error = %e, "end signal errored; treating as ended");
                    }
                    break;
                }
                _ = tick.tick() => {
                    if self.report_and_check_done(surface, metadata, started, on_progress, buf.len() as u64).await {
                        break;
                    }
                }
            }
        }

        // Flush whatever the recorder still holds.
        if recorder.stop().await.is_ok() {
            while let Ok(Some(bytes)) = recorder.next_segment().await {
                buf.extend_from_slice(&bytes);
                segments += 1;
            }
        }

        if segments == 0 {
            return Err(AcquireError::CaptureError(
                "no segments recorded before capture stopped".into(),
            ));
        }

        tracing::info!(
            segments,
            bytes = buf.len(),
            partial = truncated,
            "capture finished"
        );
        Ok(Artifact {
            bytes: buf.freeze(),
            mime_type: recorder.mime_type(),
            partial: truncated,
        })
    }

    /// Emit a heuristic progress estimate and run the duration-proximity
    /// completion check. Returns true when playback is close enough to the
    /// known duration to call it done.
    async fn report_and_check_done(
        &self,
        surface: &dyn PlaybackSurface,
        metadata: &MediaMetadata,
        started: Instant,
        on_progress: ProgressFn<'_>,
        bytes_so_far: u64,
    ) -> bool {
        match metadata.duration_secs {
            Some(duration) if duration > 0.0 => {
                // Buffered-range coverage is the better signal when total
                // duration is known.
                let fraction = surface.buffered_fraction().await.unwrap_or(0.0);
                let percent = (fraction.clamp(0.0, 1.0) * 100.0) as u8;
                on_progress(percent, bytes_so_far);

                match surface.position_secs().await {
                    Ok(position) => position + COMPLETION_PROXIMITY_SECS >= duration,
                    Err(_) => false,
                }
            }
            _ => {
                // Unknown duration: elapsed ramp against the ceiling, capped
                // so 100 is never claimed before the recorder has stopped.
                let elapsed = started.elapsed().as_secs_f64();
                let ramp = (elapsed / self.ceiling.as_secs_f64() * 100.0) as u8;
                on_progress(ramp.min(UNKNOWN_DURATION_RAMP_CAP), bytes_so_far);
                false
            }
        }
    }
}
