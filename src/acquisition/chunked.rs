// Copyright 2026 Siphon Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sequential chunk-by-chunk retrieval over the remote handle.
//!
//! The transport is a single shared logical channel: chunk requests are
//! strictly sequential, never pipelined or parallel. This loop keeps the
//! within-task half of that discipline (one in-flight request, in-order
//! accumulation); the cross-task half is enforced by the probe, which hands
//! every task the same call-serialized handle.

use bytes::{Bytes, BytesMut};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::descriptor::MediaDescriptor;
use crate::errors::AcquireError;
use crate::rpc::RemoteHandle;
use crate::sink::Artifact;

/// Progress callback: `(percent, bytes_received)`.
pub type ProgressFn<'a> = &'a (dyn Fn(u8, u64) + Send + Sync);

/// Chunked transfer client.
pub struct ChunkedTransferClient {
    chunk_size: u32,
    max_retries: u32,
    backoff: std::time::Duration,
}

impl ChunkedTransferClient {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            max_retries: config.max_chunk_retries,
            backoff: config.retry_backoff,
        }
    }

    /// Retrieve the whole object described by `descriptor`.
    ///
    /// On success the returned artifact holds exactly
    /// `descriptor.total_size` bytes, assembled from chunks whose offsets
    /// form a strictly increasing, non-overlapping partition. On any fatal
    /// error no partial artifact is emitted.
    pub async fn transfer(
        &self,
        handle: &dyn RemoteHandle,
        descriptor: &MediaDescriptor,
        cancel: &CancellationToken,
        on_progress: ProgressFn<'_>,
    ) -> Result<Artifact, AcquireError> {
        descriptor.validate()?;
        let location = descriptor.location();
        let total = descriptor.total_size;

        let mut buf = BytesMut::with_capacity(usize::try_from(total).unwrap_or(0));
        let mut offset = 0u64;
        let mut attempts = 0u32;

        while offset < total {
            let limit = u64::from(self.chunk_size).min(total - offset) as u32;

            // Biased so a pending cancellation always wins over new I/O.
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                r = handle.read_chunk(&location, offset, limit) => r,
            };

            match self.check_payload(read, limit) {
                Ok(chunk) => {
                    attempts = 0;
                    offset += chunk.len() as u64;
                    buf.extend_from_slice(&chunk);
                    // Advance by bytes actually received, so short reads
                    // just shift the next offset instead of corrupting it.
                    on_progress(chunk_percent(offset, total), offset);
                }
                Err(e) => {
                    attempts += 1;
                    if attempts > self.max_retries {
                        tracing::warn!(offset, attempts, "chunk retries exhausted");
                        return Err(AcquireError::TransferFatal(format!(
                            "chunk at offset {offset} failed after {attempts} attempts: {e}"
                        )));
                    }
                    tracing::debug!(offset, attempts, error = %e, "transient chunk failure; backing off");
                    let delay = self.backoff * attempts;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        Ok(Artifact {
            bytes: buf.freeze(),
            mime_type: descriptor
                .mime_hint
                .clone()
                .unwrap_or_else(|| "application/octet-stream".into()),
            partial: false,
        })
    }

    /// Classify one chunk response. Empty and oversized payloads are both
    /// malformed, therefore transient.
    fn check_payload(
        &self,
        read: anyhow::Result<Bytes>,
        limit: u32,
    ) -> Result<Bytes, AcquireError> {
        match read {
            Ok(bytes) if bytes.is_empty() => {
                Err(AcquireError::TransferTransient("empty chunk payload".into()))
            }
            Ok(bytes) if bytes.len() > limit as usize => Err(AcquireError::TransferTransient(
                format!("payload of {} bytes exceeds limit {limit}", bytes.len()),
            )),
            Ok(bytes) => Ok(bytes),
            Err(e) => Err(AcquireError::TransferTransient(e.to_string())),
        }
    }
}

/// Floor percentage of `received` against `total`, computed in `u128` so
/// `received * 100` cannot overflow near `u64::MAX`.
fn chunk_percent(received: u64, total: u64) -> u8 {
    ((u128::from(received) * 100) / u128::from(total)) as u8
}
