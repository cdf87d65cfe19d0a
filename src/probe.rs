//! Handle probing with a process-wide cached result.
//!
//! The probe validates candidates in provider order with a short per-call
//! deadline. The first success is cached for the process lifetime; total
//! failure is cached too, with a cooldown window, so tasks created while the
//! host lacks the capability don't hammer it with repeated probing.
//!
//! The cached handle is handed out wrapped so every call on it is serialized:
//! the remote side is one logical channel, and interleaved reads from
//! concurrent tasks are not safe on it.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::config::EngineConfig;
use crate::errors::AcquireError;
use crate::rpc::{CandidateProvider, ChunkLocation, RemoteHandle};

/// Serializing wrapper around the validated handle. At most one call is in
/// flight on the underlying channel, no matter how many tasks share it.
struct SerialHandle {
    inner: Arc<dyn RemoteHandle>,
    gate: Mutex<()>,
}

#[async_trait]
impl RemoteHandle for SerialHandle {
    async fn ping(&self) -> Result<()> {
        let _gate = self.gate.lock().await;
        self.inner.ping().await
    }

    async fn read_chunk(&self, location: &ChunkLocation, offset: u64, limit: u32) -> Result<Bytes> {
        let _gate = self.gate.lock().await;
        self.inner.read_chunk(location, offset, limit).await
    }
}

enum ProbeState {
    Unprobed,
    Valid(Arc<dyn RemoteHandle>),
    CoolingDown { until: Instant },
}

/// Validates and caches the shared remote handle.
pub struct HandleProbe {
    provider: Box<dyn CandidateProvider>,
    state: Mutex<ProbeState>,
    timeout: Duration,
    cooldown: Duration,
    failure_threshold: u32,
    transfer_failures: Mutex<u32>,
}

impl HandleProbe {
    pub fn new(provider: Box<dyn CandidateProvider>, config: &EngineConfig) -> Self {
        Self {
            provider,
            state: Mutex::new(ProbeState::Unprobed),
            timeout: config.probe_timeout,
            cooldown: config.probe_cooldown,
            failure_threshold: config.handle_failure_threshold,
            transfer_failures: Mutex::new(0),
        }
    }

    /// Return the cached handle, or probe for one.
    ///
    /// Within a cooldown window this returns the cached failure without
    /// issuing any validation calls. The state lock is held across the
    /// probe itself so concurrent tasks never probe in parallel.
    pub async fn probe(&self) -> Result<Arc<dyn RemoteHandle>, AcquireError> {
        let mut state = self.state.lock().await;

        match &*state {
            ProbeState::Valid(handle) => return Ok(handle.clone()),
            ProbeState::CoolingDown { until } if Instant::now() < *until => {
                return Err(AcquireError::ProbeFailed("probe cooling down".into()));
            }
            _ => {}
        }

        for (i, handle) in self.provider.candidates().into_iter().enumerate() {
            match tokio::time::timeout(self.timeout, handle.ping()).await {
                Ok(Ok(())) => {
                    tracing::info!(candidate = i, "remote handle validated");
                    let shared: Arc<dyn RemoteHandle> = Arc::new(SerialHandle {
                        inner: handle,
                        gate: Mutex::new(()),
                    });
                    *state = ProbeState::Valid(shared.clone());
                    return Ok(shared);
                }
                Ok(Err(e)) => tracing::debug!(candidate = i, error = %e, "candidate rejected ping"),
                Err(_) => tracing::debug!(candidate = i, "candidate ping timed out"),
            }
        }

        tracing::warn!(
            cooldown_secs = self.cooldown.as_secs(),
            "no remote handle responded; entering cooldown"
        );
        *state = ProbeState::CoolingDown {
            until: Instant::now() + self.cooldown,
        };
        Err(AcquireError::ProbeFailed("no candidate responded".into()))
    }

    /// Record a fatal chunked-transfer failure against the cached handle.
    ///
    /// After the configured threshold the handle is invalidated and the
    /// probe enters cooldown, so a dead channel isn't retried immediately.
    pub async fn record_transfer_failure(&self) {
        let mut failures = self.transfer_failures.lock().await;
        *failures += 1;
        if *failures >= self.failure_threshold {
            *failures = 0;
            drop(failures);
            tracing::warn!("repeated transfer failures; invalidating cached handle");
            self.invalidate().await;
        }
    }

    /// Drop the cached handle and start a cooldown.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        *state = ProbeState::CoolingDown {
            until: Instant::now() + self.cooldown,
        };
    }
}
