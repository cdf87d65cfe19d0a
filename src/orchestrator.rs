// Copyright 2026 Siphon Contributors
// SPDX-License-Identifier: Apache-2.0

//! The acquisition orchestrator.
//!
//! Owns the per-task state machine and the task registry, executes the
//! strategy chain in fidelity order (chunked → capture → fetch), unifies
//! progress through the aggregator, and hands the finished artifact to the
//! sink. Tasks run as independent state machines; the shared remote handle
//! stays a single logical channel because the chunked client itself is
//! strictly sequential.

use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::acquisition::capture::{RealtimeCaptureClient, SurfaceProvider};
use crate::acquisition::chunked::ChunkedTransferClient;
use crate::acquisition::direct::DirectFetchClient;
use crate::config::EngineConfig;
use crate::descriptor::SourceLocator;
use crate::errors::AcquireError;
use crate::probe::HandleProbe;
use crate::progress::{self, EventReceiver, EventSender, ProgressAggregator, TaskEvent};
use crate::resolver::{DescriptorResolver, ResolveContext};
use crate::rpc::CandidateProvider;
use crate::sink::{self, Artifact, ArtifactSink};
use crate::task::{AcquisitionTask, FailureInfo, TaskOutcome, TaskState};

struct TaskEntry {
    task: AcquisitionTask,
    cancel: CancellationToken,
}

/// Drives acquisition tasks through the tiered strategy chain.
pub struct Orchestrator {
    resolver: Arc<dyn DescriptorResolver>,
    probe: Arc<HandleProbe>,
    surfaces: Arc<dyn SurfaceProvider>,
    sink: Arc<dyn ArtifactSink>,
    chunked: ChunkedTransferClient,
    capture: RealtimeCaptureClient,
    direct: DirectFetchClient,
    progress: ProgressAggregator,
    events: EventSender,
    tasks: DashMap<Uuid, TaskEntry>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        resolver: Arc<dyn DescriptorResolver>,
        candidates: Box<dyn CandidateProvider>,
        surfaces: Arc<dyn SurfaceProvider>,
        sink: Arc<dyn ArtifactSink>,
    ) -> Self {
        let (events, _) = progress::channel();
        Self {
            resolver,
            probe: Arc::new(HandleProbe::new(candidates, &config)),
            surfaces,
            sink,
            chunked: ChunkedTransferClient::new(&config),
            capture: RealtimeCaptureClient::new(&config),
            direct: DirectFetchClient::new(&config),
            progress: ProgressAggregator::new(events.clone()),
            events,
            tasks: DashMap::new(),
        }
    }

    /// Subscribe to task notifications.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Register a new task. It stays `Idle` until [`Self::run`].
    pub fn create_task(&self, source: SourceLocator, title_hint: Option<String>) -> Uuid {
        let task = AcquisitionTask::new(source, title_hint);
        let task_id = task.task_id;
        self.tasks.insert(
            task_id,
            TaskEntry {
                task,
                cancel: CancellationToken::new(),
            },
        );
        tracing::debug!(%task_id, "task created");
        task_id
    }

    /// Current state of a task, if it exists.
    pub fn task_state(&self, task_id: Uuid) -> Option<TaskState> {
        self.tasks.get(&task_id).map(|e| e.task.state)
    }

    /// Snapshot of a task's record.
    pub fn task(&self, task_id: Uuid) -> Option<AcquisitionTask> {
        self.tasks.get(&task_id).map(|e| e.task.clone())
    }

    /// Request cancellation. Takes effect at the task's next suspension
    /// point; no further progress or completion notifications fire for this
    /// task id from this call on.
    pub fn cancel(&self, task_id: Uuid) {
        if let Some(entry) = self.tasks.get(&task_id) {
            self.progress.freeze(task_id);
            entry.cancel.cancel();
            tracing::debug!(%task_id, "cancellation requested");
        }
    }

    /// Drop a terminal task from the registry. Returns false if the task is
    /// unknown or still running.
    pub fn dismiss(&self, task_id: Uuid) -> bool {
        let removable = self
            .tasks
            .get(&task_id)
            .is_some_and(|e| e.task.state.is_terminal());
        if removable {
            self.tasks.remove(&task_id);
            self.progress.remove(task_id);
        }
        removable
    }

    /// Rearm a terminal task for a fresh run from the initial state. The
    /// previous run's timers, tokens and progress are gone; only the attempt
    /// counter carries over.
    pub fn reset(&self, task_id: Uuid) -> bool {
        let Some(mut entry) = self.tasks.get_mut(&task_id) else {
            return false;
        };
        if !entry.task.state.is_terminal() {
            return false;
        }
        entry.task.state = TaskState::Idle;
        entry.task.strategy_index = 0;
        entry.task.bytes_transferred = 0;
        entry.task.descriptor = None;
        entry.task.total_size = None;
        entry.cancel = CancellationToken::new();
        drop(entry);
        self.progress.reset(task_id);
        true
    }

    /// Run a task to a terminal state. Returns `None` for an unknown id.
    pub async fn run(&self, task_id: Uuid) -> Option<TaskOutcome> {
        let cancel = {
            let mut entry = self.tasks.get_mut(&task_id)?;
            entry.task.attempts += 1;
            entry.cancel.clone()
        };

        let outcome = match self.drive(task_id, &cancel).await {
            Ok(artifact) => self.assemble(task_id, &cancel, artifact).await,
            Err(e) => self.terminal_failure(task_id, e),
        };
        tracing::info!(%task_id, state = %outcome.state, "task finished");
        Some(outcome)
    }

    /// Convenience: create a task and run it immediately.
    pub async fn acquire(&self, source: SourceLocator, title_hint: Option<String>) -> TaskOutcome {
        let task_id = self.create_task(source, title_hint);
        // The task was just created, so run() cannot miss it.
        match self.run(task_id).await {
            Some(outcome) => outcome,
            None => TaskOutcome {
                task_id,
                state: TaskState::Failed,
                failure: Some(FailureInfo {
                    kind: crate::errors::ErrorKind::Cancelled,
                    reason: "task dismissed before it ran".into(),
                }),
            },
        }
    }

    /// Execute the strategy chain until one produces an artifact.
    async fn drive(
        &self,
        task_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Artifact, AcquireError> {
        let ctx = {
            let entry = self
                .tasks
                .get(&task_id)
                .ok_or(AcquireError::Cancelled)?;
            ResolveContext {
                source: entry.task.source.clone(),
                title_hint: entry.task.title_hint.clone(),
            }
        };

        self.transition(task_id, TaskState::ResolvingDescriptor);
        let descriptor = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
            d = self.resolver.resolve(&ctx) => d,
        };
        if let Some(d) = &descriptor {
            if let Some(mut entry) = self.tasks.get_mut(&task_id) {
                entry.task.descriptor = Some(d.clone());
                entry.task.total_size = Some(d.total_size);
            }
        }

        let report = |percent: u8, bytes: u64| {
            self.progress.report(task_id, percent, bytes);
            if let Some(mut entry) = self.tasks.get_mut(&task_id) {
                entry.task.bytes_transferred = bytes;
            }
        };

        // Strategy 1: exact-byte chunked transfer, only with a complete
        // descriptor and a validated handle. A probe failure (or cooldown)
        // routes straight to capture without entering the chunked state.
        if let Some(descriptor) = &descriptor {
            let probed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AcquireError::Cancelled),
                r = self.probe.probe() => r,
            };
            match probed {
                Ok(handle) => {
                    self.transition(task_id, TaskState::StrategyChunked);
                    match self
                        .chunked
                        .transfer(handle.as_ref(), descriptor, cancel, &report)
                        .await
                    {
                        Ok(artifact) => return Ok(artifact),
                        Err(AcquireError::Cancelled) => return Err(AcquireError::Cancelled),
                        Err(e) => {
                            self.probe.record_transfer_failure().await;
                            self.fall_back(task_id, TaskState::StrategyChunked, &e);
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(%task_id, error = %e, "no remote handle; skipping chunked strategy");
                }
            }
        } else {
            tracing::debug!(%task_id, "no descriptor resolved; skipping chunked strategy");
        }

        // Strategy 2: lossy realtime capture.
        self.transition(task_id, TaskState::StrategyCapture);
        match self
            .capture
            .capture(self.surfaces.as_ref(), &ctx.source, cancel, &report)
            .await
        {
            Ok(artifact) => return Ok(artifact),
            Err(AcquireError::Cancelled) => return Err(AcquireError::Cancelled),
            Err(e) => self.fall_back(task_id, TaskState::StrategyCapture, &e),
        }

        // Strategy 3: best-effort whole-resource fetch. Its failure is
        // terminal here; escalation to a privileged collaborator happens
        // outside this state machine.
        self.transition(task_id, TaskState::StrategyFetch);
        let base = sink::base_name(descriptor.as_ref(), ctx.title_hint.as_deref());
        self.direct.fetch(&ctx.source, &base, cancel).await
    }

    /// Persist the artifact and finish the task.
    async fn assemble(
        &self,
        task_id: Uuid,
        cancel: &CancellationToken,
        artifact: Artifact,
    ) -> TaskOutcome {
        self.transition(task_id, TaskState::Assembling);
        let filename = {
            let entry = self.tasks.get(&task_id);
            let (descriptor, hint) = match &entry {
                Some(e) => (e.task.descriptor.clone(), e.task.title_hint.clone()),
                None => (None, None),
            };
            sink::with_extension(
                &sink::base_name(descriptor.as_ref(), hint.as_deref()),
                &artifact,
            )
        };

        let persisted = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AcquireError::Cancelled),
            r = self.sink.persist(&artifact, &filename) => {
                r.map_err(|e| AcquireError::PersistFailed(e.to_string()))
            }
        };

        match persisted {
            Ok(()) => {
                self.transition(task_id, TaskState::Completed);
                self.progress.notify(
                    task_id,
                    TaskEvent::Completed {
                        bytes: artifact.len(),
                        mime_type: artifact.mime_type.clone(),
                        partial: artifact.partial,
                    },
                );
                // The single terminal 100; also freezes the task's stream.
                self.progress.complete(task_id);
                TaskOutcome {
                    task_id,
                    state: TaskState::Completed,
                    failure: None,
                }
            }
            Err(e) => self.terminal_failure(task_id, e),
        }
    }

    /// Record a terminal failure or cancellation.
    fn terminal_failure(&self, task_id: Uuid, error: AcquireError) -> TaskOutcome {
        if matches!(error, AcquireError::Cancelled) {
            // Cancellation is silent: freeze (idempotent if cancel() already
            // did), then flip the state without emitting anything.
            self.progress.freeze(task_id);
            self.set_state(task_id, TaskState::Cancelled);
            return TaskOutcome {
                task_id,
                state: TaskState::Cancelled,
                failure: None,
            };
        }

        let info = FailureInfo {
            kind: error.kind(),
            reason: error.to_string(),
        };
        tracing::warn!(%task_id, kind = ?info.kind, reason = %info.reason, "task failed");
        self.transition(task_id, TaskState::Failed);
        self.progress.notify(
            task_id,
            TaskEvent::Failed {
                kind: info.kind,
                reason: info.reason.clone(),
            },
        );
        // Leave the last progress value frozen.
        self.progress.freeze(task_id);
        TaskOutcome {
            task_id,
            state: TaskState::Failed,
            failure: Some(info),
        }
    }

    /// Advance the state machine and notify observers.
    fn transition(&self, task_id: Uuid, state: TaskState) {
        self.set_state(task_id, state);
        self.progress
            .notify(task_id, TaskEvent::StateChanged { state });
    }

    fn set_state(&self, task_id: Uuid, state: TaskState) {
        if let Some(mut entry) = self.tasks.get_mut(&task_id) {
            tracing::debug!(%task_id, from = %entry.task.state, to = %state, "state transition");
            entry.task.state = state;
            entry.task.strategy_index = match state {
                TaskState::StrategyChunked => 0,
                TaskState::StrategyCapture => 1,
                TaskState::StrategyFetch => 2,
                _ => entry.task.strategy_index,
            };
        }
    }

    /// Log and announce a strategy falling through to the next one.
    fn fall_back(&self, task_id: Uuid, from: TaskState, error: &AcquireError) {
        tracing::warn!(%task_id, %from, error = %error, "strategy failed; falling back");
        self.progress.notify(
            task_id,
            TaskEvent::StrategyFallback {
                from,
                kind: error.kind(),
                reason: error.to_string(),
            },
        );
    }
}
