// Copyright 2026 Siphon Contributors
// SPDX-License-Identifier: Apache-2.0

//! Task events and the monotonic progress aggregator.
//!
//! Every strategy reports progress through one [`ProgressAggregator`], which
//! normalizes the heterogeneous signals (exact byte counts, capture
//! heuristics) into one non-decreasing percentage per task. Events flow
//! through a `tokio::sync::broadcast` channel to all subscribers; when no
//! subscriber exists, events are silently dropped.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::errors::ErrorKind;
use crate::task::TaskState;

/// Progress reported below this cap stays pre-terminal; the single 100 is
/// reserved for [`ProgressAggregator::complete`].
const PRE_TERMINAL_CAP: u8 = 99;

/// A notification emitted for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNotice {
    pub task_id: Uuid,
    /// Monotonically increasing across all tasks on this channel.
    pub seq: u64,
    pub event: TaskEvent,
}

/// The specific kind of task notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TaskEvent {
    /// The task's state machine advanced.
    StateChanged { state: TaskState },
    /// Unified progress percentage (monotonic per task).
    Progress { percent: u8, bytes_transferred: u64 },
    /// A strategy failed and the chain advanced to the next one.
    StrategyFallback {
        from: TaskState,
        kind: ErrorKind,
        reason: String,
    },
    /// The task finished and the artifact was handed to the sink.
    Completed {
        bytes: u64,
        mime_type: String,
        partial: bool,
    },
    /// The task exhausted its strategies.
    Failed { kind: ErrorKind, reason: String },
}

/// Sender half of the task event channel.
pub type EventSender = tokio::sync::broadcast::Sender<TaskNotice>;
/// Receiver half of the task event channel.
pub type EventReceiver = tokio::sync::broadcast::Receiver<TaskNotice>;

/// Create the event channel. 256 buffered events covers a full task run
/// (state changes + ~100 progress ticks) with room for bursts.
pub fn channel() -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(256)
}

#[derive(Debug, Clone, Copy, Default)]
struct TaskProgress {
    last_percent: u8,
    bytes: u64,
    /// Set on failure/cancellation; silences every further notification
    /// for this task id.
    frozen: bool,
}

/// Normalizes heterogeneous progress signals into one monotonic percentage
/// per task and fans out task notifications.
pub struct ProgressAggregator {
    table: DashMap<Uuid, TaskProgress>,
    tx: EventSender,
    seq: AtomicU64,
}

impl ProgressAggregator {
    pub fn new(tx: EventSender) -> Self {
        Self {
            table: DashMap::new(),
            tx,
            seq: AtomicU64::new(0),
        }
    }

    /// Report raw progress for a task.
    ///
    /// Stores the maximum of the previous and new value and notifies
    /// observers only when the clamped value actually advanced. Raw values
    /// are capped below 100; the terminal 100 comes from [`Self::complete`].
    pub fn report(&self, task_id: Uuid, raw_percent: u8, bytes_transferred: u64) {
        let mut entry = self.table.entry(task_id).or_default();
        if entry.frozen {
            return;
        }
        let clamped = raw_percent.min(PRE_TERMINAL_CAP);
        entry.bytes = entry.bytes.max(bytes_transferred);
        if clamped <= entry.last_percent {
            return;
        }
        entry.last_percent = clamped;
        let bytes = entry.bytes;
        drop(entry);
        self.send(
            task_id,
            TaskEvent::Progress {
                percent: clamped,
                bytes_transferred: bytes,
            },
        );
    }

    /// Emit the single terminal 100 for a successful task.
    pub fn complete(&self, task_id: Uuid) {
        let mut entry = self.table.entry(task_id).or_default();
        if entry.frozen {
            return;
        }
        entry.last_percent = 100;
        entry.frozen = true;
        let bytes = entry.bytes;
        drop(entry);
        self.send(
            task_id,
            TaskEvent::Progress {
                percent: 100,
                bytes_transferred: bytes,
            },
        );
    }

    /// Freeze a task's progress at its last value. No further notifications
    /// of any kind are emitted for this task id.
    pub fn freeze(&self, task_id: Uuid) {
        self.table.entry(task_id).or_default().frozen = true;
    }

    /// Emit a non-progress event for a task, subject to the freeze gate.
    pub fn notify(&self, task_id: Uuid, event: TaskEvent) {
        if self.table.get(&task_id).is_some_and(|e| e.frozen) {
            return;
        }
        self.send(task_id, event);
    }

    /// Forget a task entirely (after the caller observed its terminal state).
    pub fn remove(&self, task_id: Uuid) {
        self.table.remove(&task_id);
    }

    /// Reset a task for a retry from the initial state.
    pub fn reset(&self, task_id: Uuid) {
        self.table.insert(task_id, TaskProgress::default());
    }

    /// Last emitted percentage for a task, if any.
    pub fn last_percent(&self, task_id: Uuid) -> Option<u8> {
        self.table.get(&task_id).map(|e| e.last_percent)
    }

    fn send(&self, task_id: Uuid, event: TaskEvent) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        // Send errors just mean nobody is listening.
        let _ = self.tx.send(TaskNotice {
            task_id,
            seq,
            event,
        });
    }
}
