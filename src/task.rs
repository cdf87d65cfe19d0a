//! Task model: states, the per-task record, and terminal outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::descriptor::{MediaDescriptor, SourceLocator};
use crate::errors::ErrorKind;

/// States of the per-task acquisition state machine.
///
/// The strategy ordering reflects a fidelity/availability trade-off:
/// exact-byte retrieval first, lossy realtime capture second, best-effort
/// fetch last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Idle,
    ResolvingDescriptor,
    StrategyChunked,
    StrategyCapture,
    StrategyFetch,
    Assembling,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::ResolvingDescriptor => "resolving-descriptor",
            Self::StrategyChunked => "strategy-chunked",
            Self::StrategyCapture => "strategy-capture",
            Self::StrategyFetch => "strategy-fetch",
            Self::Assembling => "assembling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// One user- or batch-initiated acquisition, owned by the orchestrator's
/// registry from creation to dismissal.
#[derive(Debug, Clone)]
pub struct AcquisitionTask {
    pub task_id: Uuid,
    pub source: SourceLocator,
    /// Optional human title hint (e.g. scraped near the element), used in
    /// the filename fallback chain when the descriptor has no name.
    pub title_hint: Option<String>,
    pub descriptor: Option<MediaDescriptor>,
    pub state: TaskState,
    /// Index into the strategy chain (0 = chunked, 1 = capture, 2 = fetch).
    pub strategy_index: usize,
    pub bytes_transferred: u64,
    pub total_size: Option<u64>,
    /// Full runs attempted, including retries after failure.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl AcquisitionTask {
    pub fn new(source: SourceLocator, title_hint: Option<String>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            source,
            title_hint,
            descriptor: None,
            state: TaskState::Idle,
            strategy_index: 0,
            bytes_transferred: 0,
            total_size: None,
            attempts: 0,
            created_at: Utc::now(),
        }
    }
}

/// Terminal result of one task run.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub state: TaskState,
    /// Present when `state` is `Failed`.
    pub failure: Option<FailureInfo>,
}

/// Human-readable failure detail attached to a `Failed` outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureInfo {
    pub kind: ErrorKind,
    pub reason: String,
}
