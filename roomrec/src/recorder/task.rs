//! Recording task types and events.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one capture task.
pub type TaskId = Uuid;

/// A closed output file produced by a capture task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub path: PathBuf,
    /// Zero-based position within the session.
    pub index: u32,
    pub size_bytes: u64,
    pub duration_secs: f64,
    pub closed_at: DateTime<Utc>,
}

/// How a capture task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOutcome {
    /// Stream ended or a graceful stop was requested; all segments closed.
    Completed,
    /// The task died mid-stream. Segments closed before the failure are
    /// still valid.
    Failed { error: String },
}

impl TaskOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, TaskOutcome::Failed { .. })
    }
}

/// Everything a capture task needs to start.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub room_id: u64,
    pub room_name: String,
    pub title: String,
    pub stream_url: String,
    /// Delay before opening the stream, for formats whose edge needs
    /// time to publish. Zero means open immediately.
    pub pre_open_wait: std::time::Duration,
}

/// Events emitted by the recorder, one stream for all tasks.
#[derive(Debug, Clone)]
pub enum RecorderEvent {
    /// The worker opened the stream and began writing.
    TaskStarted { task_id: TaskId, room_id: u64 },
    /// One output file was closed (rotation or finalize).
    SegmentClosed {
        task_id: TaskId,
        room_id: u64,
        segment: SegmentInfo,
    },
    /// Terminal event; exactly one per task.
    TaskFinished {
        task_id: TaskId,
        room_id: u64,
        outcome: TaskOutcome,
        /// All closed segments of the session, in stream order.
        segments: Vec<SegmentInfo>,
    },
}

impl RecorderEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::TaskStarted { task_id, .. }
            | Self::SegmentClosed { task_id, .. }
            | Self::TaskFinished { task_id, .. } => *task_id,
        }
    }

    pub fn room_id(&self) -> u64 {
        match self {
            Self::TaskStarted { room_id, .. }
            | Self::SegmentClosed { room_id, .. }
            | Self::TaskFinished { room_id, .. } => *room_id,
        }
    }
}

/// Messages from a capture worker to its manager-side forwarder.
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Started,
    SegmentClosed(SegmentInfo),
    /// Terminal; the worker sends nothing after this.
    Finished(TaskOutcome),
}
