//! Stream capture: task manager and per-task workers.

pub mod manager;
pub mod task;
pub mod worker;

pub use manager::TaskManager;
pub use task::{CaptureRequest, RecorderEvent, SegmentInfo, TaskId, TaskOutcome};
pub use worker::{HttpStreamSource, StreamSource};
