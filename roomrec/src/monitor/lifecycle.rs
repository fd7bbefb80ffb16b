//! Room lifecycle decisions.
//!
//! The decision function is pure: it maps the current room state and the
//! latest poll outcome to an [`Action`], without touching the registry,
//! the task manager, or the clock. All side effects happen in the
//! service that executes the action.

use crate::config::MonitorConfig;
use crate::monitor::prober::LiveStatus;
use crate::registry::RoomState;

/// Outcome of one poll attempt.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Status(LiveStatus),
    /// Poll failed; `consecutive_errors` includes this failure.
    Error { consecutive_errors: u32 },
}

/// What the monitor should do in response to a poll outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Start a capture task for a room that just went live.
    StartCapture { title: String, stream_url: String },
    /// Refresh the stored title of a room that is already being captured.
    RefreshTitle { title: String },
    /// The stream ended; wind down the active capture.
    Finalize,
    /// Live was observed but the stream vanished before capture started.
    /// Drop back to idle without emitting anything.
    Flicker,
    /// Record the failure; monitoring continues with backoff.
    RecordError,
    /// Nothing to do.
    Ignore,
}

/// Decide the next action for a room.
///
/// Error handling: while a capture is active, a run of poll failures at
/// or past the configured threshold finalizes the capture so a dead
/// stream does not hold its slot forever. The cutoff fires exactly at
/// the threshold, so a continuing error run does not re-finalize.
pub fn decide(state: RoomState, outcome: &PollOutcome, config: &MonitorConfig) -> Action {
    match (state, outcome) {
        (RoomState::Idle | RoomState::Live, PollOutcome::Status(LiveStatus::Live { title, stream_url })) => {
            Action::StartCapture {
                title: title.clone(),
                stream_url: stream_url.clone(),
            }
        }
        (RoomState::Recording, PollOutcome::Status(LiveStatus::Live { title, .. })) => {
            Action::RefreshTitle {
                title: title.clone(),
            }
        }
        (RoomState::Recording, PollOutcome::Status(LiveStatus::Offline)) => Action::Finalize,
        (RoomState::Live, PollOutcome::Status(LiveStatus::Offline)) => Action::Flicker,
        (RoomState::Recording, PollOutcome::Error { consecutive_errors }) => {
            if config.finalize_on_poll_errors
                && *consecutive_errors == config.error_finalize_threshold
            {
                Action::Finalize
            } else {
                Action::RecordError
            }
        }
        (_, PollOutcome::Error { .. }) => Action::RecordError,
        // Idle + Offline, and anything seen while Ending. The terminal
        // capture event drives Ending back to Idle, not the poll loop.
        _ => Action::Ignore,
    }
}
