//! Room monitor service.
//!
//! Takes poll results for a room, runs them through the lifecycle
//! decision function, and executes the resulting action against the
//! registry, task manager, and event broadcaster. One poll loop drives
//! each room, so per-room transitions are strictly sequential.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::monitor::events::{RoomEvent, RoomEventBroadcaster};
use crate::monitor::lifecycle::{self, Action, PollOutcome};
use crate::monitor::prober::LiveStatus;
use crate::recorder::{CaptureRequest, TaskId, TaskManager, TaskOutcome};
use crate::registry::{Room, RoomRegistry, RoomState};
use crate::{Error, Result};

/// Executes lifecycle decisions for monitored rooms.
pub struct RoomMonitor {
    registry: Arc<RoomRegistry>,
    manager: Arc<TaskManager>,
    broadcaster: RoomEventBroadcaster,
    config: MonitorConfig,
}

impl RoomMonitor {
    pub fn new(
        registry: Arc<RoomRegistry>,
        manager: Arc<TaskManager>,
        broadcaster: RoomEventBroadcaster,
        config: MonitorConfig,
    ) -> Self {
        Self {
            registry,
            manager,
            broadcaster,
            config,
        }
    }

    pub fn events(&self) -> &RoomEventBroadcaster {
        &self.broadcaster
    }

    /// Process one poll result for a room.
    ///
    /// `pre_open_wait` is forwarded to any capture this poll starts.
    pub async fn handle_poll(
        &self,
        room_id: u64,
        result: Result<LiveStatus>,
        pre_open_wait: Duration,
    ) -> Result<()> {
        let room = self.registry.get(room_id)?;

        let outcome = match result {
            Ok(status) => {
                self.registry.record_poll_success(room_id, status.title())?;
                PollOutcome::Status(status)
            }
            Err(e) => {
                let consecutive_errors = self.registry.record_poll_error(room_id)?;
                self.broadcaster.publish(RoomEvent::PollError {
                    room_id,
                    room_name: room.name.clone(),
                    message: e.to_string(),
                    consecutive_errors,
                    timestamp: Utc::now(),
                });
                PollOutcome::Error { consecutive_errors }
            }
        };

        let action = lifecycle::decide(room.state, &outcome, &self.config);
        self.apply(room, action, pre_open_wait)
    }

    fn apply(&self, room: Room, action: Action, pre_open_wait: Duration) -> Result<()> {
        match action {
            Action::StartCapture { title, stream_url } => {
                self.start_capture(room, title, stream_url, pre_open_wait)
            }
            Action::RefreshTitle { title } => {
                // The title itself was stored with the poll result.
                debug!(room_id = room.room_id, title, "title refreshed");
                Ok(())
            }
            Action::Finalize => self.finalize(room),
            Action::Flicker => {
                debug!(room_id = room.room_id, "live flicker, back to idle");
                self.registry.set_state(room.room_id, RoomState::Idle)
            }
            Action::RecordError | Action::Ignore => Ok(()),
        }
    }

    fn start_capture(
        &self,
        room: Room,
        title: String,
        stream_url: String,
        pre_open_wait: Duration,
    ) -> Result<()> {
        self.registry.set_state(room.room_id, RoomState::Live)?;

        let request = CaptureRequest {
            room_id: room.room_id,
            room_name: room.name.clone(),
            title: title.clone(),
            stream_url,
            pre_open_wait,
        };
        match self.manager.start(request) {
            Ok(task_id) => {
                self.registry.set_state(room.room_id, RoomState::Recording)?;
                self.registry.set_active_task(room.room_id, Some(task_id))?;
                info!(room_id = room.room_id, name = %room.name, %title, "recording started");
                self.broadcaster.publish(RoomEvent::LiveStart {
                    room_id: room.room_id,
                    room_name: room.name,
                    task_id,
                    title,
                    timestamp: Utc::now(),
                });
                Ok(())
            }
            Err(Error::CapacityExceeded) => {
                // Stay in Live; the next poll retries the start.
                warn!(
                    room_id = room.room_id,
                    "recording slots exhausted, will retry"
                );
                Ok(())
            }
            Err(Error::AlreadyActive { .. }) => {
                warn!(
                    room_id = room.room_id,
                    "capture already active, repairing state"
                );
                self.registry.set_state(room.room_id, RoomState::Recording)?;
                // Point the room back at the running task so a later
                // finalize can reach it.
                self.registry
                    .set_active_task(room.room_id, self.manager.task_for_room(room.room_id))
            }
            Err(e) => {
                error!(room_id = room.room_id, "failed to start capture: {e}");
                self.registry.set_state(room.room_id, RoomState::Idle)
            }
        }
    }

    fn finalize(&self, room: Room) -> Result<()> {
        match room.active_task {
            Some(task_id) => {
                self.registry.set_state(room.room_id, RoomState::Ending)?;
                info!(room_id = room.room_id, %task_id, "finalizing recording");
                if self.manager.stop(task_id).is_err() {
                    // The task finished on its own between the poll and
                    // the stop request; the terminal event settles state.
                    debug!(room_id = room.room_id, %task_id, "task already gone");
                }
                Ok(())
            }
            None => {
                warn!(room_id = room.room_id, "finalize without active task");
                self.registry.set_state(room.room_id, RoomState::Idle)
            }
        }
    }

    /// Settle a room after its capture task finished. Emits the
    /// session's single `LiveEnd`.
    pub fn handle_task_finished(
        &self,
        room_id: u64,
        task_id: TaskId,
        outcome: &TaskOutcome,
        segment_paths: Vec<PathBuf>,
    ) -> Result<()> {
        let room = self.registry.get(room_id)?;
        self.registry.set_active_task(room_id, None)?;
        self.registry.set_state(room_id, RoomState::Idle)?;

        if outcome.is_failed() {
            warn!(room_id, ?outcome, "recording ended abnormally");
        }
        self.broadcaster.publish(RoomEvent::LiveEnd {
            room_id,
            room_name: room.name,
            task_id,
            segments: segment_paths,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
