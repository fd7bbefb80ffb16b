//! Events emitted by the room monitor.
//!
//! Consumers subscribe through [`RoomEventBroadcaster`]; every event is a
//! self-contained snapshot so subscribers never need to reach back into
//! the registry.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::recorder::TaskId;

/// Events emitted by the room monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RoomEvent {
    /// A room went live and a capture was started.
    ///
    /// Emitted exactly once per live session, at the moment the capture
    /// task is committed. `task_id` ties the session to its recorder
    /// events.
    LiveStart {
        room_id: u64,
        room_name: String,
        task_id: TaskId,
        title: String,
        timestamp: DateTime<Utc>,
    },
    /// A live session ended and its capture finished.
    ///
    /// `segments` lists the closed output files in stream order.
    LiveEnd {
        room_id: u64,
        room_name: String,
        task_id: TaskId,
        segments: Vec<PathBuf>,
        timestamp: DateTime<Utc>,
    },
    /// A poll failed; monitoring continues with backoff.
    PollError {
        room_id: u64,
        room_name: String,
        message: String,
        consecutive_errors: u32,
        timestamp: DateTime<Utc>,
    },
}

impl RoomEvent {
    pub fn room_id(&self) -> u64 {
        match self {
            Self::LiveStart { room_id, .. }
            | Self::LiveEnd { room_id, .. }
            | Self::PollError { room_id, .. } => *room_id,
        }
    }

    /// Get a human-readable description of the event.
    pub fn description(&self) -> String {
        match self {
            Self::LiveStart {
                room_name, title, ..
            } => format!("{} is now live: {}", room_name, title),
            Self::LiveEnd {
                room_name,
                segments,
                ..
            } => format!("{} went offline ({} segment(s))", room_name, segments.len()),
            Self::PollError {
                room_name,
                message,
                consecutive_errors,
                ..
            } => format!(
                "{}: {} (attempt {})",
                room_name, message, consecutive_errors
            ),
        }
    }
}

/// Broadcaster for room events.
pub struct RoomEventBroadcaster {
    sender: broadcast::Sender<RoomEvent>,
}

impl RoomEventBroadcaster {
    /// Create a new broadcaster with default capacity (256).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns the number of subscribers reached; a
    /// send with no subscribers is not an error.
    pub fn publish(&self, event: RoomEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for RoomEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for RoomEventBroadcaster {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_description() {
        let event = RoomEvent::LiveStart {
            room_id: 123,
            room_name: "TestRoom".to_string(),
            task_id: TaskId::new_v4(),
            title: "Playing Games".to_string(),
            timestamp: Utc::now(),
        };
        assert!(event.description().contains("TestRoom"));
        assert!(event.description().contains("Playing Games"));
        assert_eq!(event.room_id(), 123);
    }

    #[test]
    fn test_broadcaster_publish_subscribe() {
        let broadcaster = RoomEventBroadcaster::new();
        let mut receiver = broadcaster.subscribe();

        let reached = broadcaster.publish(RoomEvent::LiveEnd {
            room_id: 123,
            room_name: "Test".to_string(),
            task_id: TaskId::new_v4(),
            segments: vec![PathBuf::from("a.flv")],
            timestamp: Utc::now(),
        });
        assert_eq!(reached, 1);

        let received = receiver.try_recv().unwrap();
        assert!(matches!(received, RoomEvent::LiveEnd { .. }));
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let broadcaster = RoomEventBroadcaster::new();
        let reached = broadcaster.publish(RoomEvent::PollError {
            room_id: 1,
            room_name: "Test".to_string(),
            message: "timeout".to_string(),
            consecutive_errors: 1,
            timestamp: Utc::now(),
        });
        assert_eq!(reached, 0);
    }
}
