//! Room registry: the authoritative room-ID-to-state mapping.
//!
//! Every other component reads and writes room state through this registry;
//! entries are mutated atomically so concurrent readers never observe a
//! half-updated room.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result};

/// Per-room lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomState {
    /// Not live, not capturing.
    #[default]
    Idle,
    /// Detected live; capture not started yet (transient).
    Live,
    /// Capture in progress.
    Recording,
    /// Stream ended; capture winding down.
    Ending,
}

impl RoomState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Live => "LIVE",
            Self::Recording => "RECORDING",
            Self::Ending => "ENDING",
        }
    }

    /// Whether a capture task belongs to this state.
    pub fn has_capture(&self) -> bool {
        matches!(self, Self::Recording | Self::Ending)
    }
}

impl std::fmt::Display for RoomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitored live-streaming room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    /// Externally assigned room identifier.
    pub room_id: u64,
    /// Display name.
    pub name: String,
    /// Current lifecycle state.
    pub state: RoomState,
    /// Last stream title seen while live.
    pub last_title: Option<String>,
    /// Timestamp of the last completed poll (success or failure).
    pub last_poll: Option<DateTime<Utc>>,
    /// Consecutive poll failures since the last success.
    pub consecutive_errors: u32,
    /// Active recording task, if any. At most one per room.
    pub active_task: Option<Uuid>,
}

impl Room {
    fn new(room_id: u64, name: String) -> Self {
        Self {
            room_id,
            name,
            state: RoomState::Idle,
            last_title: None,
            last_poll: None,
            consecutive_errors: 0,
            active_task: None,
        }
    }
}

/// Thread-safe registry of monitored rooms.
///
/// All mutation goes through the narrow methods below; each locks only the
/// entry it touches.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: DashMap<u64, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a room. Replaces nothing: adding an existing ID is a no-op
    /// that keeps the current state.
    pub fn add(&self, room_id: u64, name: impl Into<String>) {
        self.rooms
            .entry(room_id)
            .or_insert_with(|| Room::new(room_id, name.into()));
    }

    /// Un-monitor a room, returning its final snapshot.
    pub fn remove(&self, room_id: u64) -> Result<Room> {
        self.rooms
            .remove(&room_id)
            .map(|(_, room)| room)
            .ok_or_else(|| Error::not_found("Room", room_id.to_string()))
    }

    /// Snapshot of a single room.
    pub fn get(&self, room_id: u64) -> Result<Room> {
        self.rooms
            .get(&room_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| Error::not_found("Room", room_id.to_string()))
    }

    /// Snapshot of all registered rooms. Order is unspecified.
    pub fn list(&self) -> Vec<Room> {
        self.rooms.iter().map(|entry| entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn contains(&self, room_id: u64) -> bool {
        self.rooms.contains_key(&room_id)
    }

    /// Set the lifecycle state of a room.
    pub fn set_state(&self, room_id: u64, state: RoomState) -> Result<()> {
        self.with_room(room_id, |room| room.state = state)
    }

    /// Set or clear the active-task reference.
    pub fn set_active_task(&self, room_id: u64, task: Option<Uuid>) -> Result<()> {
        self.with_room(room_id, |room| room.active_task = task)
    }

    /// Record a successful poll: stamps the poll time, stores the title
    /// when one was seen, and resets the failure counter.
    pub fn record_poll_success(&self, room_id: u64, title: Option<&str>) -> Result<()> {
        self.with_room(room_id, |room| {
            room.last_poll = Some(Utc::now());
            if let Some(title) = title {
                room.last_title = Some(title.to_string());
            }
            room.consecutive_errors = 0;
        })
    }

    /// Record a failed poll and return the new consecutive failure count.
    pub fn record_poll_error(&self, room_id: u64) -> Result<u32> {
        let mut count = 0;
        self.with_room(room_id, |room| {
            room.last_poll = Some(Utc::now());
            room.consecutive_errors = room.consecutive_errors.saturating_add(1);
            count = room.consecutive_errors;
        })?;
        Ok(count)
    }

    /// Reset the failure counter without touching anything else.
    pub fn clear_errors(&self, room_id: u64) -> Result<()> {
        self.with_room(room_id, |room| room.consecutive_errors = 0)
    }

    fn with_room(&self, room_id: u64, f: impl FnOnce(&mut Room)) -> Result<()> {
        match self.rooms.get_mut(&room_id) {
            Some(mut entry) => {
                f(&mut entry);
                Ok(())
            }
            None => Err(Error::not_found("Room", room_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_get_remove() {
        let registry = RoomRegistry::new();
        registry.add(42, "Test Room");

        let room = registry.get(42).unwrap();
        assert_eq!(room.name, "Test Room");
        assert_eq!(room.state, RoomState::Idle);
        assert!(room.active_task.is_none());

        let removed = registry.remove(42).unwrap();
        assert_eq!(removed.room_id, 42);
        assert!(matches!(registry.get(42), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_add_existing_is_noop() {
        let registry = RoomRegistry::new();
        registry.add(1, "First");
        registry.set_state(1, RoomState::Recording).unwrap();
        registry.add(1, "Second");

        let room = registry.get(1).unwrap();
        assert_eq!(room.name, "First");
        assert_eq!(room.state, RoomState::Recording);
    }

    #[test]
    fn test_unknown_room_is_not_found() {
        let registry = RoomRegistry::new();
        assert!(registry.set_state(9, RoomState::Live).is_err());
        assert!(registry.set_active_task(9, None).is_err());
        assert!(registry.record_poll_error(9).is_err());
        assert!(registry.remove(9).is_err());
    }

    #[test]
    fn test_error_counter_resets_on_success() {
        let registry = RoomRegistry::new();
        registry.add(7, "Flaky");

        assert_eq!(registry.record_poll_error(7).unwrap(), 1);
        assert_eq!(registry.record_poll_error(7).unwrap(), 2);
        registry.record_poll_success(7, Some("Back")).unwrap();

        let room = registry.get(7).unwrap();
        assert_eq!(room.consecutive_errors, 0);
        assert_eq!(room.last_title.as_deref(), Some("Back"));
        assert!(room.last_poll.is_some());
    }

    #[test]
    fn test_active_task_reference() {
        let registry = RoomRegistry::new();
        registry.add(3, "Room");
        let task = Uuid::new_v4();

        registry.set_active_task(3, Some(task)).unwrap();
        assert_eq!(registry.get(3).unwrap().active_task, Some(task));

        registry.set_active_task(3, None).unwrap();
        assert!(registry.get(3).unwrap().active_task.is_none());
    }

    #[test]
    fn test_concurrent_mutation() {
        use std::sync::Arc;

        let registry = Arc::new(RoomRegistry::new());
        for id in 0..8 {
            registry.add(id, format!("room-{id}"));
        }

        let handles: Vec<_> = (0..8)
            .map(|id| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        registry.record_poll_error(id).unwrap();
                        registry.set_state(id, RoomState::Live).unwrap();
                        registry.set_state(id, RoomState::Idle).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 8);
        for room in registry.list() {
            assert_eq!(room.consecutive_errors, 100);
            assert_eq!(room.state, RoomState::Idle);
        }
    }
}
