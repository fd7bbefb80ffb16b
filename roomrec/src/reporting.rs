//! Runtime statistics for status reporting.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Disks, MemoryRefreshKind, RefreshKind, System};

use crate::recorder::TaskManager;
use crate::registry::{RoomRegistry, RoomState};

/// Counts of rooms by activity, for the periodic status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoomStatistics {
    /// Rooms under monitoring.
    pub monitoring: usize,
    /// Rooms observed live (capturing or waiting for a slot).
    pub live: usize,
    /// Rooms with an active capture task.
    pub recording: usize,
}

/// Compute room statistics from the registry and task manager.
pub fn room_statistics(registry: &RoomRegistry, manager: &TaskManager) -> RoomStatistics {
    let rooms = registry.list();
    let live = rooms
        .iter()
        .filter(|room| room.state != RoomState::Idle)
        .count();
    RoomStatistics {
        monitoring: rooms.len(),
        live,
        recording: manager.active_count(),
    }
}

/// Point-in-time system resource snapshot.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SystemResources {
    pub used_memory_bytes: u64,
    pub total_memory_bytes: u64,
    /// Free space on the disk holding the output root, if resolvable.
    pub output_disk_free_bytes: Option<u64>,
}

impl SystemResources {
    pub fn used_memory_mib(&self) -> u64 {
        self.used_memory_bytes / (1024 * 1024)
    }
}

/// Samples memory and disk usage. Refresh state is cached between
/// samples.
pub struct ResourceSampler {
    system: Mutex<System>,
    disks: Mutex<Disks>,
}

impl ResourceSampler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            system: Mutex::new(System::new_with_specifics(
                RefreshKind::nothing().with_memory(MemoryRefreshKind::everything()),
            )),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
        })
    }

    pub fn sample(&self, output_root: &Path) -> SystemResources {
        let (used, total) = {
            let mut system = self.system.lock();
            system.refresh_memory();
            (system.used_memory(), system.total_memory())
        };
        let free = self.output_disk_free(output_root);
        SystemResources {
            used_memory_bytes: used,
            total_memory_bytes: total,
            output_disk_free_bytes: free,
        }
    }

    /// Free space on the disk whose mount point is the longest prefix
    /// of `path`.
    fn output_disk_free(&self, path: &Path) -> Option<u64> {
        let mut disks = self.disks.lock();
        disks.refresh(true);

        let path_str = path.to_string_lossy();
        let mut best: Option<(u64, usize)> = None;
        for disk in disks.list() {
            let mount = disk.mount_point().to_string_lossy();
            if path_str.starts_with(mount.as_ref()) {
                let len = mount.len();
                if best.is_none_or(|(_, best_len)| len > best_len) {
                    best = Some((disk.available_space(), len));
                }
            }
        }
        best.map(|(free, _)| free)
    }
}
