//! Poll supervision.
//!
//! One cancellable loop per room drives its polls: probe, hand the
//! result to the monitor service, sleep, repeat. Failed probes back the
//! loop off exponentially up to a cap; a global semaphore bounds how
//! many probes are in flight at once.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::monitor::prober::RoomProber;
use crate::monitor::service::RoomMonitor;
use crate::registry::{Room, RoomRegistry};
use crate::{Error, Result};

/// Delay before the next poll after `consecutive_errors` failures.
///
/// Doubles per failure from the base interval, capped at `max`.
fn backoff_delay(base: Duration, consecutive_errors: u32, max: Duration) -> Duration {
    if consecutive_errors == 0 {
        return base;
    }
    let exp = consecutive_errors.min(16);
    base.saturating_mul(2u32.saturating_pow(exp)).min(max)
}

/// Spawns and owns the per-room poll loops.
pub struct PollSupervisor {
    registry: Arc<RoomRegistry>,
    monitor: Arc<RoomMonitor>,
    prober: Arc<dyn RoomProber>,
    config: MonitorConfig,
    probe_slots: Arc<Semaphore>,
    loops: DashMap<u64, CancellationToken>,
    shutdown: CancellationToken,
}

impl PollSupervisor {
    pub fn new(
        registry: Arc<RoomRegistry>,
        monitor: Arc<RoomMonitor>,
        prober: Arc<dyn RoomProber>,
        config: MonitorConfig,
    ) -> Self {
        let probe_slots = Arc::new(Semaphore::new(config.max_concurrent_polls));
        Self {
            registry,
            monitor,
            prober,
            config,
            probe_slots,
            loops: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start monitoring a room. The first poll happens immediately.
    ///
    /// `pre_open_wait` is the delay any capture for this room applies
    /// before opening the stream.
    pub fn add_room(&self, room_id: u64, name: &str, pre_open_wait: Duration) -> Result<()> {
        if self.loops.contains_key(&room_id) {
            return Err(Error::AlreadyActive { room_id });
        }
        self.registry.add(room_id, name);

        let token = self.shutdown.child_token();
        self.loops.insert(room_id, token.clone());
        info!(room_id, name, "monitoring started");

        tokio::spawn(Self::poll_loop(
            room_id,
            pre_open_wait,
            self.monitor.clone(),
            self.prober.clone(),
            self.config.clone(),
            self.probe_slots.clone(),
            token,
        ));
        Ok(())
    }

    /// Stop monitoring a room. Returns its final registry snapshot.
    ///
    /// A capture in flight is not interrupted here; the caller decides
    /// whether to stop the task as well.
    pub fn remove_room(&self, room_id: u64) -> Result<Room> {
        let (_, token) = self
            .loops
            .remove(&room_id)
            .ok_or_else(|| Error::not_found("Room", room_id.to_string()))?;
        token.cancel();
        let room = self.registry.remove(room_id)?;
        info!(room_id, "monitoring stopped");
        Ok(room)
    }

    /// Number of rooms with a running poll loop.
    pub fn monitored_count(&self) -> usize {
        self.loops.len()
    }

    /// Stop all poll loops. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.loops.clear();
    }

    async fn poll_loop(
        room_id: u64,
        pre_open_wait: Duration,
        monitor: Arc<RoomMonitor>,
        prober: Arc<dyn RoomProber>,
        config: MonitorConfig,
        probe_slots: Arc<Semaphore>,
        token: CancellationToken,
    ) {
        let base = Duration::from_secs(config.poll_interval_secs);
        let max_backoff = Duration::from_secs(config.error_backoff_max_secs);
        let mut consecutive_errors = 0u32;

        loop {
            let result = {
                let _permit = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    permit = probe_slots.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    result = prober.probe(room_id) => result,
                }
            };

            consecutive_errors = match &result {
                Ok(_) => 0,
                Err(e) => {
                    debug!(room_id, "poll failed: {e}");
                    consecutive_errors.saturating_add(1)
                }
            };

            if let Err(e) = monitor.handle_poll(room_id, result, pre_open_wait).await {
                // The room vanished from the registry under us.
                warn!(room_id, "poll loop stopping: {e}");
                break;
            }

            let delay = backoff_delay(base, consecutive_errors, max_backoff);
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!(room_id, "poll loop exited");
    }
}
