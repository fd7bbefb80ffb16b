//! Recording task manager.
//!
//! Owns the global capture slots, spawns one worker per task, and fans
//! worker messages out to subscribers as [`RecorderEvent`]s. Slot
//! accounting is tied to the task map entry: removing the entry drops
//! the semaphore permit, so a slot can never leak, including when a
//! worker dies without reporting.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RecorderConfig;
use crate::recorder::task::{
    CaptureRequest, RecorderEvent, TaskId, TaskOutcome, WorkerMessage,
};
use crate::recorder::worker::{CaptureWorker, StreamSource};
use crate::{Error, Result};

struct ActiveTask {
    room_id: u64,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
    started_at: DateTime<Utc>,
    /// Held for the task's lifetime; dropped with the entry.
    _permit: OwnedSemaphorePermit,
}

/// Manages all capture tasks.
pub struct TaskManager {
    config: RecorderConfig,
    source: Arc<dyn StreamSource>,
    active: Arc<DashMap<TaskId, ActiveTask>>,
    slots: Arc<Semaphore>,
    event_tx: broadcast::Sender<RecorderEvent>,
    control_tx: Mutex<Option<mpsc::UnboundedSender<RecorderEvent>>>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<RecorderEvent>>>,
}

impl TaskManager {
    pub fn new(config: RecorderConfig, source: Arc<dyn StreamSource>) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_recordings));
        let (event_tx, _) = broadcast::channel(256);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        Self {
            config,
            source,
            active: Arc::new(DashMap::new()),
            slots,
            event_tx,
            control_tx: Mutex::new(Some(control_tx)),
            control_rx: Mutex::new(Some(control_rx)),
        }
    }

    /// Subscribe to recorder events. Broadcast delivery can drop events
    /// under lag; state-settling consumers use [`Self::take_events`].
    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.event_tx.subscribe()
    }

    /// Take the lossless event stream. Every event of every task is
    /// delivered exactly once, in order. Can only be taken once.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<RecorderEvent>> {
        self.control_rx.lock().take()
    }

    /// Close the lossless stream's intake. Once running tasks finish,
    /// the receiver drains and ends. New tasks no longer report to it.
    pub fn close_events(&self) {
        self.control_tx.lock().take();
    }

    /// Number of tasks currently holding a slot.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// The active task recording a room, if any.
    pub fn task_for_room(&self, room_id: u64) -> Option<TaskId> {
        self.active
            .iter()
            .find(|entry| entry.room_id == room_id)
            .map(|entry| *entry.key())
    }

    /// Start a capture task.
    ///
    /// Fails fast with [`Error::CapacityExceeded`] when every slot is
    /// taken, and with [`Error::AlreadyActive`] when the room already
    /// has a task. Never blocks waiting for a slot.
    pub fn start(&self, request: CaptureRequest) -> Result<TaskId> {
        if self
            .active
            .iter()
            .any(|entry| entry.room_id == request.room_id)
        {
            return Err(Error::AlreadyActive {
                room_id: request.room_id,
            });
        }

        let permit = self
            .slots
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::CapacityExceeded)?;

        let task_id = TaskId::new_v4();
        let room_id = request.room_id;
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<WorkerMessage>(32);

        let worker = CaptureWorker::new(
            task_id,
            request,
            self.config.clone(),
            cancel.clone(),
            tx,
        );
        let source = self.source.clone();
        let worker_handle = tokio::spawn(worker.run(source));

        self.active.insert(
            task_id,
            ActiveTask {
                room_id,
                cancel,
                worker: worker_handle,
                started_at: Utc::now(),
                _permit: permit,
            },
        );

        // The forwarder owns the task's lifecycle end: it republishes
        // worker messages and removes the map entry on the terminal one.
        tokio::spawn(Self::forward_events(
            task_id,
            room_id,
            rx,
            self.active.clone(),
            self.event_tx.clone(),
            self.control_tx.lock().clone(),
        ));

        info!(task_id = %task_id, room_id, "capture task started");
        Ok(task_id)
    }

    async fn forward_events(
        task_id: TaskId,
        room_id: u64,
        mut rx: mpsc::Receiver<WorkerMessage>,
        active: Arc<DashMap<TaskId, ActiveTask>>,
        event_tx: broadcast::Sender<RecorderEvent>,
        control_tx: Option<mpsc::UnboundedSender<RecorderEvent>>,
    ) {
        let publish = |event: RecorderEvent| {
            if let Some(tx) = &control_tx {
                let _ = tx.send(event.clone());
            }
            let _ = event_tx.send(event);
        };

        let mut segments = Vec::new();
        let mut outcome = None;

        while let Some(message) = rx.recv().await {
            match message {
                WorkerMessage::Started => {
                    publish(RecorderEvent::TaskStarted { task_id, room_id });
                }
                WorkerMessage::SegmentClosed(info) => {
                    debug!(task_id = %task_id, path = %info.path.display(), "segment closed");
                    segments.push(info.clone());
                    publish(RecorderEvent::SegmentClosed {
                        task_id,
                        room_id,
                        segment: info,
                    });
                }
                WorkerMessage::Finished(o) => {
                    outcome = Some(o);
                    break;
                }
            }
        }

        // A closed channel without a terminal message means the worker
        // died or was aborted; its completed segments are still real.
        let outcome = outcome.unwrap_or_else(|| {
            warn!(task_id = %task_id, room_id, "worker ended without terminal message");
            TaskOutcome::Failed {
                error: "worker ended unexpectedly".to_string(),
            }
        });

        // Remove before publishing so the slot is free by the time
        // subscribers observe the finish.
        active.remove(&task_id);
        publish(RecorderEvent::TaskFinished {
            task_id,
            room_id,
            outcome,
            segments,
        });
    }

    /// Request a graceful stop. The task finalizes asynchronously and
    /// reports through [`RecorderEvent::TaskFinished`].
    pub fn stop(&self, task_id: TaskId) -> Result<()> {
        match self.active.get(&task_id) {
            Some(entry) => {
                entry.cancel.cancel();
                Ok(())
            }
            None => Err(Error::not_found("Task", task_id.to_string())),
        }
    }

    /// Request a graceful stop of every active task.
    pub fn stop_all(&self) {
        for entry in self.active.iter() {
            entry.cancel.cancel();
        }
    }

    /// Wait until all tasks have finished, up to `deadline`. Stragglers
    /// are aborted; their forwarders still publish a terminal event with
    /// the segments closed so far.
    pub async fn wait_idle(&self, deadline: Duration) {
        let poll = Duration::from_millis(50);
        let started = tokio::time::Instant::now();
        while !self.active.is_empty() && started.elapsed() < deadline {
            tokio::time::sleep(poll).await;
        }

        if !self.active.is_empty() {
            warn!(
                remaining = self.active.len(),
                "shutdown deadline reached, aborting remaining tasks"
            );
            for entry in self.active.iter() {
                entry.worker.abort();
            }
            // Aborting drops the worker's sender; each forwarder then
            // removes its entry and publishes a Failed terminal event.
            while !self.active.is_empty() {
                tokio::time::sleep(poll).await;
            }
        }
    }

    /// How long a task has been running, if it is still active.
    pub fn task_uptime(&self, task_id: TaskId) -> Option<chrono::Duration> {
        self.active
            .get(&task_id)
            .map(|entry| Utc::now() - entry.started_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingMode;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::StreamExt;
    use futures::stream::{self, BoxStream};

    /// Yields chunks forever, one every few milliseconds.
    struct EndlessSource;

    #[async_trait]
    impl StreamSource for EndlessSource {
        async fn open(&self, _url: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
            Ok(stream::unfold(0u64, |n| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Some((Ok(Bytes::from(vec![0u8; 64])), n + 1))
            })
            .boxed())
        }
    }

    /// Yields a couple of chunks, then ends.
    struct ShortSource;

    #[async_trait]
    impl StreamSource for ShortSource {
        async fn open(&self, _url: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
            Ok(stream::iter(vec![
                Ok(Bytes::from_static(b"abc")),
                Ok(Bytes::from_static(b"def")),
            ])
            .boxed())
        }
    }

    fn config(root: &std::path::Path, slots: usize) -> RecorderConfig {
        RecorderConfig {
            mode: RecordingMode::Flv,
            max_concurrent_recordings: slots,
            output_root: root.to_path_buf(),
            folder_template: "{roomid}".to_string(),
            file_template: "{roomid}_{date}_{time}".to_string(),
            ..RecorderConfig::default()
        }
    }

    fn request(room_id: u64) -> CaptureRequest {
        CaptureRequest {
            room_id,
            room_name: format!("room-{room_id}"),
            title: "t".to_string(),
            stream_url: "https://example.com/x.flv".to_string(),
            pre_open_wait: Duration::ZERO,
        }
    }

    async fn wait_for_finish(
        rx: &mut broadcast::Receiver<RecorderEvent>,
        task_id: TaskId,
    ) -> (TaskOutcome, Vec<crate::recorder::task::SegmentInfo>) {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("event channel closed")
            {
                RecorderEvent::TaskFinished {
                    task_id: id,
                    outcome,
                    segments,
                    ..
                } if id == task_id => return (outcome, segments),
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_capacity_fail_fast_then_recover() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TaskManager::new(config(dir.path(), 1), Arc::new(EndlessSource));
        let mut events = manager.subscribe();

        let first = manager.start(request(1)).unwrap();
        assert_eq!(manager.active_count(), 1);

        // Second room is rejected immediately, no queueing.
        assert!(matches!(
            manager.start(request(2)),
            Err(Error::CapacityExceeded)
        ));

        manager.stop(first).unwrap();
        let (outcome, _) = wait_for_finish(&mut events, first).await;
        assert_eq!(outcome, TaskOutcome::Completed);

        // Slot was reclaimed; the same request now succeeds.
        let second = manager.start(request(2)).unwrap();
        assert_eq!(manager.active_count(), 1);
        manager.stop(second).unwrap();
        wait_for_finish(&mut events, second).await;
    }

    #[tokio::test]
    async fn test_duplicate_room_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TaskManager::new(config(dir.path(), 4), Arc::new(EndlessSource));
        let mut events = manager.subscribe();

        let task = manager.start(request(7)).unwrap();
        assert_eq!(manager.task_for_room(7), Some(task));
        assert_eq!(manager.task_for_room(8), None);
        assert!(matches!(
            manager.start(request(7)),
            Err(Error::AlreadyActive { room_id: 7 })
        ));

        manager.stop(task).unwrap();
        wait_for_finish(&mut events, task).await;
    }

    #[tokio::test]
    async fn test_natural_stream_end_publishes_segments() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TaskManager::new(config(dir.path(), 2), Arc::new(ShortSource));
        let mut events = manager.subscribe();

        let task = manager.start(request(3)).unwrap();
        let (outcome, segments) = wait_for_finish(&mut events, task).await;

        assert_eq!(outcome, TaskOutcome::Completed);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].size_bytes, 6);
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_unknown_task() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TaskManager::new(config(dir.path(), 1), Arc::new(ShortSource));
        assert!(manager.stop(TaskId::new_v4()).is_err());
    }

    #[tokio::test]
    async fn test_stop_all_and_wait_idle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TaskManager::new(config(dir.path(), 4), Arc::new(EndlessSource));
        let mut events = manager.subscribe();

        for room in 1..=3 {
            manager.start(request(room)).unwrap();
        }
        assert_eq!(manager.active_count(), 3);

        manager.stop_all();
        manager.wait_idle(Duration::from_secs(5)).await;
        assert_eq!(manager.active_count(), 0);

        // Every task produced exactly one terminal event.
        let mut finished = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, RecorderEvent::TaskFinished { .. }) {
                finished += 1;
            }
        }
        assert_eq!(finished, 3);
    }

    #[tokio::test]
    async fn test_lossless_stream_delivers_every_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TaskManager::new(config(dir.path(), 4), Arc::new(ShortSource));
        let mut control = manager.take_events().unwrap();
        assert!(manager.take_events().is_none());

        // No broadcast subscriber exists; terminal delivery must not
        // depend on one.
        for room in 1..=3 {
            manager.start(request(room)).unwrap();
        }

        let mut finished = 0;
        while finished < 3 {
            let event = tokio::time::timeout(Duration::from_secs(5), control.recv())
                .await
                .expect("timed out waiting for terminal events")
                .expect("event stream closed early");
            if let RecorderEvent::TaskFinished { outcome, .. } = event {
                assert_eq!(outcome, TaskOutcome::Completed);
                finished += 1;
            }
        }

        // Closing the intake ends the drained stream.
        manager.close_events();
        assert!(control.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_wait_idle_aborts_stragglers() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TaskManager::new(config(dir.path(), 1), Arc::new(EndlessSource));
        let mut events = manager.subscribe();

        let task = manager.start(request(9)).unwrap();
        // No stop request; the deadline forces an abort.
        manager.wait_idle(Duration::from_millis(200)).await;
        assert_eq!(manager.active_count(), 0);

        let (outcome, _) = wait_for_finish(&mut events, task).await;
        assert!(outcome.is_failed());
    }
}
