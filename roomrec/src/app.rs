//! Application wiring.
//!
//! Builds the registry, task manager, monitor, poll supervisor, and
//! post-processor from one [`AppConfig`] and runs the event plumbing
//! between them: closed segments flow to the post-processor, terminal
//! task events settle room state and emit `LiveEnd`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, RecordingMode, RoomEntry};
use crate::monitor::{
    HttpProber, PollSupervisor, RoomEvent, RoomEventBroadcaster, RoomMonitor, RoomProber,
};
use crate::postprocess::{PostProcessor, ProcessRunner, TokioProcessRunner};
use crate::recorder::{HttpStreamSource, RecorderEvent, StreamSource, TaskManager};
use crate::registry::{Room, RoomRegistry};
use crate::reporting::{self, ResourceSampler, RoomStatistics, SystemResources};
use crate::{Error, Result};

/// The assembled engine.
pub struct App {
    config: AppConfig,
    registry: Arc<RoomRegistry>,
    manager: Arc<TaskManager>,
    monitor: Arc<RoomMonitor>,
    supervisor: PollSupervisor,
    postprocessor: Arc<PostProcessor>,
    sampler: Arc<ResourceSampler>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl App {
    /// Build with the production prober, stream source, and process
    /// runner.
    pub fn new(config: AppConfig) -> Result<Self> {
        let prober = Arc::new(HttpProber::new(
            config.monitor.api_base_url.clone(),
            Duration::from_secs(config.monitor.request_timeout_secs),
        )?);
        let source = Arc::new(HttpStreamSource::new()?);
        Self::with_parts(config, prober, source, Arc::new(TokioProcessRunner))
    }

    /// Build with injected I/O edges.
    pub fn with_parts(
        config: AppConfig,
        prober: Arc<dyn RoomProber>,
        source: Arc<dyn StreamSource>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Result<Self> {
        let registry = Arc::new(RoomRegistry::new());
        let manager = Arc::new(TaskManager::new(config.recorder.clone(), source));
        let monitor = Arc::new(RoomMonitor::new(
            registry.clone(),
            manager.clone(),
            RoomEventBroadcaster::new(),
            config.monitor.clone(),
        ));
        let supervisor = PollSupervisor::new(
            registry.clone(),
            monitor.clone(),
            prober,
            config.monitor.clone(),
        );
        let postprocessor = Arc::new(PostProcessor::new(
            config.postprocess.clone(),
            runner,
        ));

        // State settling and segment handoff ride the manager's lossless
        // stream; the broadcast side stays available for observers.
        let events = manager
            .take_events()
            .ok_or_else(|| Error::Other("recorder event stream already taken".to_string()))?;
        let consumer = tokio::spawn(Self::consume_recorder_events(
            events,
            monitor.clone(),
            postprocessor.clone(),
        ));

        Ok(Self {
            config,
            registry,
            manager,
            monitor,
            supervisor,
            postprocessor,
            sampler: ResourceSampler::new(),
            consumer: Mutex::new(Some(consumer)),
        })
    }

    /// Start monitoring every room from the configuration.
    pub fn start(&self) -> Result<()> {
        info!(rooms = self.config.rooms.len(), "starting room monitoring");
        for entry in &self.config.rooms {
            let name = if entry.name.is_empty() {
                entry.id.to_string()
            } else {
                entry.name.clone()
            };
            self.supervisor
                .add_room(entry.id, &name, self.pre_open_wait(entry))?;
        }
        Ok(())
    }

    fn pre_open_wait(&self, entry: &RoomEntry) -> Duration {
        match self.config.recorder.mode {
            RecordingMode::Hls => Duration::from_secs(self.config.hls_wait_for(entry)),
            RecordingMode::Flv => Duration::ZERO,
        }
    }

    /// Start monitoring one room at runtime.
    pub fn add_room(&self, id: u64, name: &str, hls_wait_secs: Option<u64>) -> Result<()> {
        let entry = RoomEntry {
            id,
            name: name.to_string(),
            hls_wait_secs,
        };
        self.supervisor.add_room(id, name, self.pre_open_wait(&entry))
    }

    /// Stop monitoring one room. An active capture is finalized.
    pub fn remove_room(&self, id: u64) -> Result<Room> {
        let room = self.supervisor.remove_room(id)?;
        if let Some(task_id) = room.active_task {
            if self.manager.stop(task_id).is_err() {
                debug!(room_id = id, %task_id, "task already finished");
            }
        }
        Ok(room)
    }

    /// Subscribe to room events.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.monitor.events().subscribe()
    }

    pub fn statistics(&self) -> RoomStatistics {
        reporting::room_statistics(&self.registry, &self.manager)
    }

    pub fn resources(&self) -> SystemResources {
        self.sampler.sample(&self.config.recorder.output_root)
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    async fn consume_recorder_events(
        mut events: mpsc::UnboundedReceiver<RecorderEvent>,
        monitor: Arc<RoomMonitor>,
        postprocessor: Arc<PostProcessor>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                RecorderEvent::SegmentClosed { segment, .. } => {
                    if let Err(e) = postprocessor.dispatch(segment.path.clone()).await {
                        warn!(path = %segment.path.display(), "dispatch failed: {e}");
                    }
                }
                RecorderEvent::TaskFinished {
                    task_id,
                    room_id,
                    outcome,
                    segments,
                } => {
                    let paths = segments.into_iter().map(|s| s.path).collect();
                    if let Err(e) = monitor.handle_task_finished(room_id, task_id, &outcome, paths)
                    {
                        // Room was removed while its task was finishing.
                        debug!(room_id, "finish handling skipped: {e}");
                    }
                }
                RecorderEvent::TaskStarted { .. } => {}
            }
        }
    }

    /// Orderly shutdown: stop polling, finalize captures within the
    /// configured deadline, flush the post-processing queue.
    pub async fn shutdown(&self) {
        info!("shutting down");
        let deadline = Duration::from_secs(self.config.shutdown_timeout_secs);
        self.supervisor.shutdown();
        self.manager.stop_all();
        self.manager.wait_idle(deadline).await;

        // Closing the intake ends the consumer's stream once the final
        // terminal events are processed; awaiting it makes the handoff
        // to the post-processor complete before its intake closes.
        self.manager.close_events();
        let consumer = self.consumer.lock().take();
        if let Some(mut consumer) = consumer {
            if tokio::time::timeout(deadline, &mut consumer).await.is_err() {
                warn!("event consumer did not drain in time");
                consumer.abort();
            }
        }
        self.postprocessor.shutdown().await;
        info!("shutdown complete");
    }
}
