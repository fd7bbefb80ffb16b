//! Capture worker: pulls one byte stream and writes segment files.
//!
//! A worker owns exactly one capture task. It reads chunks from a
//! [`StreamSource`], appends them to the current segment file, and
//! rotates to a new file when the configured size or duration cutoff is
//! reached. Rotation happens only at chunk boundaries, so concatenating
//! the segments of a session reproduces the stream byte-for-byte.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RecorderConfig;
use crate::naming::NamingContext;
use crate::recorder::task::{CaptureRequest, SegmentInfo, TaskId, TaskOutcome, WorkerMessage};
use crate::{Error, Result};

/// Source of raw stream bytes. Injectable so tests feed synthetic data.
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn open(&self, url: &str) -> Result<BoxStream<'static, Result<Bytes>>>;
}

/// [`StreamSource`] over plain HTTP, for FLV and HLS media endpoints.
pub struct HttpStreamSource {
    client: reqwest::Client,
}

impl HttpStreamSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StreamSource for HttpStreamSource {
    async fn open(&self, url: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes_stream().map_err(Error::from).boxed())
    }
}

/// One open segment file plus its counters.
struct OpenSegment {
    file: File,
    path: PathBuf,
    index: u32,
    bytes: u64,
    opened_at: Instant,
}

/// Runs one capture task to completion.
pub struct CaptureWorker {
    task_id: TaskId,
    request: CaptureRequest,
    config: RecorderConfig,
    naming: NamingContext,
    cancel: CancellationToken,
    tx: mpsc::Sender<WorkerMessage>,
}

impl CaptureWorker {
    pub(crate) fn new(
        task_id: TaskId,
        request: CaptureRequest,
        config: RecorderConfig,
        cancel: CancellationToken,
        tx: mpsc::Sender<WorkerMessage>,
    ) -> Self {
        let naming = NamingContext::new(
            request.room_id,
            request.room_name.clone(),
            request.title.clone(),
        );
        Self {
            task_id,
            request,
            config,
            naming,
            cancel,
            tx,
        }
    }

    /// Drive the capture until the stream ends, a stop is requested, or
    /// an error occurs. Always sends exactly one terminal message.
    pub(crate) async fn run(self, source: Arc<dyn StreamSource>) {
        let outcome = self.capture(source).await;
        if outcome.is_failed() {
            warn!(task_id = %self.task_id, room_id = self.request.room_id, ?outcome, "capture ended");
        } else {
            info!(task_id = %self.task_id, room_id = self.request.room_id, "capture completed");
        }
        let _ = self.tx.send(WorkerMessage::Finished(outcome)).await;
    }

    async fn capture(&self, source: Arc<dyn StreamSource>) -> TaskOutcome {
        if !self.request.pre_open_wait.is_zero() {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return TaskOutcome::Completed,
                _ = tokio::time::sleep(self.request.pre_open_wait) => {}
            }
        }

        let mut stream = match source.open(&self.request.stream_url).await {
            Ok(stream) => stream,
            Err(e) => {
                return TaskOutcome::Failed {
                    error: format!("failed to open stream: {e}"),
                };
            }
        };

        let mut segment = match self.open_segment(0).await {
            Ok(segment) => segment,
            Err(e) => {
                return TaskOutcome::Failed {
                    error: format!("failed to open segment file: {e}"),
                };
            }
        };
        let _ = self.tx.send(WorkerMessage::Started).await;

        let read_timeout = Duration::from_secs(self.config.read_timeout_secs);
        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(task_id = %self.task_id, "stop requested");
                    self.close_segment(segment).await;
                    return TaskOutcome::Completed;
                }
                next = timeout(read_timeout, stream.next()) => match next {
                    Err(_) => {
                        self.close_segment(segment).await;
                        return TaskOutcome::Failed {
                            error: format!("no data for {}s", read_timeout.as_secs()),
                        };
                    }
                    Ok(None) => {
                        self.close_segment(segment).await;
                        return TaskOutcome::Completed;
                    }
                    Ok(Some(Err(e))) => {
                        self.close_segment(segment).await;
                        return TaskOutcome::Failed {
                            error: format!("stream error: {e}"),
                        };
                    }
                    Ok(Some(Ok(chunk))) => chunk,
                },
            };

            if let Err(e) = segment.file.write_all(&chunk).await {
                self.close_segment(segment).await;
                return TaskOutcome::Failed {
                    error: format!("write error: {e}"),
                };
            }
            segment.bytes += chunk.len() as u64;

            // Rotation is checked only after a full chunk has been
            // written, never mid-chunk.
            if self.should_rotate(&segment) {
                let next_index = segment.index + 1;
                self.close_segment(segment).await;
                segment = match self.open_segment(next_index).await {
                    Ok(segment) => segment,
                    Err(e) => {
                        return TaskOutcome::Failed {
                            error: format!("failed to rotate segment: {e}"),
                        };
                    }
                };
            }
        }
    }

    fn should_rotate(&self, segment: &OpenSegment) -> bool {
        let by_size =
            self.config.cut_size_bytes > 0 && segment.bytes >= self.config.cut_size_bytes;
        let by_time = self.config.cut_duration_secs > 0
            && segment.opened_at.elapsed().as_secs() >= self.config.cut_duration_secs;
        by_size || by_time
    }

    async fn open_segment(&self, index: u32) -> Result<OpenSegment> {
        let path = self.naming.segment_path(
            &self.config.output_root,
            &self.config.folder_template,
            &self.config.file_template,
            self.config.mode.extension(),
            index,
        );
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(&path).await?;
        debug!(task_id = %self.task_id, path = %path.display(), index, "segment opened");
        Ok(OpenSegment {
            file,
            path,
            index,
            bytes: 0,
            opened_at: Instant::now(),
        })
    }

    /// Flush and close the segment, reporting it upstream. An empty
    /// segment is deleted instead of reported.
    async fn close_segment(&self, mut segment: OpenSegment) {
        if let Err(e) = segment.file.flush().await {
            warn!(path = %segment.path.display(), "flush failed: {e}");
        }
        if let Err(e) = segment.file.sync_all().await {
            warn!(path = %segment.path.display(), "sync failed: {e}");
        }
        drop(segment.file);

        if segment.bytes == 0 {
            let _ = tokio::fs::remove_file(&segment.path).await;
            return;
        }

        let info = SegmentInfo {
            path: segment.path,
            index: segment.index,
            size_bytes: segment.bytes,
            duration_secs: segment.opened_at.elapsed().as_secs_f64(),
            closed_at: Utc::now(),
        };
        let _ = self.tx.send(WorkerMessage::SegmentClosed(info)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingMode;
    use futures::stream;
    use uuid::Uuid;

    /// Emits a fixed chunk sequence, then optionally hangs.
    struct FakeSource {
        chunks: Vec<Bytes>,
        hang_at_end: bool,
    }

    #[async_trait]
    impl StreamSource for FakeSource {
        async fn open(&self, _url: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
            let items = stream::iter(self.chunks.clone().into_iter().map(Ok));
            if self.hang_at_end {
                Ok(items.chain(stream::pending()).boxed())
            } else {
                Ok(items.boxed())
            }
        }
    }

    fn test_config(root: &std::path::Path) -> RecorderConfig {
        RecorderConfig {
            mode: RecordingMode::Flv,
            output_root: root.to_path_buf(),
            folder_template: "{roomid}".to_string(),
            file_template: "{date}_{time}".to_string(),
            cut_size_bytes: 0,
            cut_duration_secs: 0,
            read_timeout_secs: 5,
            ..RecorderConfig::default()
        }
    }

    fn request() -> CaptureRequest {
        CaptureRequest {
            room_id: 42,
            room_name: "room".to_string(),
            title: "title".to_string(),
            stream_url: "https://example.com/x.flv".to_string(),
            pre_open_wait: Duration::ZERO,
        }
    }

    async fn drain(rx: &mut mpsc::Receiver<WorkerMessage>) -> (Vec<SegmentInfo>, TaskOutcome) {
        let mut segments = Vec::new();
        loop {
            match rx.recv().await.expect("worker dropped without terminal") {
                WorkerMessage::Started => {}
                WorkerMessage::SegmentClosed(info) => segments.push(info),
                WorkerMessage::Finished(outcome) => return (segments, outcome),
            }
        }
    }

    #[tokio::test]
    async fn test_single_segment_capture() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(32);
        let source = Arc::new(FakeSource {
            chunks: vec![Bytes::from_static(b"hello "), Bytes::from_static(b"world")],
            hang_at_end: false,
        });

        let worker = CaptureWorker::new(
            Uuid::new_v4(),
            request(),
            test_config(dir.path()),
            CancellationToken::new(),
            tx,
        );
        worker.run(source).await;

        let (segments, outcome) = drain(&mut rx).await;
        assert_eq!(outcome, TaskOutcome::Completed);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].size_bytes, 11);
        let content = std::fs::read(&segments[0].path).unwrap();
        assert_eq!(content, b"hello world");
    }

    #[tokio::test]
    async fn test_size_rotation_preserves_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(32);
        let chunks: Vec<Bytes> = (0u8..6).map(|i| Bytes::from(vec![i; 4])).collect();
        let source = Arc::new(FakeSource {
            chunks: chunks.clone(),
            hang_at_end: false,
        });

        let mut config = test_config(dir.path());
        config.cut_size_bytes = 8;
        let worker = CaptureWorker::new(
            Uuid::new_v4(),
            request(),
            config,
            CancellationToken::new(),
            tx,
        );
        worker.run(source).await;

        let (segments, outcome) = drain(&mut rx).await;
        assert_eq!(outcome, TaskOutcome::Completed);
        assert_eq!(segments.len(), 3);
        for (i, segment) in segments.iter().enumerate() {
            assert_eq!(segment.index, i as u32);
            assert_eq!(segment.size_bytes, 8);
        }

        // Concatenating the segments reproduces the stream exactly.
        let mut replayed = Vec::new();
        for segment in &segments {
            replayed.extend(std::fs::read(&segment.path).unwrap());
        }
        let original: Vec<u8> = chunks.iter().flat_map(|c| c.to_vec()).collect();
        assert_eq!(replayed, original);
    }

    #[tokio::test]
    async fn test_graceful_stop_closes_segment() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(32);
        let source = Arc::new(FakeSource {
            chunks: vec![Bytes::from_static(b"partial data")],
            hang_at_end: true,
        });

        let cancel = CancellationToken::new();
        let worker = CaptureWorker::new(
            Uuid::new_v4(),
            request(),
            test_config(dir.path()),
            cancel.clone(),
            tx,
        );
        let handle = tokio::spawn(worker.run(source));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        handle.await.unwrap();

        let (segments, outcome) = drain(&mut rx).await;
        assert_eq!(outcome, TaskOutcome::Completed);
        assert_eq!(segments.len(), 1);
        assert_eq!(std::fs::read(&segments[0].path).unwrap(), b"partial data");
    }

    #[tokio::test]
    async fn test_read_timeout_fails_task() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(32);
        let source = Arc::new(FakeSource {
            chunks: vec![Bytes::from_static(b"stalled")],
            hang_at_end: true,
        });

        let mut config = test_config(dir.path());
        config.read_timeout_secs = 1;
        let worker = CaptureWorker::new(
            Uuid::new_v4(),
            request(),
            config,
            CancellationToken::new(),
            tx,
        );
        worker.run(source).await;

        let (segments, outcome) = drain(&mut rx).await;
        assert!(outcome.is_failed());
        // The partial segment survives the failure.
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].size_bytes, 7);
    }

    #[tokio::test]
    async fn test_empty_stream_reports_no_segments() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(32);
        let source = Arc::new(FakeSource {
            chunks: vec![],
            hang_at_end: false,
        });

        let worker = CaptureWorker::new(
            Uuid::new_v4(),
            request(),
            test_config(dir.path()),
            CancellationToken::new(),
            tx,
        );
        worker.run(source).await;

        let (segments, outcome) = drain(&mut rx).await;
        assert_eq!(outcome, TaskOutcome::Completed);
        assert!(segments.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_pre_open_wait() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(32);
        let source = Arc::new(FakeSource {
            chunks: vec![Bytes::from_static(b"never written")],
            hang_at_end: false,
        });

        let mut req = request();
        req.pre_open_wait = Duration::from_secs(60);
        let cancel = CancellationToken::new();
        let worker = CaptureWorker::new(
            Uuid::new_v4(),
            req,
            test_config(dir.path()),
            cancel.clone(),
            tx,
        );
        let handle = tokio::spawn(worker.run(source));

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap();

        let (segments, outcome) = drain(&mut rx).await;
        assert_eq!(outcome, TaskOutcome::Completed);
        assert!(segments.is_empty());
    }
}
