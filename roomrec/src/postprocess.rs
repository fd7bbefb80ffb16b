//! Post-processing dispatcher.
//!
//! Closed segments are handed to an external program (ffmpeg-style
//! repair/remux by default) through a bounded worker pool. Jobs never
//! touch the input file; the program writes a sibling output, and a
//! failed job leaves the original segment untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::PostprocessConfig;
use crate::{Error, Result};

/// Runs one external program invocation. Injectable for tests.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `program` with `args` to completion, returning its exit code.
    async fn run(&self, program: &str, args: &[String]) -> Result<i32>;
}

/// [`ProcessRunner`] over real child processes.
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<i32> {
        let status = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| Error::ExternalProcess(format!("failed to spawn {program}: {e}")))?;
        Ok(status.code().unwrap_or(-1))
    }
}

/// Derive the output path for a repaired segment: `x.flv` -> `x_fix.flv`.
pub fn repaired_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    let name = match input.extension() {
        Some(ext) => format!("{stem}_fix.{}", ext.to_string_lossy()),
        None => format!("{stem}_fix"),
    };
    input.with_file_name(name)
}

/// Render the argument template for one job.
///
/// The template is whitespace-split first, then `{input}` and
/// `{output}` are substituted per argument, so paths containing spaces
/// stay one argument.
pub fn build_args(template: &str, input: &Path, output: &Path) -> Vec<String> {
    template
        .split_whitespace()
        .map(|arg| {
            arg.replace("{input}", &input.to_string_lossy())
                .replace("{output}", &output.to_string_lossy())
        })
        .collect()
}

/// Dispatches segment files to the external repair program.
pub struct PostProcessor {
    tx: parking_lot::Mutex<Option<mpsc::Sender<PathBuf>>>,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
    enabled: bool,
}

impl PostProcessor {
    pub fn new(config: PostprocessConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        let enabled = config.automatic_repair;
        if !enabled {
            return Self {
                tx: parking_lot::Mutex::new(None),
                pump: parking_lot::Mutex::new(None),
                enabled,
            };
        }

        let (tx, rx) = mpsc::channel(256);
        let pump = tokio::spawn(Self::pump(rx, config, runner));
        Self {
            tx: parking_lot::Mutex::new(Some(tx)),
            pump: parking_lot::Mutex::new(Some(pump)),
            enabled,
        }
    }

    /// Queue a segment for processing. A no-op when repair is disabled.
    pub async fn dispatch(&self, path: PathBuf) -> Result<()> {
        if !self.enabled {
            debug!(path = %path.display(), "automatic repair disabled, skipping");
            return Ok(());
        }
        let tx = self
            .tx
            .lock()
            .clone()
            .ok_or_else(|| Error::Other("post-processor already stopped".to_string()))?;
        tx.send(path)
            .await
            .map_err(|_| Error::Other("post-processor already stopped".to_string()))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Close the intake and wait for queued jobs to finish. Idempotent.
    pub async fn shutdown(&self) {
        self.tx.lock().take();
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            let _ = pump.await;
        }
    }

    async fn pump(
        mut rx: mpsc::Receiver<PathBuf>,
        config: PostprocessConfig,
        runner: Arc<dyn ProcessRunner>,
    ) {
        let slots = Arc::new(Semaphore::new(config.max_workers));
        let mut jobs = JoinSet::new();

        while let Some(path) = rx.recv().await {
            while jobs.try_join_next().is_some() {}
            let permit = match slots.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let config = config.clone();
            let runner = runner.clone();
            jobs.spawn(async move {
                let _permit = permit;
                Self::run_job(&config, runner.as_ref(), &path).await;
            });
        }

        // Intake closed; drain the remaining jobs.
        while jobs.join_next().await.is_some() {}
    }

    async fn run_job(config: &PostprocessConfig, runner: &dyn ProcessRunner, input: &Path) {
        let output = repaired_path(input);
        let args = build_args(&config.args_template, input, &output);
        debug!(program = %config.program, ?args, "post-processing segment");

        let deadline = Duration::from_secs(config.timeout_secs);
        match timeout(deadline, runner.run(&config.program, &args)).await {
            Err(_) => {
                error!(input = %input.display(), "post-processing timed out after {}s", config.timeout_secs);
            }
            Ok(Err(e)) => {
                error!(input = %input.display(), "post-processing failed: {e}");
            }
            Ok(Ok(code)) if code != 0 => {
                warn!(input = %input.display(), code, "post-processor exited non-zero");
            }
            Ok(Ok(_)) => {
                info!(input = %input.display(), output = %output.display(), "segment processed");
            }
        }
    }
}
