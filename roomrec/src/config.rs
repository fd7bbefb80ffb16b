//! Immutable configuration snapshot.
//!
//! The engine is handed an [`AppConfig`] at startup (and again on explicit
//! reload) and never mutates it. Settings mirror what the recorder needs:
//! polling cadence, rotation thresholds, naming templates, the automatic
//! repair step, and the monitored room list.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Recording container mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    /// Record the FLV stream directly.
    #[default]
    Flv,
    /// Record via the HLS playlist (delayed start, see `hls_wait_secs`).
    Hls,
}

impl RecordingMode {
    /// File extension for segments produced in this mode.
    pub fn extension(&self) -> &'static str {
        match self {
            RecordingMode::Flv => "flv",
            RecordingMode::Hls => "ts",
        }
    }
}

/// Polling and lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Base URL of the platform status endpoint; the room ID is appended
    /// as the final path segment.
    pub api_base_url: String,
    /// Baseline interval between live-status polls per room, in seconds.
    pub poll_interval_secs: u64,
    /// Maximum number of status probes in flight at once.
    pub max_concurrent_polls: usize,
    /// HTTP timeout for a single status probe, in seconds.
    pub request_timeout_secs: u64,
    /// Cap for the per-room exponential poll backoff, in seconds.
    pub error_backoff_max_secs: u64,
    /// Consecutive poll errors while recording before the task is finalized.
    pub error_finalize_threshold: u32,
    /// Finalize a recording after `error_finalize_threshold` consecutive
    /// poll errors instead of retrying indefinitely.
    pub finalize_on_poll_errors: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.live.example.com/room/status".to_string(),
            poll_interval_secs: 10,
            max_concurrent_polls: 8,
            request_timeout_secs: 10,
            error_backoff_max_secs: 300,
            error_finalize_threshold: 5,
            finalize_on_poll_errors: true,
        }
    }
}

/// Capture and rotation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Recording container mode.
    pub mode: RecordingMode,
    /// Global wait before opening an HLS capture, in seconds.
    pub hls_wait_secs: u64,
    /// Global ceiling on concurrent recording tasks.
    pub max_concurrent_recordings: usize,
    /// Root directory for recorded output.
    pub output_root: PathBuf,
    /// Directory template below `output_root` (naming tokens substituted).
    pub folder_template: String,
    /// File name template, without extension (naming tokens substituted).
    pub file_template: String,
    /// Rotate the segment once it reaches this many bytes. 0 disables.
    pub cut_size_bytes: u64,
    /// Rotate the segment once it has been open this long, in seconds.
    /// 0 disables.
    pub cut_duration_secs: u64,
    /// Timeout for a single read from the media stream, in seconds.
    pub read_timeout_secs: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            mode: RecordingMode::Flv,
            hls_wait_secs: 20,
            max_concurrent_recordings: 6,
            output_root: PathBuf::from("Rec"),
            folder_template: "{name}_{roomid}/{date}".to_string(),
            file_template: "{date}_{time}_{title}".to_string(),
            cut_size_bytes: 0,
            cut_duration_secs: 0,
            read_timeout_secs: 30,
        }
    }
}

/// Automatic repair/transcode settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostprocessConfig {
    /// Run the repair command against every completed segment.
    pub automatic_repair: bool,
    /// External program to invoke.
    pub program: String,
    /// Argument template; `{input}` and `{output}` are substituted.
    pub args_template: String,
    /// Maximum concurrent repair processes.
    pub max_workers: usize,
    /// Timeout for one repair invocation, in seconds.
    pub timeout_secs: u64,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            automatic_repair: false,
            program: "ffmpeg".to_string(),
            args_template: "-y -i {input} -c copy {output}".to_string(),
            max_workers: 2,
            timeout_secs: 3600,
        }
    }
}

/// Connection parameters for the remote dashboard.
///
/// Carried in the snapshot for the reporting collaborator; the core does
/// not interpret them beyond exposing the snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub access_key_id: String,
    pub access_key_secret: String,
}

/// One monitored room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomEntry {
    /// Externally assigned room identifier.
    pub id: u64,
    /// Display name used in naming templates and logs. Falls back to
    /// the room ID when omitted.
    #[serde(default)]
    pub name: String,
    /// Per-room override of the global HLS wait.
    #[serde(default)]
    pub hls_wait_secs: Option<u64>,
}

/// Top-level configuration snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub recorder: RecorderConfig,
    pub postprocess: PostprocessConfig,
    pub remote: RemoteConfig,
    /// Window allowed for graceful shutdown before workers are force-closed,
    /// in seconds.
    pub shutdown_timeout_secs: u64,
    #[serde(rename = "room")]
    pub rooms: Vec<RoomEntry>,
}

impl AppConfig {
    /// Load a configuration snapshot from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&contents)
    }

    /// Parse a configuration snapshot from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let mut config: AppConfig = toml::from_str(contents)
            .map_err(|e| Error::config(e.to_string()))?;
        if config.shutdown_timeout_secs == 0 {
            config.shutdown_timeout_secs = 10;
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.recorder.max_concurrent_recordings == 0 {
            return Err(Error::config("max_concurrent_recordings must be > 0"));
        }
        if self.monitor.max_concurrent_polls == 0 {
            return Err(Error::config("max_concurrent_polls must be > 0"));
        }
        if self.monitor.poll_interval_secs == 0 {
            return Err(Error::config("poll_interval_secs must be > 0"));
        }
        if self.recorder.file_template.trim().is_empty() {
            return Err(Error::config("file_template must not be empty"));
        }
        Ok(())
    }

    /// Effective HLS wait for a room, honoring the per-room override.
    pub fn hls_wait_for(&self, room: &RoomEntry) -> u64 {
        room.hls_wait_secs.unwrap_or(self.recorder.hls_wait_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.monitor.poll_interval_secs, 10);
        assert_eq!(config.recorder.max_concurrent_recordings, 6);
        assert_eq!(config.recorder.mode, RecordingMode::Flv);
        assert!(!config.postprocess.automatic_repair);
        assert!(config.rooms.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let toml = r#"
            shutdown_timeout_secs = 5

            [monitor]
            poll_interval_secs = 3
            error_finalize_threshold = 2

            [recorder]
            mode = "hls"
            cut_size_bytes = 1048576
            output_root = "/srv/rec"

            [postprocess]
            automatic_repair = true
            program = "ffmpeg"

            [[room]]
            id = 22637261
            name = "Bella"

            [[room]]
            id = 1
            name = "Test"
            hls_wait_secs = 5
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(config.monitor.poll_interval_secs, 3);
        assert_eq!(config.recorder.mode, RecordingMode::Hls);
        assert_eq!(config.recorder.mode.extension(), "ts");
        assert_eq!(config.rooms.len(), 2);
        assert_eq!(config.hls_wait_for(&config.rooms[0]), 20);
        assert_eq!(config.hls_wait_for(&config.rooms[1]), 5);
    }

    #[test]
    fn test_parse_rejects_zero_capacity() {
        let toml = r#"
            [recorder]
            max_concurrent_recordings = 0
        "#;
        assert!(matches!(
            AppConfig::parse(toml),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_parse_rejects_empty_file_template() {
        let toml = r#"
            [recorder]
            file_template = " "
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }
}
