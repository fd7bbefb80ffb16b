//! Live-status probing.
//!
//! A [`RoomProber`] answers one question: is this room live right now,
//! and if so where is the stream. The HTTP implementation talks to the
//! platform status endpoint; tests substitute their own probers.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Live status of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiveStatus {
    /// Room is currently live.
    Live {
        /// Stream title.
        title: String,
        /// Resolved stream URL for capture.
        stream_url: String,
    },
    /// Room is offline.
    Offline,
}

impl LiveStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, LiveStatus::Live { .. })
    }

    pub fn is_offline(&self) -> bool {
        matches!(self, LiveStatus::Offline)
    }

    /// Get the stream title if live.
    pub fn title(&self) -> Option<&str> {
        match self {
            LiveStatus::Live { title, .. } => Some(title),
            LiveStatus::Offline => None,
        }
    }
}

/// Probes the live status of a single room.
#[async_trait]
pub trait RoomProber: Send + Sync {
    /// Fetch the current status of `room_id`.
    ///
    /// Failures are transient by contract; the caller applies backoff
    /// and retries.
    async fn probe(&self, room_id: u64) -> Result<LiveStatus>;
}

/// Wire shape of the status endpoint response.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    /// 1 when live, anything else means offline.
    live_status: i32,
    #[serde(default)]
    title: String,
    #[serde(default)]
    stream_url: Option<String>,
}

/// [`RoomProber`] backed by an HTTP status endpoint.
///
/// Each probe is a single GET to `{base_url}/{room_id}` with a bounded
/// timeout; any transport or decode failure maps to a transient error.
pub struct HttpProber {
    client: reqwest::Client,
    base_url: String,
}

impl HttpProber {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl RoomProber for HttpProber {
    async fn probe(&self, room_id: u64) -> Result<LiveStatus> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), room_id);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let status: StatusResponse = response.json().await?;

        if status.live_status == 1 {
            let stream_url = status.stream_url.ok_or_else(|| {
                Error::TransientNetwork(format!("room {room_id} live without stream URL"))
            })?;
            Ok(LiveStatus::Live {
                title: status.title,
                stream_url,
            })
        } else {
            Ok(LiveStatus::Offline)
        }
    }
}
