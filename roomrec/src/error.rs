//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// A poll or stream request failed in a retryable way.
    #[error("network error: {0}")]
    TransientNetwork(String),

    /// The global concurrent-recording ceiling has been reached.
    #[error("recording capacity exceeded")]
    CapacityExceeded,

    /// The room already has an active recording task.
    #[error("room {room_id} already has an active recording task")]
    AlreadyActive { room_id: u64 },

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// A repair/transcode invocation failed to spawn or report back.
    #[error("external process error: {0}")]
    ExternalProcess(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::CapacityExceeded)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::TransientNetwork(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = Error::not_found("Room", "42");
        assert_eq!(err.to_string(), "Room not found: 42");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::TransientNetwork("timeout".into()).is_transient());
        assert!(Error::CapacityExceeded.is_transient());
        assert!(!Error::AlreadyActive { room_id: 1 }.is_transient());
        assert!(!Error::config("bad template").is_transient());
    }
}
