//! Automatic live-room monitoring and recording engine.
//!
//! Rooms are polled for live status; when one goes live, a bounded
//! capture task writes the stream to rotating segment files, and closed
//! segments are handed to an external post-processing program. The
//! pieces:
//!
//! - [`registry`]: shared room state
//! - [`monitor`]: probing, lifecycle decisions, poll supervision
//! - [`recorder`]: capture task manager and workers
//! - [`postprocess`]: external repair/remux dispatch
//! - [`reporting`]: room and system statistics
//! - [`app`]: wiring and shutdown orchestration

pub mod app;
pub mod config;
pub mod error;
pub mod monitor;
pub mod naming;
pub mod postprocess;
pub mod recorder;
pub mod registry;
pub mod reporting;

pub use app::App;
pub use config::AppConfig;
pub use error::{Error, Result};
