//! Room monitoring: probing, lifecycle decisions, and poll supervision.

pub mod events;
pub mod lifecycle;
pub mod prober;
pub mod service;
pub mod watcher;

pub use events::{RoomEvent, RoomEventBroadcaster};
pub use lifecycle::{Action, PollOutcome};
pub use prober::{HttpProber, LiveStatus, RoomProber};
pub use service::RoomMonitor;
pub use watcher::PollSupervisor;
