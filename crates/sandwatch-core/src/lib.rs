//! Sandwatch Core - Event types, detector and publisher traits, and dispatch
//!
//! This crate provides the foundational types and abstractions for the
//! sandbox telemetry pipeline:
//!
//! - **Events**: monitor records decoded from the binary event stream
//! - **Plugins**: detector and publisher contracts
//! - **Dispatch**: per-task routing of events to detectors and the bus
//! - **Notify**: the JSON messages exchanged with the event bus

pub mod config;
pub mod dispatch;
pub mod events;
pub mod notify;
pub mod plugins;
pub mod process_tree;

// Re-export commonly used types
pub use dispatch::{DispatchStats, Dispatcher};
pub use events::{Event, EventKind, Process, ProcessStatus};
pub use notify::{Notification, TaskAction, TaskNotification};
pub use plugins::{
    Detection, Detector, MemoryPublisher, NullPublisher, PublishError, PublishResult, Publisher,
    TriggerSink,
};
pub use process_tree::{ProcessTree, SharedProcessTree};

/// Service version
pub const SENSOR_VERSION: &str = env!("CARGO_PKG_VERSION");
