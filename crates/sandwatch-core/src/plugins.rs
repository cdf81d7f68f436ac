//! Plugin traits for the processing stages
//!
//! Detectors observe process events and raise detections through an injected
//! trigger sink. Publishers deliver notifications to the event bus, a file, or
//! nowhere at all when running without a connection.

use crate::notify::Notification;
use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::events::Process;

/// Publish error type
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Not connected to the event bus")]
    NotConnected,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

pub type PublishResult<T> = Result<T, PublishError>;

// =============================================================================
// DETECTORS
// =============================================================================

/// A finding raised by a detector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// Signature name
    pub signature: String,
    /// Human readable description
    pub description: String,
    /// Indicator of compromise, usually the offending command line
    pub ioc: String,
}

/// Handle detectors use to report detections
#[derive(Debug, Clone)]
pub struct TriggerSink {
    tx: mpsc::UnboundedSender<Detection>,
}

impl TriggerSink {
    /// Create a sink and the receiver that collects its detections
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Detection>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Raise a detection
    pub fn trigger(
        &self,
        signature: impl Into<String>,
        description: impl Into<String>,
        ioc: impl Into<String>,
    ) {
        // The receiver only goes away together with the dispatcher
        let _ = self.tx.send(Detection {
            signature: signature.into(),
            description: description.into(),
            ioc: ioc.into(),
        });
    }
}

/// Signature detector
///
/// Detectors are stateful and scoped to a single analysis task. A fresh set is
/// built for every task, then `set_trigger` and `init` are called once before
/// the first event.
pub trait Detector: Send {
    /// Detector name
    fn name(&self) -> &str;

    /// Install the sink detections are reported to
    fn set_trigger(&mut self, trigger: TriggerSink);

    /// Allocate per-task state
    fn init(&mut self) {}

    /// Observe one process event
    fn process(&mut self, process: &Process);
}

// =============================================================================
// PUBLISHERS
// =============================================================================

/// Publisher - delivers notifications to their destination
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publisher name
    fn name(&self) -> &str;

    /// Publish one notification
    async fn publish(&self, notification: Notification) -> PublishResult<()>;

    /// Flush any buffered notifications
    async fn flush(&self) -> PublishResult<()> {
        Ok(())
    }
}

/// Publisher used when no connection is attached; every call is a no-op
#[derive(Debug, Default)]
pub struct NullPublisher;

#[async_trait]
impl Publisher for NullPublisher {
    fn name(&self) -> &str {
        "null-publisher"
    }

    async fn publish(&self, notification: Notification) -> PublishResult<()> {
        tracing::trace!(
            event = notification.event_name(),
            task_id = notification.task_id(),
            "Dropping notification, no connection attached"
        );
        Ok(())
    }
}

/// Publisher that keeps notifications in memory
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<Notification>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far
    pub fn notifications(&self) -> Vec<Notification> {
        self.published.lock().clone()
    }

    /// Published notifications with the given event name
    pub fn by_event(&self, event: &str) -> Vec<Notification> {
        self.published
            .lock()
            .iter()
            .filter(|n| n.event_name() == event)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    fn name(&self) -> &str {
        "memory-publisher"
    }

    async fn publish(&self, notification: Notification) -> PublishResult<()> {
        self.published.lock().push(notification);
        Ok(())
    }
}
