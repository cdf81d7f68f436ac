//! Bus publisher
//!
//! All tasks publish through one connection. Each notification is written
//! as a single line while holding the connection-wide write lock, so lines
//! from concurrent tasks never interleave.

use async_trait::async_trait;
use sandwatch_core::notify::Notification;
use sandwatch_core::plugins::{PublishError, PublishResult, Publisher};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Default)]
struct Shared {
    writer: Mutex<Option<BoxedWriter>>,
    sent: AtomicU64,
    dropped: AtomicU64,
}

/// Publisher writing newline-delimited JSON to the bus connection
///
/// Cloning is cheap; clones share the connection. While no connection is
/// attached every publish is dropped.
#[derive(Clone, Default)]
pub struct BusPublisher {
    shared: Arc<Shared>,
}

impl BusPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the write half of a fresh connection
    pub async fn attach<W>(&self, writer: W)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        *self.shared.writer.lock().await = Some(Box::new(writer));
    }

    /// Forget the current connection
    pub async fn detach(&self) {
        self.shared.writer.lock().await.take();
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.writer.lock().await.is_some()
    }

    /// Lines written so far
    pub fn sent(&self) -> u64 {
        self.shared.sent.load(Ordering::Relaxed)
    }

    /// Notifications dropped while disconnected or after a write failure
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Write any message as one JSON line
    pub async fn send<T: Serialize>(&self, message: &T) -> PublishResult<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        let mut guard = self.shared.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(PublishError::NotConnected);
        };

        let result = match writer.write_all(&line).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.shared.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                // The reader side notices the broken connection and reconnects
                warn!("Event bus write failed, detaching connection: {}", e);
                guard.take();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                Err(e.into())
            }
        }
    }
}

impl std::fmt::Debug for BusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusPublisher")
            .field("sent", &self.sent())
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[async_trait]
impl Publisher for BusPublisher {
    fn name(&self) -> &str {
        "bus-publisher"
    }

    async fn publish(&self, notification: Notification) -> PublishResult<()> {
        debug!(
            "Publishing {} for task {}",
            notification.event_name(),
            notification.task_id()
        );
        self.send(&notification.into_envelope()).await
    }

    async fn flush(&self) -> PublishResult<()> {
        if let Some(writer) = self.shared.writer.lock().await.as_mut() {
            writer.flush().await?;
        }
        Ok(())
    }
}
