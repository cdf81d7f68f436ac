//! JSONL file publisher
//!
//! Writes every notification envelope as one line to a local file. Used by
//! replay mode to keep the output of an offline run.

use async_trait::async_trait;
use parking_lot::Mutex;
use sandwatch_core::notify::Notification;
use sandwatch_core::plugins::{PublishResult, Publisher};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// JSONL publisher configuration
#[derive(Debug, Clone)]
pub struct JsonlPublisherConfig {
    /// Output file path
    pub path: PathBuf,

    /// Whether to append to an existing file
    pub append: bool,

    /// Flush after each write
    pub flush_each: bool,
}

impl JsonlPublisherConfig {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            append: false,
            flush_each: false,
        }
    }
}

/// JSONL file publisher
pub struct JsonlPublisher {
    config: JsonlPublisherConfig,
    writer: Mutex<BufWriter<File>>,
    written: AtomicU64,
}

impl JsonlPublisher {
    pub fn open(config: JsonlPublisherConfig) -> PublishResult<Self> {
        let file = if config.append {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.path)?
        } else {
            File::create(&config.path)?
        };
        info!("JSONL publisher writing to: {:?}", config.path);

        Ok(Self {
            config,
            writer: Mutex::new(BufWriter::new(file)),
            written: AtomicU64::new(0),
        })
    }

    /// Notifications written so far
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Publisher for JsonlPublisher {
    fn name(&self) -> &str {
        "jsonl-publisher"
    }

    async fn publish(&self, notification: Notification) -> PublishResult<()> {
        let json = serde_json::to_string(&notification.into_envelope())?;

        let mut w = self.writer.lock();
        writeln!(w, "{}", json)?;
        if self.config.flush_each {
            w.flush()?;
        }

        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn flush(&self) -> PublishResult<()> {
        self.writer.lock().flush()?;
        Ok(())
    }
}
