//! Per-notification tasks
//!
//! Every inbound task notification runs on its own tokio task. Event stream
//! tasks tail the monitor log of an analysis and dispatch its events; TLS
//! tasks correlate the capture with the logged master secrets. Every task
//! ends with exactly one `finished` or `error` notification.

use parking_lot::Mutex;
use sandwatch_bus::InboundTask;
use sandwatch_core::config::{IngestSettings, SensorConfig};
use sandwatch_core::notify::{Notification, TlsKey, TlsKeysBody};
use sandwatch_core::{Dispatcher, Event, Publisher, TaskAction, TaskNotification};
use sandwatch_decode::{DecodeError, FrameDecoder};
use sandwatch_tls::CorrelateError;
use sandwatch_tracker::{SharedFile, TrackerError, Trackers};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Events buffered between the decoding thread and the dispatcher
const EVENT_BUFFER: usize = 256;

/// Task failure, reported to the bus as an `error` notification
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("timed out waiting for {path} after {attempts} attempts")]
    Timeout { path: PathBuf, attempts: u32 },

    #[error("missing file: {0}")]
    MissingFile(PathBuf),

    #[error("task notification has no lsass_pid")]
    MissingLsassPid,

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("{0}")]
    Tracker(#[from] TrackerError),

    #[error("{0}")]
    Correlate(#[from] CorrelateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Shared state handed to every task
#[derive(Clone)]
pub struct TaskContext {
    pub config: Arc<SensorConfig>,
    pub cwd: PathBuf,
    pub trackers: Arc<Trackers>,
    pub publisher: Arc<dyn Publisher>,
}

impl TaskContext {
    /// Directory holding the artifacts of one analysis
    pub fn analysis_dir(&self, task_id: u64) -> PathBuf {
        self.cwd
            .join("storage")
            .join("analyses")
            .join(task_id.to_string())
    }

    /// Run the task an inbound notification asks for
    pub fn spawn(&self, task: InboundTask) -> JoinHandle<()> {
        let ctx = self.clone();
        tokio::spawn(async move {
            let task_id = task.notification.taskid;
            let result = match task.action {
                TaskAction::EventStream => ctx.event_stream(&task.notification).await,
                TaskAction::DumpTls => ctx.dump_tls(&task.notification).await,
            };

            let outcome = match result {
                Ok(()) => {
                    info!(task_id, "Task {} finished", task.event);
                    Notification::finished(task_id, task.event)
                }
                Err(e) => {
                    warn!(task_id, "Task {} failed: {}", task.event, e);
                    Notification::error(task_id, e.to_string())
                }
            };
            if let Err(e) = ctx.publisher.publish(outcome).await {
                warn!(task_id, "Failed to publish task outcome: {}", e);
            }
        })
    }

    /// Tail the monitor event log of a task and dispatch every event
    pub async fn event_stream(&self, notification: &TaskNotification) -> Result<(), TaskError> {
        let task_id = notification.taskid;
        let context_id = notification.context_id();
        let ingest = &self.config.ingest;
        let path = self.analysis_dir(task_id).join(&ingest.event_log);

        wait_for_file(&path, ingest).await?;

        let file = self.trackers.file_handle(context_id, &path)?;
        let tree = self.trackers.process_tree(context_id);
        let mut dispatcher = Dispatcher::new(
            task_id,
            sandwatch_signatures::detectors(),
            tree,
            self.publisher.clone(),
        );

        let frames = stream_events(file, &mut dispatcher, ingest.skip_unknown_kinds).await?;
        let stats = dispatcher.stats();
        info!(
            task_id,
            frames,
            detections = stats.detections,
            publish_errors = stats.publish_errors,
            "Event stream complete"
        );
        Ok(())
    }

    /// Correlate captured TLS sessions with logged master secrets
    pub async fn dump_tls(&self, notification: &TaskNotification) -> Result<(), TaskError> {
        let task_id = notification.taskid;
        let lsass_pid = notification.lsass_pid.ok_or(TaskError::MissingLsassPid)?;
        let tls = &self.config.tls;
        let dir = self.analysis_dir(task_id);

        let capture = dir.join(&tls.capture);
        let secrets = dir.join(tls.secrets_log(lsass_pid));
        for path in [&capture, &secrets] {
            if !path.exists() {
                return Err(TaskError::MissingFile(path.clone()));
            }
        }

        let handle = self
            .trackers
            .capture_handle(notification.context_id(), &capture, tls.port)?;
        let keys = tokio::task::spawn_blocking(move || {
            let mut capture = handle.lock();
            sandwatch_tls::correlate_with(&mut capture, &secrets)
        })
        .await??;

        info!(task_id, keys = keys.len(), "Correlated TLS keys");
        let body = TlsKeysBody {
            task_id,
            tlskeys: keys
                .into_iter()
                .map(|(session_id, master_secret)| TlsKey {
                    session_id,
                    master_secret,
                })
                .collect(),
        };
        if let Err(e) = self.publisher.publish(Notification::Tlskeys(body)).await {
            warn!(task_id, "Failed to publish TLS keys: {}", e);
        }
        Ok(())
    }
}

/// Wait until `path` exists and holds at least the configured minimum size
///
/// A missing or short file is retried every poll interval; other errors end
/// the wait immediately.
pub async fn wait_for_file(path: &Path, ingest: &IngestSettings) -> Result<(), TaskError> {
    for attempt in 0..ingest.max_attempts {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.len() >= ingest.min_file_size => {
                debug!("{} ready after {} attempts", path.display(), attempt + 1);
                return Ok(());
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::time::sleep(ingest.poll_interval()).await;
    }

    Err(TaskError::Timeout {
        path: path.to_path_buf(),
        attempts: ingest.max_attempts,
    })
}

/// Decode every frame of `file` and dispatch the events in file order
///
/// Decoding is blocking file IO and runs on the blocking pool; events cross
/// over to the dispatcher through a bounded channel. Returns the number of
/// frames read.
pub async fn stream_events(
    file: SharedFile,
    dispatcher: &mut Dispatcher,
    skip_unknown_kinds: bool,
) -> Result<u64, TaskError> {
    let (tx, mut rx) = mpsc::channel::<Event>(EVENT_BUFFER);

    let decoder = tokio::task::spawn_blocking(move || decode_into(&file, &tx, skip_unknown_kinds));

    while let Some(event) = rx.recv().await {
        dispatcher.dispatch(event).await;
    }

    Ok(decoder.await??)
}

fn decode_into(
    file: &Mutex<File>,
    tx: &mpsc::Sender<Event>,
    skip_unknown_kinds: bool,
) -> Result<u64, DecodeError> {
    let mut guard = file.lock();
    let mut decoder = FrameDecoder::new(&mut *guard);

    loop {
        match decoder.next_message() {
            Ok(Some(event)) => {
                if tx.blocking_send(event).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(DecodeError::UnsupportedKind(tag)) if skip_unknown_kinds => {
                debug!("Skipping frame with unknown kind {}", tag);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(decoder.frames())
}
