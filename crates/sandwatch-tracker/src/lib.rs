//! Sandwatch Tracker - per analysis context resource cache
//!
//! Related tasks that share an analysis context id (appid) reuse the same
//! open event files, the same capture reader and the same process tree.
//! Entries are created lazily and evicted once idle for longer than the
//! configured TTL. An empty context id bypasses the cache entirely: every
//! call returns a fresh resource owned by the caller.
//!
//! Cached handles are reference counted. Eviction drops the tracker's
//! reference; the file is closed once the last task holding it finishes.

pub mod error;

pub use error::{TrackerError, TrackerResult};

use parking_lot::Mutex;
use sandwatch_core::{ProcessTree, SharedProcessTree};
use sandwatch_tls::CaptureHandle;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// File handle shared between the tasks of one context
pub type SharedFile = Arc<Mutex<File>>;

/// Capture reader shared between the tasks of one context
pub type SharedCapture = Arc<Mutex<CaptureHandle>>;

/// Cached resources of one analysis context
#[derive(Debug)]
struct TrackerEntry {
    files: HashMap<PathBuf, SharedFile>,
    capture: Option<SharedCapture>,
    tree: Option<SharedProcessTree>,
    last_used: Instant,
}

impl TrackerEntry {
    fn new(now: Instant) -> Self {
        Self {
            files: HashMap::new(),
            capture: None,
            tree: None,
            last_used: now,
        }
    }
}

/// Resource cache keyed by analysis context id
#[derive(Debug, Default)]
pub struct Trackers {
    contexts: Mutex<HashMap<String, TrackerEntry>>,
}

impl Trackers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open file handle for `path`
    ///
    /// With a context id the handle is cached and shared; callers must not
    /// assume exclusive access to its read position.
    pub fn file_handle(
        &self,
        context_id: &str,
        path: impl AsRef<Path>,
    ) -> TrackerResult<SharedFile> {
        let path = path.as_ref();
        if context_id.is_empty() {
            return open_file(path).map(|f| Arc::new(Mutex::new(f)));
        }

        let mut contexts = self.contexts.lock();
        let entry = Self::entry(&mut contexts, context_id);

        let handle = match entry.files.get(path) {
            Some(handle) => handle.clone(),
            None => {
                let handle = Arc::new(Mutex::new(open_file(path)?));
                entry.files.insert(path.to_path_buf(), handle.clone());
                handle
            }
        };
        entry.last_used = Instant::now();
        Ok(handle)
    }

    /// Open capture reader, one per context
    pub fn capture_handle(
        &self,
        context_id: &str,
        path: impl AsRef<Path>,
        port: u16,
    ) -> TrackerResult<SharedCapture> {
        if context_id.is_empty() {
            return Ok(Arc::new(Mutex::new(CaptureHandle::open(path, port)?)));
        }

        let mut contexts = self.contexts.lock();
        let entry = Self::entry(&mut contexts, context_id);

        let handle = match &entry.capture {
            Some(handle) => handle.clone(),
            None => {
                let handle = Arc::new(Mutex::new(CaptureHandle::open(path, port)?));
                entry.capture = Some(handle.clone());
                handle
            }
        };
        entry.last_used = Instant::now();
        Ok(handle)
    }

    /// Process tree of a context; a new empty tree when no context is given
    pub fn process_tree(&self, context_id: &str) -> SharedProcessTree {
        if context_id.is_empty() {
            return ProcessTree::shared();
        }

        let mut contexts = self.contexts.lock();
        let entry = Self::entry(&mut contexts, context_id);
        let tree = entry.tree.get_or_insert_with(ProcessTree::shared).clone();
        entry.last_used = Instant::now();
        tree
    }

    /// Drop every context idle for longer than `ttl` as of `now`
    ///
    /// Returns the evicted context ids.
    pub fn evict_idle(&self, ttl: Duration, now: Instant) -> Vec<String> {
        let mut contexts = self.contexts.lock();
        let expired: Vec<String> = contexts
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_used) > ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(entry) = contexts.remove(id) {
                info!(
                    "Cleaning tracker for appid: {} ({} files, capture: {})",
                    id,
                    entry.files.len(),
                    entry.capture.is_some()
                );
            }
        }
        expired
    }

    /// Whether a context currently has a cache entry
    pub fn contains(&self, context_id: &str) -> bool {
        self.contexts.lock().contains_key(context_id)
    }

    /// Number of cached contexts
    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }

    /// Start the periodic eviction sweep
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, ttl: Duration) -> Sweeper {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let trackers = Arc::clone(self);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = trackers.evict_idle(ttl, Instant::now());
                        if !evicted.is_empty() {
                            debug!("Evicted {} idle contexts", evicted.len());
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Tracker sweeper stopped");
                        break;
                    }
                }
            }
        });

        Sweeper { shutdown_tx, task }
    }

    fn entry<'a>(
        contexts: &'a mut HashMap<String, TrackerEntry>,
        context_id: &str,
    ) -> &'a mut TrackerEntry {
        contexts
            .entry(context_id.to_string())
            .or_insert_with(|| TrackerEntry::new(Instant::now()))
    }
}

/// Handle to the background eviction sweep
#[derive(Debug)]
pub struct Sweeper {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Stop the sweep and wait for it to exit
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

fn open_file(path: &Path) -> TrackerResult<File> {
    File::open(path).map_err(|source| TrackerError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandwatch_core::{Process, ProcessStatus};
    use std::io::{Read, Seek, SeekFrom};

    fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_context_shares_file_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "onemon.pb", b"abcdef");
        let trackers = Trackers::new();

        let first = trackers.file_handle("app-1", &path).unwrap();
        let mut buf = [0u8; 3];
        first.lock().read_exact(&mut buf).unwrap();

        // Same handle, so the read position carries over
        let second = trackers.file_handle("app-1", &path).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        second.lock().read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"def");
    }

    #[test]
    fn test_empty_context_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "onemon.pb", b"abc");
        let trackers = Trackers::new();

        let first = trackers.file_handle("", &path).unwrap();
        let second = trackers.file_handle("", &path).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(trackers.is_empty());
    }

    #[test]
    fn test_missing_file_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let trackers = Trackers::new();

        let err = trackers
            .file_handle("app-1", dir.path().join("missing.pb"))
            .unwrap_err();
        assert!(err.is_not_found());

        let path = write_file(dir.path(), "missing.pb", b"x");
        assert!(trackers.file_handle("app-1", &path).is_ok());
    }

    #[test]
    fn test_context_isolation() {
        let trackers = Trackers::new();
        let a = trackers.process_tree("app-a");
        let b = trackers.process_tree("app-b");
        assert!(!Arc::ptr_eq(&a, &b));

        a.lock().track(Process {
            pid: 10,
            status: ProcessStatus::New as i32,
            ..Default::default()
        });
        assert!(b.lock().is_empty());
        assert!(Arc::ptr_eq(&a, &trackers.process_tree("app-a")));

        let anon = trackers.process_tree("");
        anon.lock().track(Process {
            pid: 11,
            ..Default::default()
        });
        assert!(trackers.process_tree("").lock().is_empty());
        assert_eq!(trackers.len(), 2);
    }

    #[test]
    fn test_eviction_after_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "onemon.pb", b"abc");
        let trackers = Trackers::new();
        let ttl = Duration::from_secs(15 * 60);

        let tree = trackers.process_tree("app-1");
        let handle = trackers.file_handle("app-1", &path).unwrap();
        let touched = Instant::now();

        assert!(trackers.evict_idle(ttl, touched).is_empty());
        assert!(trackers.contains("app-1"));

        let evicted = trackers.evict_idle(ttl, touched + ttl + Duration::from_secs(1));
        assert_eq!(evicted, vec!["app-1".to_string()]);
        assert!(!trackers.contains("app-1"));

        // Only the caller's references remain
        assert_eq!(Arc::strong_count(&handle), 1);

        // A fresh entry is created on the next access
        let fresh = trackers.process_tree("app-1");
        assert!(!Arc::ptr_eq(&tree, &fresh));
        let reopened = trackers.file_handle("app-1", &path).unwrap();
        assert!(!Arc::ptr_eq(&handle, &reopened));
        reopened.lock().seek(SeekFrom::Start(0)).unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_evicts_and_stops() {
        let trackers = Arc::new(Trackers::new());
        trackers.process_tree("app-1");

        let sweeper = trackers.spawn_sweeper(Duration::from_millis(10), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!trackers.contains("app-1"));

        sweeper.stop().await;
        trackers.process_tree("app-2");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(trackers.contains("app-2"));
    }
}
