//! Process ancestry for one analysis task or shared context
//!
//! Events may arrive with gaps, so nothing here assumes an ancestor is
//! present: every lookup can come back empty.

use crate::events::Process;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Process tree shared through the resource tracker
pub type SharedProcessTree = Arc<Mutex<ProcessTree>>;

/// Map of pid to the latest record seen for it
#[derive(Debug, Clone, Default)]
pub struct ProcessTree {
    processes: HashMap<u64, Process>,
}

impl ProcessTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedProcessTree {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Insert or replace the record for a pid. Terminated processes stay in the
    /// map so late events for the pid can still be attributed.
    pub fn track(&mut self, process: Process) {
        self.processes.insert(process.pid, process);
    }

    pub fn get(&self, pid: u64) -> Option<&Process> {
        self.processes.get(&pid)
    }

    /// Record of the parent of `pid`, if both are tracked
    pub fn parent(&self, pid: u64) -> Option<&Process> {
        let process = self.processes.get(&pid)?;
        self.processes.get(&process.ppid)
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProcessStatus;

    fn proc(pid: u64, ppid: u64, image: &str) -> Process {
        Process {
            pid,
            ppid,
            image: image.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_untracked_pid_has_no_parent() {
        let tree = ProcessTree::new();
        assert!(tree.get(4).is_none());
        assert!(tree.parent(4).is_none());
    }

    #[test]
    fn test_parent_with_gap() {
        let mut tree = ProcessTree::new();
        tree.track(proc(10, 1, "a.exe"));
        tree.track(proc(20, 10, "b.exe"));

        assert_eq!(tree.parent(20).unwrap().image, "a.exe");
        // pid 1 was never seen
        assert!(tree.parent(10).is_none());
    }

    #[test]
    fn test_update_replaces_record() {
        let mut tree = ProcessTree::new();
        tree.track(proc(10, 1, "a.exe"));
        assert!(!tree.get(10).unwrap().is_terminated());

        let mut exited = proc(10, 1, "a.exe");
        exited.status = ProcessStatus::Terminated as i32;
        tree.track(exited);

        assert_eq!(tree.len(), 1);
        assert!(tree.get(10).unwrap().is_terminated());
    }
}
