//! Process lifecycle records

use prost::{Enumeration, Message};
use serde::{Deserialize, Serialize};

/// State of a process as reported by the monitor
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration, Serialize, Deserialize,
)]
#[repr(i32)]
pub enum ProcessStatus {
    /// Process was started while the monitor was running
    New = 0,
    /// Process was already running when monitoring began
    Existing = 1,
    /// Monitor-internal process, not part of the analysis
    Ignore = 2,
    /// Process exited
    Terminated = 3,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::New => "New",
            ProcessStatus::Existing => "Existing",
            ProcessStatus::Ignore => "Ignore",
            ProcessStatus::Terminated => "Terminated",
        }
    }
}

/// Process record (event kind 1)
#[derive(Clone, PartialEq, Message)]
pub struct Process {
    /// Monotonic timestamp
    #[prost(uint64, tag = "1")]
    pub ts: u64,

    /// Process ID
    #[prost(uint64, tag = "2")]
    pub pid: u64,

    /// Parent process ID
    #[prost(uint64, tag = "3")]
    pub ppid: u64,

    #[prost(enumeration = "ProcessStatus", tag = "4")]
    pub status: i32,

    /// Executable image path
    #[prost(string, tag = "5")]
    pub image: String,

    /// Full command line
    #[prost(string, tag = "6")]
    pub command: String,

    /// Whether this is the original sample
    #[prost(bool, tag = "7")]
    pub orig: bool,
}

impl Process {
    /// Status as a typed value; `None` for an unknown wire value
    pub fn process_status(&self) -> Option<ProcessStatus> {
        ProcessStatus::try_from(self.status).ok()
    }

    /// Status name, or the raw wire value when unknown
    pub fn status_name(&self) -> String {
        match self.process_status() {
            Some(status) => status.as_str().to_string(),
            None => self.status.to_string(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.process_status() == Some(ProcessStatus::Terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_status_is_kept() {
        let process = Process {
            status: 42,
            ..Default::default()
        };
        assert_eq!(process.process_status(), None);
        assert_eq!(process.status_name(), "42");
        assert!(!process.is_terminated());
    }

    #[test]
    fn test_terminated() {
        let process = Process {
            status: ProcessStatus::Terminated as i32,
            ..Default::default()
        };
        assert!(process.is_terminated());
        assert_eq!(process.status_name(), "Terminated");
    }
}
