//! File system activity records

use prost::{Enumeration, Message};

/// File operation performed by a monitored process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum FileKind {
    Create = 0,
    Open = 1,
    Read = 2,
    Write = 3,
    Delete = 4,
    Move = 5,
    Copy = 6,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Create => "Create",
            FileKind::Open => "Open",
            FileKind::Read => "Read",
            FileKind::Write => "Write",
            FileKind::Delete => "Delete",
            FileKind::Move => "Move",
            FileKind::Copy => "Copy",
        }
    }
}

/// File record (event kind 8)
#[derive(Clone, PartialEq, Message)]
pub struct File {
    #[prost(uint64, tag = "1")]
    pub ts: u64,

    #[prost(uint64, tag = "2")]
    pub pid: u64,

    #[prost(enumeration = "FileKind", tag = "3")]
    pub kind: i32,

    /// Source path (the only path for single-path operations)
    #[prost(string, tag = "4")]
    pub srcpath: String,

    /// Destination path for move and copy
    #[prost(string, tag = "5")]
    pub dstpath: String,
}

impl File {
    pub fn file_kind(&self) -> Option<FileKind> {
        FileKind::try_from(self.kind).ok()
    }

    /// Operation name, or the raw wire value for an unknown kind
    pub fn operation(&self) -> String {
        match self.file_kind() {
            Some(kind) => kind.as_str().to_string(),
            None => self.kind.to_string(),
        }
    }

    pub fn destination(&self) -> Option<&str> {
        if self.dstpath.is_empty() {
            None
        } else {
            Some(&self.dstpath)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        let mut file = File {
            kind: FileKind::Copy as i32,
            ..Default::default()
        };
        assert_eq!(file.operation(), "Copy");

        file.kind = 42;
        assert!(file.file_kind().is_none());
        assert_eq!(file.operation(), "42");
    }
}
