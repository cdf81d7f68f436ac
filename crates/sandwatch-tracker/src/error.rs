//! Error types for the resource tracker

use sandwatch_tls::CorrelateError;
use std::path::PathBuf;
use thiserror::Error;

/// Tracker error type
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("error opening {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("capture error: {0}")]
    Capture(#[from] CorrelateError),
}

impl TrackerError {
    /// Whether the underlying file does not exist (yet)
    pub fn is_not_found(&self) -> bool {
        match self {
            TrackerError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            TrackerError::Capture(CorrelateError::CaptureOpen { source, .. }) => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;
