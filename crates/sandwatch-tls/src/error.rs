//! Error types for TLS key correlation

use pcap_file::DataLink;
use std::path::PathBuf;
use thiserror::Error;

/// Correlation error type
#[derive(Error, Debug)]
pub enum CorrelateError {
    #[error("error opening capture {path}: {source}")]
    CaptureOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("capture parse error: {0}")]
    Capture(#[from] pcap_file::PcapError),

    #[error("unsupported capture link type: {0:?}")]
    UnsupportedLinkType(DataLink),

    #[error("error opening secrets log {path}: {source}")]
    SecretsOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed secrets log record at offset {offset}: {reason}")]
    SecretsMalformed { offset: u64, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CorrelateResult<T> = Result<T, CorrelateError>;
