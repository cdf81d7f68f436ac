//! Error types for the bus transport

use thiserror::Error;

/// Bus error type
#[derive(Error, Debug)]
pub enum BusError {
    #[error("error connecting to event bus at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type BusResult<T> = Result<T, BusError>;
