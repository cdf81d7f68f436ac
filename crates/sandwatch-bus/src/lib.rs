//! Sandwatch Bus - event bus transport
//!
//! Newline-delimited JSON over one persistent TCP connection. The client
//! receives task notifications and the publisher sends results back over
//! the same connection. [`JsonlPublisher`] is the offline counterpart that
//! writes to a file instead.

pub mod client;
pub mod error;
pub mod jsonl;
pub mod publisher;

pub use client::{handle_line, read_loop, Backoff, BusClient, BusClientConfig, InboundTask, ReadEnd};
pub use error::{BusError, BusResult};
pub use jsonl::{JsonlPublisher, JsonlPublisherConfig};
pub use publisher::BusPublisher;
