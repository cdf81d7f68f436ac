//! Decoder for the binary event stream written by the in-guest monitor
//!
//! - **Frame**: framing, truncation detection and the optional file header
//! - Record deserialization into [`sandwatch_core::Event`]

pub mod frame;

pub use frame::{
    encode_frame, DecodeError, DecodeResult, Frame, FrameDecoder, FrameWriter, HEADER_LEN,
    MAX_PAYLOAD_LEN,
};
