//! Frame layer of the monitor event stream
//!
//! Each frame is a 4 byte header followed by the payload:
//!
//! ```text
//! +---------+---------+---------+------+----------------------+
//! | len[0]  | len[1]  | len[2]  | kind | payload (len bytes)  |
//! +---------+---------+---------+------+----------------------+
//! ```
//!
//! The length is base-256 with the least significant byte first. A file may
//! start with a two line text header beginning with `FILE`, which is skipped.

use sandwatch_core::events::{Event, EventKind};
use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;
use tracing::{debug, trace};

/// Size of the frame header
pub const HEADER_LEN: usize = 4;

/// Largest payload a 3 byte length can describe
pub const MAX_PAYLOAD_LEN: usize = 0x00FF_FFFF;

const FILE_MAGIC: &[u8; 4] = b"FILE";

/// Decoder errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended inside a frame or the file header. The stream is
    /// rewound to where that frame began.
    #[error("Truncated stream: needed {needed} bytes, got {available}")]
    TruncatedStream { needed: usize, available: usize },

    #[error("Unsupported event kind: {0}")]
    UnsupportedKind(u8),

    #[error("Failed to decode {kind} payload: {source}")]
    Payload {
        kind: &'static str,
        source: prost::DecodeError,
    },

    #[error("Payload of {0} bytes exceeds the frame length limit")]
    FrameTooLarge(usize),
}

impl DecodeError {
    /// Producer may still be writing; retrying later can succeed
    pub fn is_truncation(&self) -> bool {
        matches!(self, DecodeError::TruncatedStream { .. })
    }

    /// The failed frame was consumed entirely, so decoding can continue
    /// with the next one
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DecodeError::UnsupportedKind(_) | DecodeError::Payload { .. }
        )
    }
}

pub type DecodeResult<T> = Result<T, DecodeError>;

/// One raw frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Event kind tag
    pub tag: u8,
    /// Serialized record
    pub payload: Vec<u8>,
}

/// Streaming decoder over a seekable source
pub struct FrameDecoder<R> {
    inner: R,
    header_checked: bool,
    frames: u64,
}

impl<R: Read + Seek> FrameDecoder<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            header_checked: false,
            frames: 0,
        }
    }

    /// Frames decoded so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Read the next raw frame. `Ok(None)` is a clean end of stream at a frame
    /// boundary.
    pub fn next_event(&mut self) -> DecodeResult<Option<Frame>> {
        if !self.header_checked {
            self.skip_file_header()?;
        }

        let mut header = [0u8; HEADER_LEN];
        let read = self.read_full(&mut header)?;
        if read == 0 {
            return Ok(None);
        }
        if read < HEADER_LEN {
            self.rewind(read)?;
            return Err(DecodeError::TruncatedStream {
                needed: HEADER_LEN,
                available: read,
            });
        }

        let len = header[..3]
            .iter()
            .rev()
            .fold(0usize, |acc, b| (acc << 8) | *b as usize);
        let tag = header[3];

        let mut payload = vec![0u8; len];
        let read = self.read_full(&mut payload)?;
        if read < len {
            self.rewind(HEADER_LEN + read)?;
            return Err(DecodeError::TruncatedStream {
                needed: HEADER_LEN + len,
                available: HEADER_LEN + read,
            });
        }

        self.frames += 1;
        trace!(tag, len, "Read frame");
        Ok(Some(Frame { tag, payload }))
    }

    /// Read and deserialize the next record
    pub fn next_message(&mut self) -> DecodeResult<Option<Event>> {
        let Some(frame) = self.next_event()? else {
            return Ok(None);
        };

        let kind = EventKind::from_tag(frame.tag).ok_or(DecodeError::UnsupportedKind(frame.tag))?;
        Event::decode(kind, &frame.payload)
            .map(Some)
            .map_err(|source| DecodeError::Payload {
                kind: kind.name(),
                source,
            })
    }

    /// Skip the optional `FILE` header, only meaningful at offset zero
    fn skip_file_header(&mut self) -> DecodeResult<()> {
        if self.inner.stream_position()? != 0 {
            self.header_checked = true;
            return Ok(());
        }

        let mut magic = [0u8; 4];
        let read = self.read_full(&mut magic)?;
        if read < magic.len() || &magic != FILE_MAGIC {
            self.inner.seek(SeekFrom::Start(0))?;
            // Too short to tell yet; look again on the next call
            self.header_checked = read == magic.len();
            return Ok(());
        }

        let mut consumed = magic.len();
        let mut newlines = 0;
        let mut byte = [0u8; 1];
        while newlines < 2 {
            if self.read_full(&mut byte)? == 0 {
                self.inner.seek(SeekFrom::Start(0))?;
                return Err(DecodeError::TruncatedStream {
                    needed: consumed + 1,
                    available: consumed,
                });
            }
            consumed += 1;
            if byte[0] == b'\n' {
                newlines += 1;
            }
        }

        debug!(bytes = consumed, "Skipped file header");
        self.header_checked = true;
        Ok(())
    }

    fn read_full(&mut self, mut buf: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while !buf.is_empty() {
            match self.inner.read(buf) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    buf = &mut buf[n..];
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn rewind(&mut self, bytes: usize) -> io::Result<()> {
        self.inner.seek(SeekFrom::Current(-(bytes as i64)))?;
        Ok(())
    }
}

/// Encode one frame
pub fn encode_frame(tag: u8, payload: &[u8]) -> DecodeResult<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(DecodeError::FrameTooLarge(payload.len()));
    }

    let len = payload.len();
    let mut frame = Vec::with_capacity(HEADER_LEN + len);
    frame.extend_from_slice(&[len as u8, (len >> 8) as u8, (len >> 16) as u8, tag]);
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Writes events in the monitor frame format
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Write the two line `FILE` header
    pub fn write_file_header(&mut self, description: &str) -> DecodeResult<()> {
        writeln!(self.inner, "FILE {}", description)?;
        writeln!(self.inner)?;
        Ok(())
    }

    pub fn write_frame(&mut self, tag: u8, payload: &[u8]) -> DecodeResult<()> {
        self.inner.write_all(&encode_frame(tag, payload)?)?;
        Ok(())
    }

    pub fn write_event(&mut self, event: &Event) -> DecodeResult<()> {
        self.write_frame(event.kind().tag(), &event.encode_payload())
    }

    pub fn flush(&mut self) -> DecodeResult<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandwatch_core::events::{
        File, FileKind, NetworkFlow, Process, ProcessStatus, ScriptExecution, SyscallSS,
        SyscallSSKind,
    };
    use std::io::Cursor;

    fn sample_events() -> Vec<Event> {
        vec![
            Event::Process(Process {
                ts: 10,
                pid: 1234,
                ppid: 1000,
                status: ProcessStatus::New as i32,
                image: "C:\\Windows\\System32\\cmd.exe".into(),
                command: "cmd.exe /c whoami".into(),
                orig: true,
            }),
            Event::File(File {
                ts: 11,
                pid: 1234,
                kind: FileKind::Write as i32,
                srcpath: "C:\\Users\\x\\AppData\\a.tmp".into(),
                dstpath: String::new(),
            }),
            Event::NetworkFlow(NetworkFlow {
                ts: 12,
                pid: 1234,
                proto: 6,
                srcip: 1,
                dstip: 2,
                srcport: 1025,
                dstport: 443,
            }),
            Event::Script(ScriptExecution::TwoArg(SyscallSS {
                ts: 13,
                pid: 1234,
                kind: SyscallSSKind::COleScriptCompile as i32,
                arg0: "document.write(1)".into(),
                arg1: "about:blank".into(),
            })),
        ]
    }

    fn encode_all(events: &[Event]) -> Vec<u8> {
        let mut writer = FrameWriter::new(Vec::new());
        for event in events {
            writer.write_event(event).unwrap();
        }
        writer.into_inner()
    }

    #[test]
    fn test_round_trip() {
        let events = sample_events();
        let bytes = encode_all(&events);

        let mut decoder = FrameDecoder::new(Cursor::new(bytes));
        let mut decoded = Vec::new();
        while let Some(event) = decoder.next_message().unwrap() {
            decoded.push(event);
        }
        assert_eq!(decoded, events);
        assert_eq!(decoder.frames(), 4);
    }

    #[test]
    fn test_raw_frame_keeps_tag() {
        let bytes = encode_frame(12, &[1, 2, 3]).unwrap();
        assert_eq!(bytes, vec![3, 0, 0, 12, 1, 2, 3]);

        let mut decoder = FrameDecoder::new(Cursor::new(bytes));
        let frame = decoder.next_event().unwrap().unwrap();
        assert_eq!(frame.tag, 12);
        assert_eq!(frame.payload, vec![1, 2, 3]);
    }

    #[test]
    fn test_length_is_little_endian() {
        let payload = vec![0u8; 0x0102];
        let bytes = encode_frame(8, &payload).unwrap();
        assert_eq!(&bytes[..4], &[0x02, 0x01, 0x00, 8]);

        let mut decoder = FrameDecoder::new(Cursor::new(bytes));
        assert_eq!(decoder.next_event().unwrap().unwrap().payload.len(), 0x0102);
    }

    #[test]
    fn test_empty_stream_is_end() {
        let mut decoder = FrameDecoder::new(Cursor::new(Vec::new()));
        assert!(decoder.next_message().unwrap().is_none());
    }

    #[test]
    fn test_truncated_at_frame_boundary_is_end() {
        let bytes = encode_all(&sample_events()[..2]);
        let mut decoder = FrameDecoder::new(Cursor::new(bytes));
        assert!(decoder.next_message().unwrap().is_some());
        assert!(decoder.next_message().unwrap().is_some());
        assert!(decoder.next_message().unwrap().is_none());
    }

    #[test]
    fn test_truncated_inside_header() {
        let mut bytes = encode_all(&sample_events()[..1]);
        let boundary = bytes.len() as u64;
        let next = encode_all(&sample_events()[1..2]);
        bytes.push(next[0]);

        let mut decoder = FrameDecoder::new(Cursor::new(bytes));
        assert!(decoder.next_message().unwrap().is_some());
        let err = decoder.next_message().unwrap_err();
        assert!(err.is_truncation());
        assert!(matches!(
            err,
            DecodeError::TruncatedStream {
                needed: 4,
                available: 1
            }
        ));
        assert_eq!(decoder.get_mut().position(), boundary);
    }

    #[test]
    fn test_truncated_inside_payload_rewinds() {
        let full = encode_all(&sample_events()[..1]);
        let cut = full[..full.len() - 3].to_vec();

        let mut decoder = FrameDecoder::new(Cursor::new(cut));
        let err = decoder.next_event().unwrap_err();
        assert!(err.is_truncation());
        assert!(!err.is_recoverable());
        assert_eq!(decoder.get_mut().position(), 0);
    }

    #[test]
    fn test_resume_after_truncation() {
        use std::io::Write as _;

        let full = encode_all(&sample_events()[..2]);
        let split = full.len() - 5;

        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&full[..split]).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let mut decoder = FrameDecoder::new(file);
        assert!(decoder.next_message().unwrap().is_some());
        assert!(decoder.next_message().unwrap_err().is_truncation());

        // Producer finishes the frame
        let position = decoder.get_mut().stream_position().unwrap();
        decoder.get_mut().seek(SeekFrom::End(0)).unwrap();
        decoder.get_mut().write_all(&full[split..]).unwrap();
        decoder.get_mut().seek(SeekFrom::Start(position)).unwrap();

        assert_eq!(
            decoder.next_message().unwrap(),
            Some(sample_events()[1].clone())
        );
        assert!(decoder.next_message().unwrap().is_none());
    }

    #[test]
    fn test_file_header_skipped() {
        let mut writer = FrameWriter::new(Vec::new());
        writer.write_file_header("onemon v2").unwrap();
        writer.write_event(&sample_events()[0]).unwrap();

        let mut decoder = FrameDecoder::new(Cursor::new(writer.into_inner()));
        assert_eq!(
            decoder.next_message().unwrap(),
            Some(sample_events()[0].clone())
        );
        assert!(decoder.next_message().unwrap().is_none());
    }

    #[test]
    fn test_partial_file_header() {
        let mut decoder = FrameDecoder::new(Cursor::new(b"FILE onemon\n".to_vec()));
        let err = decoder.next_event().unwrap_err();
        assert!(err.is_truncation());
        assert_eq!(decoder.get_mut().position(), 0);
    }

    #[test]
    fn test_unsupported_kind_is_skippable() {
        let mut bytes = encode_frame(99, b"junk").unwrap();
        bytes.extend(encode_all(&sample_events()[..1]));

        let mut decoder = FrameDecoder::new(Cursor::new(bytes));
        let err = decoder.next_message().unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedKind(99)));
        assert!(err.is_recoverable());
        assert_eq!(
            decoder.next_message().unwrap(),
            Some(sample_events()[0].clone())
        );
    }

    #[test]
    fn test_payload_error_reported() {
        let bytes = encode_frame(1, &[0x2a, 0x10, 0x41]).unwrap();
        let mut decoder = FrameDecoder::new(Cursor::new(bytes));
        let err = decoder.next_message().unwrap_err();
        assert!(matches!(err, DecodeError::Payload { kind: "process", .. }));
        assert!(decoder.next_message().unwrap().is_none());
    }

    #[test]
    fn test_frame_too_large() {
        let payload = vec![0u8; MAX_PAYLOAD_LEN + 1];
        assert!(matches!(
            encode_frame(1, &payload),
            Err(DecodeError::FrameTooLarge(_))
        ));
    }
}
