//! Capture-side extraction: server random → session id
//!
//! Every TCP segment to or from the TLS port is decoded as a sequence of TLS
//! records. Most handshakes span several segments, so a segment that fails to
//! decode is expected and simply skipped; only ServerHello messages that fit
//! in one segment contribute.

use crate::error::{CorrelateError, CorrelateResult};
use etherparse::{SlicedPacket, TransportSlice};
use pcap_file::pcap::PcapReader;
use pcap_file::{DataLink, PcapError};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tls_parser::{parse_tls_plaintext, TlsMessage, TlsMessageHandshake};
use tracing::{debug, trace};

/// Default TLS port
pub const TLS_PORT: u16 = 443;

/// An open packet capture with the sessions extracted from it so far
///
/// The reader keeps its position between scans, so a capture that is still
/// being written can be scanned again later and only the appended packets
/// are read.
pub struct CaptureHandle {
    path: PathBuf,
    reader: PcapReader<File>,
    link: DataLink,
    port: u16,
    sessions: BTreeMap<String, String>,
    packets: u64,
}

impl CaptureHandle {
    /// Open a capture and validate its global header
    pub fn open(path: impl AsRef<Path>, port: u16) -> CorrelateResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| CorrelateError::CaptureOpen {
            path: path.clone(),
            source,
        })?;
        let reader = PcapReader::new(file)?;
        let link = reader.header().datalink;

        match link {
            DataLink::ETHERNET | DataLink::RAW | DataLink::IPV4 | DataLink::IPV6 => {}
            other => return Err(CorrelateError::UnsupportedLinkType(other)),
        }

        Ok(Self {
            path,
            reader,
            link,
            port,
            sessions: BTreeMap::new(),
            packets: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Packets read so far
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Sessions extracted so far, keyed by hex server random
    pub fn sessions(&self) -> &BTreeMap<String, String> {
        &self.sessions
    }

    /// Read every packet appended since the last scan
    ///
    /// A packet cut short at the end of the file stops the scan without error;
    /// it is picked up by the next scan once the writer has completed it.
    pub fn scan(&mut self) -> CorrelateResult<&BTreeMap<String, String>> {
        while let Some(packet) = self.reader.next_packet() {
            let packet = match packet {
                Ok(packet) => packet,
                Err(PcapError::IncompleteBuffer) => {
                    debug!("Partial packet at end of {}", self.path.display());
                    break;
                }
                // The read buffer reports a short trailing record as EOF and
                // keeps the partial bytes for the next scan
                Err(PcapError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    debug!("Partial packet at end of {}", self.path.display());
                    break;
                }
                Err(e) => return Err(e.into()),
            };
            self.packets += 1;

            for (random, session_id) in server_hellos(self.link, &packet.data, self.port) {
                trace!("ServerHello random={} session_id={}", random, session_id);
                self.sessions.insert(random, session_id);
            }
        }

        Ok(&self.sessions)
    }
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("path", &self.path)
            .field("link", &self.link)
            .field("port", &self.port)
            .field("packets", &self.packets)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

/// One-shot scan of a capture file
pub fn read_sessions(
    path: impl AsRef<Path>,
    port: u16,
) -> CorrelateResult<BTreeMap<String, String>> {
    let mut handle = CaptureHandle::open(path, port)?;
    handle.scan()?;
    Ok(handle.sessions)
}

/// ServerHello (random, session id) pairs carried by one captured frame
fn server_hellos(link: DataLink, data: &[u8], port: u16) -> Vec<(String, String)> {
    let sliced = match link {
        DataLink::ETHERNET => SlicedPacket::from_ethernet(data).map_err(|e| e.to_string()),
        _ => SlicedPacket::from_ip(data).map_err(|e| e.to_string()),
    };
    let sliced = match sliced {
        Ok(sliced) => sliced,
        Err(e) => {
            trace!("Skipping undecodable frame: {}", e);
            return Vec::new();
        }
    };

    let Some(TransportSlice::Tcp(tcp)) = sliced.transport else {
        return Vec::new();
    };
    if tcp.source_port() != port && tcp.destination_port() != port {
        return Vec::new();
    }

    let mut hellos = Vec::new();
    let mut rest = tcp.payload();
    while !rest.is_empty() {
        match parse_tls_plaintext(rest) {
            Ok((remaining, record)) => {
                for msg in &record.msg {
                    if let TlsMessage::Handshake(TlsMessageHandshake::ServerHello(hello)) = msg {
                        match hello.session_id {
                            Some(session_id) if !session_id.is_empty() => {
                                hellos.push((hex::encode(hello.random), hex::encode(session_id)));
                            }
                            _ => {}
                        }
                    }
                }
                rest = remaining;
            }
            Err(e) => {
                debug!("TLS decode stopped after partial segment: {:?}", e);
                break;
            }
        }
    }

    hellos
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use etherparse::PacketBuilder;
    use pcap_file::pcap::{PcapPacket, PcapWriter};
    use std::io::Write;
    use std::time::Duration;

    /// TLS record holding a single ServerHello
    pub(crate) fn server_hello_record(random: &[u8; 32], session_id: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&[0x03, 0x03]);
        body.extend_from_slice(random);
        body.push(session_id.len() as u8);
        body.extend_from_slice(session_id);
        body.extend_from_slice(&[0xc0, 0x2f]); // cipher
        body.push(0); // compression
        body.extend_from_slice(&[0x00, 0x00]); // extensions

        let mut handshake = vec![0x02];
        handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        handshake.extend_from_slice(&body);

        let mut record = vec![0x16, 0x03, 0x03];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    pub(crate) fn tcp_frame(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
            .ipv4([93, 184, 216, 34], [10, 0, 2, 15], 64)
            .tcp(src_port, dst_port, 1000, 65535);
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, payload).unwrap();
        frame
    }

    pub(crate) fn write_capture(path: &Path, frames: &[Vec<u8>]) {
        let file = File::create(path).unwrap();
        let mut writer = PcapWriter::new(file).unwrap();
        for (i, frame) in frames.iter().enumerate() {
            let packet = PcapPacket::new(Duration::from_secs(i as u64), frame.len() as u32, frame);
            writer.write_packet(&packet).unwrap();
        }
    }

    #[test]
    fn test_server_hello_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.pcap");
        let random = [0xab; 32];
        write_capture(
            &path,
            &[tcp_frame(443, 49152, &server_hello_record(&random, &[0x11; 32]))],
        );

        let sessions = read_sessions(&path, TLS_PORT).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions.get(&"ab".repeat(32)), Some(&"11".repeat(32)));
    }

    #[test]
    fn test_empty_session_id_and_other_ports_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.pcap");
        write_capture(
            &path,
            &[
                tcp_frame(443, 49152, &server_hello_record(&[0x01; 32], &[])),
                tcp_frame(8443, 49153, &server_hello_record(&[0x02; 32], &[0x22; 16])),
            ],
        );

        assert!(read_sessions(&path, TLS_PORT).unwrap().is_empty());
    }

    #[test]
    fn test_partial_tls_segment_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.pcap");
        let full = server_hello_record(&[0x03; 32], &[0x33; 32]);
        write_capture(
            &path,
            &[
                tcp_frame(443, 49152, &full[..20]),
                tcp_frame(49152, 443, b"not tls at all"),
                tcp_frame(443, 49152, &full),
            ],
        );

        let sessions = read_sessions(&path, TLS_PORT).unwrap();
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_incremental_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.pcap");
        let first = tcp_frame(443, 49152, &server_hello_record(&[0x04; 32], &[0x44; 8]));
        let second = tcp_frame(443, 49153, &server_hello_record(&[0x05; 32], &[0x55; 8]));
        write_capture(&path, &[first.clone(), second]);

        let full = std::fs::read(&path).unwrap();
        // Global header, first packet, and half of the second packet
        let cut = 24 + 16 + first.len() + 10;
        std::fs::write(&path, &full[..cut]).unwrap();

        let mut handle = CaptureHandle::open(&path, TLS_PORT).unwrap();
        assert_eq!(handle.scan().unwrap().len(), 1);
        assert_eq!(handle.packets(), 1);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&full[cut..]).unwrap();
        file.flush().unwrap();

        assert_eq!(handle.scan().unwrap().len(), 2);
        assert_eq!(handle.packets(), 2);
    }

    #[test]
    fn test_truncated_capture_keeps_complete_packets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.pcap");
        let first = tcp_frame(443, 49152, &server_hello_record(&[0x06; 32], &[0x66; 8]));
        let second = tcp_frame(443, 49153, &server_hello_record(&[0x07; 32], &[0x77; 8]));
        write_capture(&path, &[first.clone(), second]);

        let full = std::fs::read(&path).unwrap();
        // Cut inside the second record header
        std::fs::write(&path, &full[..24 + 16 + first.len() + 7]).unwrap();

        let sessions = read_sessions(&path, TLS_PORT).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions.get(&"06".repeat(32)), Some(&"66".repeat(8)));
    }

    #[test]
    fn test_missing_capture() {
        let err = read_sessions("/nonexistent/dump.pcap", TLS_PORT).unwrap_err();
        assert!(matches!(err, CorrelateError::CaptureOpen { .. }));
    }

    #[test]
    fn test_garbage_capture_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.pcap");
        std::fs::write(&path, b"definitely not a pcap file header").unwrap();

        let err = read_sessions(&path, TLS_PORT).unwrap_err();
        assert!(matches!(err, CorrelateError::Capture(_)));
    }
}
