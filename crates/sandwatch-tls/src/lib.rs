//! Sandwatch TLS - session key correlation
//!
//! Joins TLS session ids seen in a packet capture with master secrets logged
//! inside the guest. Both sides are keyed by the server random, which never
//! leaves this crate.

pub mod capture;
pub mod error;
pub mod secrets;

pub use capture::{read_sessions, CaptureHandle, TLS_PORT};
pub use error::{CorrelateError, CorrelateResult};
pub use secrets::{read_master_secrets, SecretsLog};

use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// session id → master secret, both hex
pub type SessionKeys = BTreeMap<String, String>;

/// Join capture sessions with logged secrets on the server random
///
/// Only the capture side is iterated; each session id appears at most once.
pub fn join(
    sessions: &BTreeMap<String, String>,
    secrets: &BTreeMap<String, String>,
) -> SessionKeys {
    sessions
        .iter()
        .filter_map(|(server_random, session_id)| {
            secrets
                .get(server_random)
                .map(|master_secret| (session_id.clone(), master_secret.clone()))
        })
        .collect()
}

/// Extract and join both sides from files
pub fn correlate(
    capture: impl AsRef<Path>,
    secrets_log: impl AsRef<Path>,
    port: u16,
) -> CorrelateResult<SessionKeys> {
    let sessions = read_sessions(capture, port)?;
    let secrets = read_master_secrets(secrets_log)?;
    Ok(join_logged(&sessions, &secrets))
}

/// Same as [`correlate`] but scanning an already open capture
pub fn correlate_with(
    capture: &mut CaptureHandle,
    secrets_log: impl AsRef<Path>,
) -> CorrelateResult<SessionKeys> {
    capture.scan()?;
    let secrets = read_master_secrets(secrets_log)?;
    Ok(join_logged(capture.sessions(), &secrets))
}

fn join_logged(
    sessions: &BTreeMap<String, String>,
    secrets: &BTreeMap<String, String>,
) -> SessionKeys {
    let keys = join(sessions, secrets);
    debug!(
        "Correlated {} keys from {} sessions and {} secrets",
        keys.len(),
        sessions.len(),
        secrets.len()
    );
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::tests::{server_hello_record, tcp_frame, write_capture};
    use crate::secrets::tests::{encode, prf_call, prf_info};

    fn fixture(dir: &Path, random: [u8; 32], session_id: &[u8], logged_random: &str) {
        write_capture(
            &dir.join("dump.pcap"),
            &[tcp_frame(443, 49152, &server_hello_record(&random, session_id))],
        );
        std::fs::write(
            dir.join("1234.bson"),
            encode(&[prf_info(), prf_call("key expansion", logged_random, "5ec2e7")]),
        )
        .unwrap();
    }

    #[test]
    fn test_correlate_match() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path(), [0x7a; 32], &[0x5e; 16], &"7A".repeat(32));

        let keys = correlate(dir.path().join("dump.pcap"), dir.path().join("1234.bson"), 443)
            .unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys.get(&"5e".repeat(16)).map(String::as_str), Some("5ec2e7"));
    }

    #[test]
    fn test_correlate_no_match_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path(), [0x7a; 32], &[0x5e; 16], &"01".repeat(32));

        let keys = correlate(dir.path().join("dump.pcap"), dir.path().join("1234.bson"), 443)
            .unwrap();
        assert!(keys.is_empty());
    }

    #[test]
    fn test_correlate_missing_secrets() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path(), [0x7a; 32], &[0x5e; 16], "00");

        let err = correlate(dir.path().join("dump.pcap"), dir.path().join("99.bson"), 443)
            .unwrap_err();
        assert!(matches!(err, CorrelateError::SecretsOpen { .. }));
    }

    #[test]
    fn test_correlate_with_open_capture() {
        let dir = tempfile::tempdir().unwrap();
        fixture(dir.path(), [0x7a; 32], &[0x5e; 16], &"7a".repeat(32));

        let mut handle = CaptureHandle::open(dir.path().join("dump.pcap"), TLS_PORT).unwrap();
        let keys = correlate_with(&mut handle, dir.path().join("1234.bson")).unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_correlate_truncated_capture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.pcap");
        let first = tcp_frame(443, 49152, &server_hello_record(&[0x7a; 32], &[0x5e; 16]));
        let second = tcp_frame(443, 49153, &server_hello_record(&[0x7b; 32], &[0x5f; 16]));
        write_capture(&path, &[first.clone(), second]);

        let full = std::fs::read(&path).unwrap();
        std::fs::write(&path, &full[..24 + 16 + first.len() + 30]).unwrap();
        std::fs::write(
            dir.path().join("1234.bson"),
            encode(&[prf_info(), prf_call("key expansion", &"7a".repeat(32), "aa")]),
        )
        .unwrap();

        let keys = correlate(&path, dir.path().join("1234.bson"), TLS_PORT).unwrap();
        assert_eq!(keys, BTreeMap::from([("5e".repeat(16), "aa".to_string())]));
    }

    #[test]
    fn test_join_single_direction() {
        let sessions = BTreeMap::from([
            ("r1".to_string(), "s1".to_string()),
            ("r2".to_string(), "s2".to_string()),
        ]);
        let secrets = BTreeMap::from([
            ("r2".to_string(), "m2".to_string()),
            ("r3".to_string(), "m3".to_string()),
        ]);

        let keys = join(&sessions, &secrets);
        assert_eq!(keys, BTreeMap::from([("s2".to_string(), "m2".to_string())]));
    }
}
