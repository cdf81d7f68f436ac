//! Secrets-log extraction: server random → master secret
//!
//! The log is a sequence of BSON documents, each prefixed by its total length
//! as a little-endian u32 (the standard BSON document layout). An `info`
//! record registers a call id with its name and argument names; every other
//! record is a call whose positional `args` are interpreted through that
//! registration.

use crate::error::{CorrelateError, CorrelateResult};
use bson::{Bson, Document};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;
use tracing::{debug, trace};

/// Key derivation through the TLS PRF
const PRF: &str = "PRF";
/// Label passed to the PRF when expanding the master secret into keys
const KEY_EXPANSION: &str = "key expansion";
/// Legacy SSL3 key generation
const SSL3_GENERATE_KEY_MATERIAL: &str = "Ssl3GenerateKeyMaterial";

/// Smallest valid document: length prefix plus terminating nul
const MIN_RECORD_LEN: u32 = 5;

/// A registered call: its name and argument name → position
#[derive(Debug, Default)]
struct CallInfo {
    name: String,
    args: HashMap<String, usize>,
}

/// Accumulates master secrets from secrets-log records
#[derive(Debug, Default)]
pub struct SecretsLog {
    calls: HashMap<i64, CallInfo>,
    secrets: BTreeMap<String, String>,
}

impl SecretsLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Master secrets collected so far, keyed by hex server random
    pub fn secrets(&self) -> &BTreeMap<String, String> {
        &self.secrets
    }

    pub fn into_secrets(self) -> BTreeMap<String, String> {
        self.secrets
    }

    /// Read records until the end of the stream
    ///
    /// A record cut short at the end of the stream is ignored; the log may
    /// still be in the middle of being written.
    pub fn read_from<R: Read>(&mut self, mut reader: R) -> CorrelateResult<()> {
        let mut offset = 0u64;
        loop {
            let mut size = [0u8; 4];
            if !read_full(&mut reader, &mut size)? {
                return Ok(());
            }

            let len = u32::from_le_bytes(size);
            if len < MIN_RECORD_LEN {
                return Err(CorrelateError::SecretsMalformed {
                    offset,
                    reason: format!("record length {} too small", len),
                });
            }

            let mut record = vec![0u8; len as usize];
            record[..4].copy_from_slice(&size);
            if !read_full(&mut reader, &mut record[4..])? {
                debug!("Partial secrets log record at offset {}", offset);
                return Ok(());
            }

            let doc = Document::from_reader(record.as_slice()).map_err(|e| {
                CorrelateError::SecretsMalformed {
                    offset,
                    reason: e.to_string(),
                }
            })?;
            self.record(&doc);

            offset += u64::from(len);
        }
    }

    /// Apply one decoded record
    pub fn record(&mut self, doc: &Document) {
        let Some(id) = doc.get("I").and_then(as_integer) else {
            trace!("Secrets record without call id");
            return;
        };
        let args = match doc.get_array("args") {
            Ok(args) => args.as_slice(),
            Err(_) => &[],
        };

        if doc.get_str("type").ok() == Some("info") {
            let info = CallInfo {
                name: doc.get_str("name").unwrap_or_default().to_string(),
                args: args
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, name)| name.as_str().map(|n| (n.to_string(), idx)))
                    .collect(),
            };
            self.calls.insert(id, info);
            return;
        }

        let Some(info) = self.calls.get(&id) else {
            trace!("Secrets record for unregistered call {}", id);
            return;
        };
        let named = |name: &str| -> Option<String> {
            info.args
                .get(name)
                .and_then(|&idx| args.get(idx))
                .and_then(value_string)
        };

        match info.name.as_str() {
            PRF => {
                if args.get(2).and_then(Bson::as_str) != Some(KEY_EXPANSION) {
                    return;
                }
                if let (Some(server_random), Some(master_secret)) =
                    (named("server_random"), named("master_secret"))
                {
                    self.secrets
                        .insert(server_random.to_ascii_lowercase(), master_secret);
                }
            }
            SSL3_GENERATE_KEY_MATERIAL => {
                let client_random = named("client_random").unwrap_or_default();
                let server_random = named("server_random").unwrap_or_default();
                if client_random.is_empty() || server_random.is_empty() {
                    return;
                }
                if let Some(master_secret) = named("master_secret") {
                    self.secrets
                        .insert(server_random.to_ascii_lowercase(), master_secret);
                }
            }
            _ => {}
        }
    }
}

/// Read a whole secrets log file
pub fn read_master_secrets(path: impl AsRef<Path>) -> CorrelateResult<BTreeMap<String, String>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| CorrelateError::SecretsOpen {
        path: path.to_path_buf(),
        source,
    })?;

    let mut log = SecretsLog::new();
    log.read_from(BufReader::new(file))?;
    Ok(log.into_secrets())
}

/// Fill `buf` completely; `false` if the stream ended first
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> CorrelateResult<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn as_integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(v) => Some(i64::from(*v)),
        Bson::Int64(v) => Some(*v),
        _ => None,
    }
}

/// String or binary argument as text; binary values become lowercase hex
fn value_string(value: &Bson) -> Option<String> {
    match value {
        Bson::String(s) => Some(s.clone()),
        Bson::Binary(bin) => Some(hex::encode(&bin.bytes)),
        _ => None,
    }
}
