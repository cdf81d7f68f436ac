//! Behavioral event records streamed by the in-guest monitor
//!
//! Every record is protobuf encoded on the wire and identified by a one-byte
//! kind tag in its frame header. Records are immutable once decoded.

pub mod file;
pub mod network;
pub mod process;
pub mod registry;
pub mod script;

pub use file::*;
pub use network::*;
pub use process::*;
pub use registry::*;
pub use script::*;

use prost::Message;

/// Frame kind tags understood by the decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Process,
    Registry,
    File,
    NetworkFlow,
    SyscallS,
    SyscallSS,
}

impl EventKind {
    /// Look up the record type for a frame tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(EventKind::Process),
            2 => Some(EventKind::Registry),
            8 => Some(EventKind::File),
            12 => Some(EventKind::NetworkFlow),
            102 => Some(EventKind::SyscallS),
            103 => Some(EventKind::SyscallSS),
            _ => None,
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            EventKind::Process => 1,
            EventKind::Registry => 2,
            EventKind::File => 8,
            EventKind::NetworkFlow => 12,
            EventKind::SyscallS => 102,
            EventKind::SyscallSS => 103,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Process => "process",
            EventKind::Registry => "registry",
            EventKind::File => "file",
            EventKind::NetworkFlow => "netflow",
            EventKind::SyscallS => "syscall_s",
            EventKind::SyscallSS => "syscall_ss",
        }
    }
}

/// A decoded monitor event
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Process(Process),
    File(File),
    Registry(Registry),
    NetworkFlow(NetworkFlow),
    Script(ScriptExecution),
}

impl Event {
    /// Deserialize a frame payload of the given kind
    pub fn decode(kind: EventKind, payload: &[u8]) -> Result<Self, prost::DecodeError> {
        Ok(match kind {
            EventKind::Process => Event::Process(Process::decode(payload)?),
            EventKind::Registry => Event::Registry(Registry::decode(payload)?),
            EventKind::File => Event::File(File::decode(payload)?),
            EventKind::NetworkFlow => Event::NetworkFlow(NetworkFlow::decode(payload)?),
            EventKind::SyscallS => Event::Script(ScriptExecution::OneArg(SyscallS::decode(payload)?)),
            EventKind::SyscallSS => {
                Event::Script(ScriptExecution::TwoArg(SyscallSS::decode(payload)?))
            }
        })
    }

    /// Serialize the record into a frame payload
    pub fn encode_payload(&self) -> Vec<u8> {
        match self {
            Event::Process(e) => e.encode_to_vec(),
            Event::File(e) => e.encode_to_vec(),
            Event::Registry(e) => e.encode_to_vec(),
            Event::NetworkFlow(e) => e.encode_to_vec(),
            Event::Script(ScriptExecution::OneArg(e)) => e.encode_to_vec(),
            Event::Script(ScriptExecution::TwoArg(e)) => e.encode_to_vec(),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Process(_) => EventKind::Process,
            Event::File(_) => EventKind::File,
            Event::Registry(_) => EventKind::Registry,
            Event::NetworkFlow(_) => EventKind::NetworkFlow,
            Event::Script(ScriptExecution::OneArg(_)) => EventKind::SyscallS,
            Event::Script(ScriptExecution::TwoArg(_)) => EventKind::SyscallSS,
        }
    }

    pub fn ts(&self) -> u64 {
        match self {
            Event::Process(e) => e.ts,
            Event::File(e) => e.ts,
            Event::Registry(e) => e.ts,
            Event::NetworkFlow(e) => e.ts,
            Event::Script(e) => e.ts(),
        }
    }

    pub fn pid(&self) -> u64 {
        match self {
            Event::Process(e) => e.pid,
            Event::File(e) => e.pid,
            Event::Registry(e) => e.pid,
            Event::NetworkFlow(e) => e.pid,
            Event::Script(e) => e.pid(),
        }
    }
}
