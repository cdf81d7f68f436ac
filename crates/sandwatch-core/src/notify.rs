//! Bus message types
//!
//! Every message on the bus is one JSON object per line:
//! `{"type": ..., "action": ..., "body": {"event": <name>, "body": {...}}}`.
//! Outbound notifications are adjacently tagged so the event name and the
//! field object land in `event` and `body` respectively.

use serde::{Deserialize, Serialize};

/// Envelope around every bus message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<B> {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    pub body: B,
}

/// Outbound notification kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "body", rename_all = "lowercase")]
pub enum Notification {
    Signature(SignatureBody),
    Process(ProcessBody),
    Netflow(NetflowBody),
    File(FileBody),
    Registry(RegistryBody),
    Javascript(JavascriptBody),
    Tlskeys(TlsKeysBody),
    Error(ErrorBody),
    Finished(FinishedBody),
}

impl Notification {
    pub fn event_name(&self) -> &'static str {
        match self {
            Notification::Signature(_) => "signature",
            Notification::Process(_) => "process",
            Notification::Netflow(_) => "netflow",
            Notification::File(_) => "file",
            Notification::Registry(_) => "registry",
            Notification::Javascript(_) => "javascript",
            Notification::Tlskeys(_) => "tlskeys",
            Notification::Error(_) => "error",
            Notification::Finished(_) => "finished",
        }
    }

    pub fn task_id(&self) -> u64 {
        match self {
            Notification::Signature(b) => b.task_id,
            Notification::Process(b) => b.task_id,
            Notification::Netflow(b) => b.task_id,
            Notification::File(b) => b.task_id,
            Notification::Registry(b) => b.task_id,
            Notification::Javascript(b) => b.task_id,
            Notification::Tlskeys(b) => b.task_id,
            Notification::Error(b) => b.task_id,
            Notification::Finished(b) => b.task_id,
        }
    }

    /// Wrap into the bus envelope
    pub fn into_envelope(self) -> Envelope<Notification> {
        Envelope {
            kind: "event".to_string(),
            action: None,
            body: self,
        }
    }

    pub fn error(task_id: u64, error: impl Into<String>) -> Self {
        Notification::Error(ErrorBody {
            task_id,
            error: error.into(),
        })
    }

    pub fn finished(task_id: u64, action: impl Into<String>) -> Self {
        Notification::Finished(FinishedBody {
            task_id,
            action: action.into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureBody {
    #[serde(rename = "taskId")]
    pub task_id: u64,
    pub signature: String,
    pub description: String,
    pub ioc: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessBody {
    #[serde(rename = "taskId")]
    pub task_id: u64,
    pub ts: u64,
    pub pid: u64,
    pub ppid: u64,
    pub status: String,
    pub image: String,
    pub command: String,
    pub orig: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetflowBody {
    #[serde(rename = "taskId")]
    pub task_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<u64>,
    pub proto: u32,
    pub srcip: String,
    pub dstip: String,
    pub srcport: u32,
    pub dstport: u32,
    #[serde(flatten)]
    pub process: Option<ProcessMeta>,
}

/// Image and parent of the process behind an event, when it is tracked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessMeta {
    pub pid: u64,
    pub ppid: u64,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileBody {
    #[serde(rename = "taskId")]
    pub task_id: u64,
    pub ts: u64,
    pub pid: u64,
    pub operation: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dstpath: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryBody {
    #[serde(rename = "taskId")]
    pub task_id: u64,
    pub ts: u64,
    pub pid: u64,
    pub operation: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valuei: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JavascriptBody {
    #[serde(rename = "taskId")]
    pub task_id: u64,
    pub code: String,
    /// Script context; empty when the hook carries none
    pub meta: String,
    #[serde(flatten)]
    pub process: Option<ProcessMeta>,
}

/// One recovered TLS session key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsKey {
    pub session_id: String,
    pub master_secret: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsKeysBody {
    #[serde(rename = "taskId")]
    pub task_id: u64,
    pub tlskeys: Vec<TlsKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "taskId")]
    pub task_id: u64,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishedBody {
    #[serde(rename = "taskId")]
    pub task_id: u64,
    pub action: String,
}

// =============================================================================
// INBOUND
// =============================================================================

/// Subscription request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeBody {
    pub events: Vec<String>,
}

/// Build the subscription message for the given event names
pub fn subscribe_message(events: &[String]) -> Envelope<SubscribeBody> {
    Envelope {
        kind: "protocol".to_string(),
        action: Some("subscribe".to_string()),
        body: SubscribeBody {
            events: events.to_vec(),
        },
    }
}

/// Inbound `{event, body}` pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub event: String,
    #[serde(default)]
    pub body: TaskNotification,
}

/// Task notification fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskNotification {
    #[serde(default)]
    pub taskid: u64,

    /// Shared analysis context id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lsass_pid: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl TaskNotification {
    /// Context id, with an empty string meaning no shared context
    pub fn context_id(&self) -> &str {
        self.appid.as_deref().unwrap_or("")
    }
}

/// Kind of work requested by an inbound notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskAction {
    /// Tail the monitor event stream of a task
    EventStream,
    /// Recover TLS session keys for a task
    DumpTls,
}

impl TaskAction {
    pub fn from_event(name: &str) -> Option<Self> {
        match name {
            "massurltask" | "longtermtask" => Some(TaskAction::EventStream),
            "dumptls" => Some(TaskAction::DumpTls),
            _ => None,
        }
    }
}

/// Parse one inbound line
pub fn parse_inbound(line: &str) -> Result<Envelope<InboundEvent>, serde_json::Error> {
    serde_json::from_str(line)
}
