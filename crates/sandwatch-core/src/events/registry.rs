//! Registry activity records

use prost::{Enumeration, Message};

/// Registry operation performed by a monitored process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum RegistryKind {
    CreateKey = 0,
    OpenKey = 1,
    DeleteKey = 2,
    SetValueKeyInt = 3,
    SetValueKeyStr = 4,
    SetValueKeyDat = 5,
    DeleteValueKey = 6,
}

/// How the value of a registry operation is carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryValue {
    /// `valuei`
    Integer,
    /// `values`, passed through
    Text,
    /// `valued`, base64 encoded into `values`
    Binary,
    None,
}

impl RegistryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryKind::CreateKey => "CreateKey",
            RegistryKind::OpenKey => "OpenKey",
            RegistryKind::DeleteKey => "DeleteKey",
            RegistryKind::SetValueKeyInt => "SetValueKeyInt",
            RegistryKind::SetValueKeyStr => "SetValueKeyStr",
            RegistryKind::SetValueKeyDat => "SetValueKeyDat",
            RegistryKind::DeleteValueKey => "DeleteValueKey",
        }
    }

    pub fn value(&self) -> RegistryValue {
        match self {
            RegistryKind::SetValueKeyInt => RegistryValue::Integer,
            RegistryKind::SetValueKeyStr => RegistryValue::Text,
            RegistryKind::SetValueKeyDat => RegistryValue::Binary,
            RegistryKind::CreateKey
            | RegistryKind::OpenKey
            | RegistryKind::DeleteKey
            | RegistryKind::DeleteValueKey => RegistryValue::None,
        }
    }
}

/// Registry record (event kind 2)
#[derive(Clone, PartialEq, Message)]
pub struct Registry {
    #[prost(uint64, tag = "1")]
    pub ts: u64,

    #[prost(uint64, tag = "2")]
    pub pid: u64,

    #[prost(enumeration = "RegistryKind", tag = "3")]
    pub kind: i32,

    /// Full key (and value name) path
    #[prost(string, tag = "4")]
    pub path: String,

    #[prost(int64, tag = "5")]
    pub valuei: i64,

    #[prost(string, tag = "6")]
    pub values: String,

    #[prost(bytes = "vec", tag = "7")]
    pub valued: Vec<u8>,
}

impl Registry {
    /// Typed operation; `None` for a kind this build does not know
    pub fn registry_kind(&self) -> Option<RegistryKind> {
        RegistryKind::try_from(self.kind).ok()
    }

    /// Operation name, or the raw wire value for an unknown kind
    pub fn operation(&self) -> String {
        match self.registry_kind() {
            Some(kind) => kind.as_str().to_string(),
            None => self.kind.to_string(),
        }
    }
}
