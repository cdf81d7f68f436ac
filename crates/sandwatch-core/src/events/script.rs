//! Script engine hooks (event kinds 102 and 103)

use prost::{Enumeration, Message};

/// Hooked script call carrying one string argument
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum SyscallSKind {
    Unknown = 0,
    JsGlobalObjectDefaultEvalHelper = 1,
    CDocumentWrite = 2,
}

/// Hooked script call carrying two string arguments
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum SyscallSSKind {
    Unknown = 0,
    COleScriptCompile = 1,
    CWindowAddTimeoutCode = 2,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyscallS {
    #[prost(uint64, tag = "1")]
    pub ts: u64,

    #[prost(uint64, tag = "2")]
    pub pid: u64,

    #[prost(enumeration = "SyscallSKind", tag = "3")]
    pub kind: i32,

    #[prost(string, tag = "4")]
    pub arg0: String,
}

#[derive(Clone, PartialEq, Message)]
pub struct SyscallSS {
    #[prost(uint64, tag = "1")]
    pub ts: u64,

    #[prost(uint64, tag = "2")]
    pub pid: u64,

    #[prost(enumeration = "SyscallSSKind", tag = "3")]
    pub kind: i32,

    #[prost(string, tag = "4")]
    pub arg0: String,

    #[prost(string, tag = "5")]
    pub arg1: String,
}

/// A script execution observed inside the guest
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptExecution {
    OneArg(SyscallS),
    TwoArg(SyscallSS),
}

/// Code handed to a script engine, with the context it ran in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptCode<'a> {
    pub code: &'a str,
    pub context: Option<&'a str>,
}

impl ScriptExecution {
    pub fn ts(&self) -> u64 {
        match self {
            ScriptExecution::OneArg(s) => s.ts,
            ScriptExecution::TwoArg(s) => s.ts,
        }
    }

    pub fn pid(&self) -> u64 {
        match self {
            ScriptExecution::OneArg(s) => s.pid,
            ScriptExecution::TwoArg(s) => s.pid,
        }
    }

    /// Code for the hooks that evaluate script. Other hooks yield `None`.
    pub fn code(&self) -> Option<ScriptCode<'_>> {
        match self {
            ScriptExecution::OneArg(s)
                if matches!(
                    SyscallSKind::try_from(s.kind),
                    Ok(SyscallSKind::JsGlobalObjectDefaultEvalHelper)
                ) =>
            {
                Some(ScriptCode {
                    code: &s.arg0,
                    context: None,
                })
            }
            ScriptExecution::TwoArg(s)
                if matches!(
                    SyscallSSKind::try_from(s.kind),
                    Ok(SyscallSSKind::COleScriptCompile)
                ) =>
            {
                Some(ScriptCode {
                    code: &s.arg0,
                    context: Some(&s.arg1),
                })
            }
            _ => None,
        }
    }
}
