//! `{"rpc": "<fn>", "args": [...]}` envelopes carried in Function and Broadcast bodies

use super::json_lite;
use crate::error::ParseError;
use std::fmt;

/// Function names understood by this protocol version
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RpcFunction {
    /// Download daemon is up; `args[0]` is its pid when known
    Complete,
    /// Ask the daemon to rescan its NZB directory
    UpdateList,
    /// Transfer worker(s) finished; args are worker ids
    ScpComplete,
    /// Transfer progress; `args[0]` is a fraction in `[0, 1]`
    Progress,
    /// Daemon history is empty
    Done,
    /// Job submission; args are search queries, none means "use the default job file"
    SearchAndGet,
}

impl RpcFunction {
    /// Every known function
    pub const ALL: [RpcFunction; 6] = [
        RpcFunction::Complete,
        RpcFunction::UpdateList,
        RpcFunction::ScpComplete,
        RpcFunction::Progress,
        RpcFunction::Done,
        RpcFunction::SearchAndGet,
    ];

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            RpcFunction::Complete => "usenet_complete",
            RpcFunction::UpdateList => "usenet_update_list",
            RpcFunction::ScpComplete => "usenet_scp_complete",
            RpcFunction::Progress => "usenet_progress",
            RpcFunction::Done => "usenet_done",
            RpcFunction::SearchAndGet => "usenet_nzb_search_and_get",
        }
    }

    /// Look up a wire name; unknown names return `None`
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

impl fmt::Display for RpcFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded envelope
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcEnvelope {
    /// Function name as sent, known or not
    pub function: String,
    /// Arguments with structural characters stripped
    pub args: Vec<String>,
}

impl RpcEnvelope {
    /// Known function, or `None` for names from a newer peer
    pub fn known_function(&self) -> Option<RpcFunction> {
        RpcFunction::from_name(&self.function)
    }
}

/// Build an envelope body
///
/// Arguments are emitted bare, e.g. `{"rpc": "usenet_progress", "args": [0.5]}`.
/// An argument that could not survive as a bare token (whitespace or JSON
/// punctuation) is quoted instead.
pub fn build(function: &str, args: &[String]) -> String {
    let args = args
        .iter()
        .map(|arg| {
            if is_bare_safe(arg) {
                arg.clone()
            } else {
                format!("\"{}\"", arg.replace(['"', '\\'], ""))
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{\"rpc\": \"{function}\", \"args\": [{args}]}}")
}

/// Build an envelope for a known function
pub fn build_call(function: RpcFunction, args: &[String]) -> String {
    build(function.as_str(), args)
}

/// Parse an envelope body
///
/// A missing `rpc` key is an error, a missing `args` key means no arguments.
pub fn parse(body: &str) -> Result<RpcEnvelope, ParseError> {
    let doc = json_lite::tokenize(body)?;
    let rpc = doc
        .find_value("rpc")
        .ok_or_else(|| ParseError::KeyNotFound("rpc".to_string()))?;
    let function = doc.text(rpc).to_string();

    let args = match doc.find_value("args") {
        Some(args) => doc.array_as_strings(args)?,
        None => Vec::new(),
    };

    Ok(RpcEnvelope { function, args })
}

fn is_bare_safe(arg: &str) -> bool {
    !arg.is_empty()
        && !arg
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\\' | '[' | ']' | '{' | '}' | ',' | ':'))
}
