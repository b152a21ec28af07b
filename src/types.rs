//! Core types shared by the client and server control loops

use crate::error::CodecError;
use std::fmt;

/// Instruction tag carried in the first byte of every frame
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum InstructionKind {
    /// Acknowledgment of the previous instruction
    Response = 0,
    /// Acknowledgment with work still outstanding
    ResponsePending = 1,
    /// Return the peer to its initial handshake state
    Reset = 2,
    /// Handshake kickoff
    Command = 3,
    /// Download request
    Download = 4,
    /// Function call carrying an RPC envelope
    Function = 5,
    /// Liveness probe, echoed by the server
    Pulse = 6,
    /// Asynchronous notification carrying an RPC envelope, echoed by the server
    Broadcast = 7,
}

impl InstructionKind {
    /// Wire tag for this instruction
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for InstructionKind {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(InstructionKind::Response),
            1 => Ok(InstructionKind::ResponsePending),
            2 => Ok(InstructionKind::Reset),
            3 => Ok(InstructionKind::Command),
            4 => Ok(InstructionKind::Download),
            5 => Ok(InstructionKind::Function),
            6 => Ok(InstructionKind::Pulse),
            7 => Ok(InstructionKind::Broadcast),
            other => Err(CodecError::UnknownInstruction(other)),
        }
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InstructionKind::Response => "response",
            InstructionKind::ResponsePending => "response_pending",
            InstructionKind::Reset => "reset",
            InstructionKind::Command => "command",
            InstructionKind::Download => "download",
            InstructionKind::Function => "function",
            InstructionKind::Pulse => "pulse",
            InstructionKind::Broadcast => "broadcast",
        };
        f.write_str(name)
    }
}

/// Body sent with a default acknowledgment
pub const RESPONSE_BODY: &str = "ok";

/// Body sent with every client pulse
pub const PULSE_BODY: &str = "working";

/// One control-plane protocol unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Instruction tag
    pub instruction: InstructionKind,
    /// Raw body, UTF-8 text in practice
    pub body: Vec<u8>,
}

impl Message {
    /// Create a message from any byte-like body
    pub fn new(instruction: InstructionKind, body: impl Into<Vec<u8>>) -> Self {
        Self {
            instruction,
            body: body.into(),
        }
    }

    /// Default acknowledgment
    pub fn response() -> Self {
        Self::new(InstructionKind::Response, RESPONSE_BODY)
    }

    /// Handshake kickoff
    pub fn command() -> Self {
        Self::new(InstructionKind::Command, "command")
    }

    /// Reset to the initial handshake state
    pub fn reset() -> Self {
        Self::new(InstructionKind::Reset, "reset")
    }

    /// Liveness pulse
    pub fn pulse() -> Self {
        Self::new(InstructionKind::Pulse, PULSE_BODY)
    }

    /// Function call with an RPC envelope body
    pub fn function(body: impl Into<Vec<u8>>) -> Self {
        Self::new(InstructionKind::Function, body)
    }

    /// Broadcast with an RPC envelope body
    pub fn broadcast(body: impl Into<Vec<u8>>) -> Self {
        Self::new(InstructionKind::Broadcast, body)
    }

    /// Body interpreted as UTF-8, with invalid sequences replaced
    pub fn body_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Identifier the server transport assigns to each accepted connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identifier of a transfer worker, sent as the `usenet_scp_complete` argument
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for WorkerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(WorkerId)
    }
}
