//! Wire codec for the grader control channel.
//!
//! Outbound traffic is a single octet per command. Inbound traffic is
//! free-form text, classified by a reserved `__` prefix: the exact `__stop`
//! sentinel asks the client to shut down, any other reserved payload is
//! malformed, and everything else is an opaque student identifier.

use std::fmt;

use serde::Serialize;

use crate::error::ProtocolError;

/// Prefix reserved for out-of-band directives from the grader.
pub const RESERVED_PREFIX: &str = "__";

/// Sentinel payload that requests host termination.
pub const STOP_SENTINEL: &str = "__stop";

/// Control codes sent from the client to the grader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Start,
    Review,
    Stop,
}

impl Command {
    pub const ALL: [Command; 3] = [Command::Start, Command::Review, Command::Stop];

    /// The octet this command occupies on the wire.
    pub fn byte(self) -> u8 {
        match self {
            Command::Start => 1,
            Command::Review => 2,
            Command::Stop => 3,
        }
    }

    pub fn encode(self) -> [u8; 1] {
        [self.byte()]
    }

    /// Inverse of [`Command::byte`], used by the grader side.
    pub fn decode(byte: u8) -> Result<Self, ProtocolError> {
        match byte {
            1 => Ok(Command::Start),
            2 => Ok(Command::Review),
            3 => Ok(Command::Stop),
            other => Err(ProtocolError::UnknownCommand { byte: other }),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Review => "review",
            Command::Stop => "stop",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A classified payload received from the grader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Opaque student identifier, passed through verbatim.
    Identifier(String),
    /// The grader asked the host to terminate.
    StopDirective,
    /// Reserved prefix without a known sentinel. Carries the raw text.
    MalformedCommand(String),
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Identifier(_) => "identifier",
            InboundMessage::StopDirective => "stop_directive",
            InboundMessage::MalformedCommand(_) => "malformed_command",
        }
    }
}

/// Classify one inbound chunk.
///
/// Total over all byte sequences. Invalid UTF-8 is decoded lossily; the
/// grader only ever sends ASCII.
pub fn classify(payload: &[u8]) -> InboundMessage {
    let text = String::from_utf8_lossy(payload);
    if text.starts_with(RESERVED_PREFIX) {
        if text == STOP_SENTINEL {
            InboundMessage::StopDirective
        } else {
            InboundMessage::MalformedCommand(text.into_owned())
        }
    } else {
        InboundMessage::Identifier(text.into_owned())
    }
}
