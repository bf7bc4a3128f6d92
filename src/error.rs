//! Error taxonomy for the control channel.
//!
//! Every failure is terminal to the operation that raised it, never to the
//! process. The one exception is [`ProtocolError::ConfigurationMissing`],
//! which prevents activation entirely.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::wire::Command;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The endpoint configuration value is absent; the client never connects.
    #[error("{variable} environment variable is not defined")]
    ConfigurationMissing { variable: String },

    #[error("failed to connect to grader at {}: {source}", endpoint.display())]
    Connect {
        endpoint: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to send {command} command: {source}")]
    Write {
        command: Command,
        #[source]
        source: io::Error,
    },

    /// Payload used the reserved prefix but matched no known sentinel.
    #[error("invalid command received: {text}")]
    MalformedCommand { text: String },

    #[error("grader connection failed: {message}")]
    Transport { message: String },

    #[error("unknown command byte 0x{byte:02x}")]
    UnknownCommand { byte: u8 },

    #[error("identifier {text:?} uses the reserved prefix")]
    InvalidIdentifier { text: String },

    #[error("failed to bind grader socket at {}: {source}", endpoint.display())]
    Bind {
        endpoint: PathBuf,
        #[source]
        source: io::Error,
    },
}
