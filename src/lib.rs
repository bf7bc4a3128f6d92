//! Control channel between an editor-side trigger and the grading process.
//!
//! The client sends single-octet commands (start, review, stop) over a Unix
//! socket in the grader's work directory; the grader answers with student
//! identifiers or a stop directive.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod grader;
pub mod host;
pub mod log;
pub mod paths;
pub mod session;
pub mod wire;

pub use client::{AppEvent, Client, Flow};
pub use connection::{CommandSink, Connection, ConnectionEvent};
pub use error::ProtocolError;
pub use host::{HostAdapter, TerminalHost, TriggerHandle};
pub use session::{Session, SessionState, TriggerOutcome};
pub use wire::{Command, InboundMessage, classify};
