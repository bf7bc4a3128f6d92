//! Command session state machine.
//!
//! One user-facing trigger drives the whole session: the first invocation
//! starts grading, every later one saves the workspace and submits a review.
//! Teardown sends `Stop` no matter where the session is.

use tracing::{debug, warn};

use crate::connection::CommandSink;
use crate::error::ProtocolError;
use crate::host::HostAdapter;
use crate::wire::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    NotStarted,
    Started,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Trigger,
    Teardown,
}

/// Side effect a transition asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Send(Command),
    /// Ask the host to save everything; send only if that succeeds.
    SaveAllThenSend(Command),
}

impl Effect {
    pub fn command(self) -> Command {
        match self {
            Effect::Send(command) | Effect::SaveAllThenSend(command) => command,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub effect: Effect,
    /// `None` once the session has ended.
    pub next: Option<SessionState>,
}

/// The full transition table.
pub fn transition(state: SessionState, action: Action) -> Transition {
    match (state, action) {
        (SessionState::NotStarted, Action::Trigger) => Transition {
            effect: Effect::Send(Command::Start),
            next: Some(SessionState::Started),
        },
        (SessionState::Started, Action::Trigger) => Transition {
            effect: Effect::SaveAllThenSend(Command::Review),
            next: Some(SessionState::Started),
        },
        (_, Action::Teardown) => Transition {
            effect: Effect::Send(Command::Stop),
            next: None,
        },
    }
}

/// What a single trigger invocation ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Sent(Command),
    /// The write failed; the failure was reported to the host.
    SendFailed { command: Command, reason: String },
    /// Save-all failed; nothing was sent and the state is unchanged.
    SaveFailed,
}

#[derive(Debug, Default)]
pub struct Session {
    state: SessionState,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle one trigger action.
    ///
    /// A failed write still advances the state; only a failed save-all
    /// leaves it untouched so the user can retry.
    pub fn trigger<S, H>(&mut self, sink: &mut S, host: &mut H) -> TriggerOutcome
    where
        S: CommandSink + ?Sized,
        H: HostAdapter + ?Sized,
    {
        let step = transition(self.state, Action::Trigger);
        let command = match step.effect {
            Effect::Send(command) => {
                host.notify_info(&format!("Sending {command} command"));
                command
            }
            Effect::SaveAllThenSend(command) => match host.request_save_all() {
                Ok(()) => {
                    host.notify_info("Posting review");
                    command
                }
                Err(e) => {
                    warn!("save-all failed: {e:#}");
                    host.notify_error(&format!("Unable to save all files: {e:#}"));
                    return TriggerOutcome::SaveFailed;
                }
            },
        };

        let outcome = match sink.send(command) {
            Ok(()) => TriggerOutcome::Sent(command),
            Err(e) => {
                let reason = e.to_string();
                host.notify_error(&reason);
                TriggerOutcome::SendFailed { command, reason }
            }
        };

        if let Some(next) = step.next {
            debug!(from = ?self.state, to = ?next, "session transition");
            self.state = next;
        }
        outcome
    }

    /// Send the final `Stop`. Ends the session whatever its state.
    pub fn teardown<S>(self, sink: &mut S) -> Result<(), ProtocolError>
    where
        S: CommandSink + ?Sized,
    {
        // Teardown always maps to a plain send; there is nobody left to save.
        let command = transition(self.state, Action::Teardown).effect.command();
        sink.send(command)
    }
}
