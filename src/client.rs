//! Client runtime: activation, the event loop, and teardown.
//!
//! [`Client`] is the explicitly owned context that both the trigger path and
//! the teardown path go through. Triggers, shutdown requests, and connection
//! events share one channel and are handled strictly one at a time, in the
//! order they arrived.

use std::path::Path;
use std::sync::mpsc;

use tracing::{debug, info, warn};

use crate::connection::{CommandSink, ConnectionEvent};
use crate::error::ProtocolError;
use crate::host::HostAdapter;
use crate::log::{LogEvent, ProtocolLog};
use crate::session::{Session, SessionState, TriggerOutcome};
use crate::wire::{self, Command, InboundMessage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// The user invoked the trigger action.
    Trigger,
    /// The host wants the client to wind down.
    Shutdown,
    Connection(ConnectionEvent),
}

impl From<ConnectionEvent> for AppEvent {
    fn from(event: ConnectionEvent) -> Self {
        AppEvent::Connection(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

pub struct Client<S: CommandSink> {
    sink: S,
    session: Session,
    terminated: bool,
    log: Option<ProtocolLog>,
}

impl<S: CommandSink> Client<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            session: Session::new(),
            terminated: false,
            log: None,
        }
    }

    pub fn with_log(mut self, log: ProtocolLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Resolve the endpoint through the host and connect.
    ///
    /// `connect` is never called when the endpoint is not configured. Both
    /// failures are reported to the host before being returned.
    pub fn activate<H, F>(host: &mut H, connect: F) -> Result<Self, ProtocolError>
    where
        H: HostAdapter + ?Sized,
        F: FnOnce(&Path) -> Result<S, ProtocolError>,
    {
        let endpoint = host.resolve_endpoint().inspect_err(|e| {
            host.notify_error(&e.to_string());
        })?;
        debug!(endpoint = %endpoint.display(), "resolved grader endpoint");

        let sink = connect(&endpoint).inspect_err(|e| {
            host.notify_error(&e.to_string());
        })?;
        Ok(Self::new(sink))
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn handle_event<H>(&mut self, event: AppEvent, host: &mut H) -> Flow
    where
        H: HostAdapter + ?Sized,
    {
        match event {
            AppEvent::Trigger => {
                self.trigger(host);
                Flow::Continue
            }
            AppEvent::Shutdown => Flow::Exit,
            AppEvent::Connection(ConnectionEvent::Connected { endpoint }) => {
                self.record(LogEvent::Connected {
                    endpoint: endpoint.display().to_string(),
                });
                host.notify_info("Connected to grader");
                Flow::Continue
            }
            AppEvent::Connection(ConnectionEvent::Payload(bytes)) => {
                self.handle_payload(&bytes, host)
            }
            AppEvent::Connection(ConnectionEvent::Disconnected) => {
                self.record(LogEvent::Disconnected);
                host.notify_error("Grader closed the connection");
                Flow::Continue
            }
            AppEvent::Connection(ConnectionEvent::TransportError { message }) => {
                host.notify_error(&ProtocolError::Transport {
                    message: message.clone(),
                }
                .to_string());
                self.record(LogEvent::TransportError { message });
                Flow::Continue
            }
        }
    }

    /// Classify one inbound chunk and act on it.
    pub fn handle_payload<H>(&mut self, payload: &[u8], host: &mut H) -> Flow
    where
        H: HostAdapter + ?Sized,
    {
        let message = wire::classify(payload);
        debug!(kind = message.kind(), len = payload.len(), "inbound message");
        self.record(LogEvent::MessageReceived {
            message: message.clone(),
        });

        match message {
            InboundMessage::Identifier(id) => {
                host.notify_info(&format!("Student id: {id}"));
                Flow::Continue
            }
            InboundMessage::MalformedCommand(text) => {
                host.notify_error(&ProtocolError::MalformedCommand { text }.to_string());
                Flow::Continue
            }
            InboundMessage::StopDirective => {
                if !self.terminated {
                    self.terminated = true;
                    host.notify_info("Stop command received");
                    host.terminate_host();
                }
                Flow::Exit
            }
        }
    }

    pub fn trigger<H>(&mut self, host: &mut H) -> TriggerOutcome
    where
        H: HostAdapter + ?Sized,
    {
        let outcome = self.session.trigger(&mut self.sink, host);
        match &outcome {
            TriggerOutcome::Sent(command) => self.record(LogEvent::CommandSent {
                command: *command,
            }),
            TriggerOutcome::SendFailed { command, reason } => {
                self.record(LogEvent::CommandFailed {
                    command: *command,
                    reason: reason.clone(),
                })
            }
            TriggerOutcome::SaveFailed => self.record(LogEvent::SaveFailed),
        }
        outcome
    }

    /// Consume events until a stop directive, a shutdown request, or the
    /// channel closing.
    pub fn run<H>(&mut self, host: &mut H, events: &mpsc::Receiver<AppEvent>)
    where
        H: HostAdapter + ?Sized,
    {
        for event in events.iter() {
            if self.handle_event(event, host) == Flow::Exit {
                return;
            }
        }
        debug!("event channel closed");
    }

    /// Send the final `Stop` (best-effort) and hand back the sink.
    pub fn teardown(mut self) -> S {
        let session = std::mem::take(&mut self.session);
        let stop_sent = match session.teardown(&mut self.sink) {
            Ok(()) => {
                info!("stop command sent");
                self.record(LogEvent::CommandSent {
                    command: Command::Stop,
                });
                true
            }
            Err(e) => {
                warn!("failed to send stop command: {e}");
                self.record(LogEvent::CommandFailed {
                    command: Command::Stop,
                    reason: e.to_string(),
                });
                false
            }
        };
        self.record(LogEvent::SessionEnded { stop_sent });
        self.sink
    }

    fn record(&self, event: LogEvent) {
        if let Some(log) = &self.log {
            log.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{FakeHost, RecordingSink};
    use std::path::PathBuf;

    fn started_client() -> (Client<RecordingSink>, FakeHost) {
        let mut host = FakeHost::default();
        let mut client = Client::new(RecordingSink::default());
        client.handle_event(AppEvent::Trigger, &mut host);
        (client, host)
    }

    #[test]
    fn activate_without_endpoint_never_connects() {
        let mut host = FakeHost::default();
        let mut attempts = 0;

        let result = Client::activate(&mut host, |_| {
            attempts += 1;
            Ok(RecordingSink::default())
        });

        assert!(matches!(
            result,
            Err(ProtocolError::ConfigurationMissing { .. })
        ));
        assert_eq!(attempts, 0);
        assert_eq!(host.errors.len(), 1);
        assert!(host.errors[0].contains("GRADER_WORKDIR"));
    }

    #[test]
    fn activate_reports_connect_failure() {
        let mut host = FakeHost {
            endpoint: Some(PathBuf::from("/nonexistent/sock")),
            ..Default::default()
        };

        let result: Result<Client<RecordingSink>, _> = Client::activate(&mut host, |endpoint| {
            Err(ProtocolError::Connect {
                endpoint: endpoint.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        });

        assert!(matches!(result, Err(ProtocolError::Connect { .. })));
        assert!(host.errors[0].contains("/nonexistent/sock"));
    }

    #[test]
    fn activate_passes_resolved_endpoint() {
        let mut host = FakeHost {
            endpoint: Some(PathBuf::from("/tmp/grader/sock")),
            ..Default::default()
        };
        let mut seen = None;

        let client = Client::activate(&mut host, |endpoint| {
            seen = Some(endpoint.to_path_buf());
            Ok(RecordingSink::default())
        })
        .unwrap();

        assert_eq!(seen, Some(PathBuf::from("/tmp/grader/sock")));
        assert_eq!(client.state(), SessionState::NotStarted);
        assert!(host.errors.is_empty());
    }

    #[test]
    fn identifier_is_shown_as_info() {
        let mut host = FakeHost::default();
        let mut client = Client::new(RecordingSink::default());

        let flow = client.handle_payload(b"S12345", &mut host);

        assert_eq!(flow, Flow::Continue);
        assert!(host.infos.iter().any(|m| m.contains("S12345")));
        assert!(host.errors.is_empty());
    }

    #[test]
    fn malformed_command_is_an_error_without_termination() {
        let mut host = FakeHost::default();
        let mut client = Client::new(RecordingSink::default());

        let flow = client.handle_payload(b"__foo", &mut host);

        assert_eq!(flow, Flow::Continue);
        assert_eq!(host.errors.len(), 1);
        assert!(host.errors[0].contains("__foo"));
        assert_eq!(host.terminations, 0);
    }

    #[test]
    fn stop_directive_terminates_once() {
        let mut host = FakeHost::default();
        let mut client = Client::new(RecordingSink::default());

        assert_eq!(client.handle_payload(b"__stop", &mut host), Flow::Exit);
        assert_eq!(client.handle_payload(b"__stop", &mut host), Flow::Exit);

        assert_eq!(host.terminations, 1);
        assert!(client.is_terminated());
    }

    #[test]
    fn triggers_drive_the_session() {
        let (mut client, mut host) = started_client();
        assert_eq!(client.state(), SessionState::Started);

        client.handle_event(AppEvent::Trigger, &mut host);
        client.handle_event(AppEvent::Trigger, &mut host);

        assert_eq!(
            client.sink().sent,
            vec![Command::Start, Command::Review, Command::Review]
        );
    }

    #[test]
    fn shutdown_exits_the_loop() {
        let (mut client, mut host) = started_client();
        let (tx, rx) = mpsc::channel();
        tx.send(AppEvent::Trigger).unwrap();
        tx.send(AppEvent::Shutdown).unwrap();
        tx.send(AppEvent::Trigger).unwrap();

        client.run(&mut host, &rx);

        assert_eq!(client.sink().sent, vec![Command::Start, Command::Review]);
    }

    #[test]
    fn connection_loss_is_reported_but_not_fatal() {
        let (mut client, mut host) = started_client();

        let flow = client.handle_event(
            AppEvent::Connection(ConnectionEvent::TransportError {
                message: "connection reset".to_string(),
            }),
            &mut host,
        );
        assert_eq!(flow, Flow::Continue);
        let flow = client.handle_event(
            AppEvent::Connection(ConnectionEvent::Disconnected),
            &mut host,
        );
        assert_eq!(flow, Flow::Continue);

        assert_eq!(host.errors.len(), 2);
        assert!(host.errors[0].contains("connection reset"));
    }

    #[test]
    fn teardown_sends_stop_regardless_of_state() {
        let client = Client::new(RecordingSink::default());
        assert_eq!(client.teardown().sent, vec![Command::Stop]);

        let (client, _host) = started_client();
        assert_eq!(client.teardown().sent, vec![Command::Start, Command::Stop]);
    }

    #[test]
    fn teardown_swallows_write_failure() {
        let client = Client::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let sink = client.teardown();
        assert!(sink.sent.is_empty());
    }

    #[test]
    fn events_are_written_to_protocol_log() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("session.jsonl");
        let mut host = FakeHost::default();
        let mut client =
            Client::new(RecordingSink::default()).with_log(ProtocolLog::new(&path).unwrap());

        client.handle_event(AppEvent::Trigger, &mut host);
        client.handle_payload(b"jdoe2", &mut host);
        client.teardown();

        let contents = std::fs::read_to_string(&path).unwrap();
        let events: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let names: Vec<&str> = events
            .iter()
            .map(|e| e["event"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "command_sent",
                "message_received",
                "command_sent",
                "session_ended",
            ]
        );
        assert_eq!(events[0]["data"]["command"], "start");
        assert_eq!(events[2]["data"]["command"], "stop");
    }

    #[test]
    fn failed_writes_are_logged_with_the_io_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("session.jsonl");
        let mut host = FakeHost::default();
        let mut client = Client::new(RecordingSink {
            fail: true,
            ..Default::default()
        })
        .with_log(ProtocolLog::new(&path).unwrap());

        client.handle_event(AppEvent::Trigger, &mut host);
        client.teardown();

        let contents = std::fs::read_to_string(&path).unwrap();
        let events: Vec<serde_json::Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["event"], "command_failed");
        assert_eq!(events[0]["data"]["command"], "start");
        assert!(
            events[0]["data"]["reason"]
                .as_str()
                .unwrap()
                .contains("broken pipe")
        );
        assert_eq!(events[1]["event"], "command_failed");
        assert_eq!(events[1]["data"]["command"], "stop");
        assert_eq!(events[2]["event"], "session_ended");
        assert_eq!(events[2]["data"]["stop_sent"], false);
    }
}
