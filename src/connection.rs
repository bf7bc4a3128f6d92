//! Client side of the grader socket.
//!
//! A [`Connection`] owns the one stream socket to the grader. Writes happen
//! on the caller's thread; a single reader thread forwards every received
//! chunk, in order, to the channel handed to [`Connection::open`]. Chunks are
//! not reassembled: the grader writes each logical message in one call.

use std::io::{Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use tracing::{debug, info, warn};

use crate::error::ProtocolError;
use crate::wire::Command;

const READ_BUFFER_SIZE: usize = 4096;

/// Lifecycle and data events produced by a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected { endpoint: PathBuf },
    /// One transport read, delivered verbatim.
    Payload(Vec<u8>),
    /// The grader closed its end.
    Disconnected,
    TransportError { message: String },
}

/// Anything the session can push commands through.
pub trait CommandSink {
    fn send(&mut self, command: Command) -> Result<(), ProtocolError>;
}

pub struct Connection {
    stream: UnixStream,
    endpoint: PathBuf,
}

impl Connection {
    /// Connect to `endpoint` and start delivering events to `events`.
    ///
    /// `Connected` is always the first event on the channel. The reader
    /// thread exits after `Disconnected`/`TransportError` or once the
    /// receiving side is dropped; it is never restarted.
    pub fn open<E>(endpoint: &Path, events: mpsc::Sender<E>) -> Result<Self, ProtocolError>
    where
        E: From<ConnectionEvent> + Send + 'static,
    {
        let stream = UnixStream::connect(endpoint).map_err(|source| ProtocolError::Connect {
            endpoint: endpoint.to_path_buf(),
            source,
        })?;
        let reader = stream.try_clone().map_err(|source| ProtocolError::Connect {
            endpoint: endpoint.to_path_buf(),
            source,
        })?;

        info!(endpoint = %endpoint.display(), "connected to grader");
        let _ = events.send(E::from(ConnectionEvent::Connected {
            endpoint: endpoint.to_path_buf(),
        }));

        thread::Builder::new()
            .name("grader-reader".to_string())
            .spawn(move || read_loop(reader, events))
            .map_err(|source| ProtocolError::Connect {
                endpoint: endpoint.to_path_buf(),
                source,
            })?;

        Ok(Self {
            stream,
            endpoint: endpoint.to_path_buf(),
        })
    }

    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Shut down both directions. The reader thread observes EOF and exits.
    pub fn close(self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!("socket shutdown failed (already closed?): {e}");
        }
    }
}

impl CommandSink for Connection {
    fn send(&mut self, command: Command) -> Result<(), ProtocolError> {
        self.stream
            .write_all(&command.encode())
            .and_then(|()| self.stream.flush())
            .map_err(|source| ProtocolError::Write { command, source })?;
        debug!(command = %command, byte = command.byte(), "command sent");
        Ok(())
    }
}

fn read_loop<E>(mut reader: UnixStream, events: mpsc::Sender<E>)
where
    E: From<ConnectionEvent>,
{
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let event = match reader.read(&mut buf) {
            Ok(0) => {
                debug!("grader closed the connection");
                let _ = events.send(E::from(ConnectionEvent::Disconnected));
                return;
            }
            Ok(n) => ConnectionEvent::Payload(buf[..n].to_vec()),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("grader socket read failed: {e}");
                let _ = events.send(E::from(ConnectionEvent::TransportError {
                    message: e.to_string(),
                }));
                return;
            }
        };

        if events.send(E::from(event)).is_err() {
            debug!("event receiver dropped; stopping reader");
            return;
        }
    }
}
