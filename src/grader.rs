//! Grader side of the control channel.
//!
//! The grader binds `<workdir>/sock`, waits for exactly one client, and then
//! drives a review session: the client announces `Start`, the grader sends
//! the identifier of each project under review, and the client answers every
//! identifier with a `Review` once the reviewer has saved their notes. The
//! stop sentinel closes the session.

use std::io::{self, Read, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::ProtocolError;
use crate::paths;
use crate::wire::{Command, RESERVED_PREFIX, STOP_SENTINEL};

/// Listening socket. Removes the socket file on drop.
pub struct GraderSocket {
    listener: UnixListener,
    path: PathBuf,
}

impl GraderSocket {
    pub fn bind(workdir: &Path) -> Result<Self, ProtocolError> {
        Self::bind_path(&paths::socket_path(workdir, paths::DEFAULT_SOCKET_NAME))
    }

    /// Bind at `path`. A leftover socket nobody is listening on is replaced;
    /// anything else already at `path` is left alone and reported.
    pub fn bind_path(path: &Path) -> Result<Self, ProtocolError> {
        let bind_error = |source: io::Error| ProtocolError::Bind {
            endpoint: path.to_path_buf(),
            source,
        };
        if let Ok(metadata) = std::fs::symlink_metadata(path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_error(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "path exists and is not a socket",
                )));
            }
            match UnixStream::connect(path) {
                Ok(_) => {
                    return Err(bind_error(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        "another grader is listening",
                    )));
                }
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    debug!(path = %path.display(), "removing stale socket");
                    std::fs::remove_file(path).map_err(bind_error)?;
                }
                Err(e) => return Err(bind_error(e)),
            }
        }
        let listener = UnixListener::bind(path).map_err(bind_error)?;
        info!(path = %path.display(), "grader socket listening");
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the client connects.
    pub fn accept(&self) -> Result<GraderPeer, ProtocolError> {
        let (stream, _) = self
            .listener
            .accept()
            .map_err(|e| ProtocolError::Transport {
                message: format!("accept failed: {e}"),
            })?;
        debug!("client connected");
        Ok(GraderPeer { stream })
    }
}

impl Drop for GraderSocket {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("failed to remove socket file {}: {e}", self.path.display());
        }
    }
}

/// The accepted client connection.
pub struct GraderPeer {
    stream: UnixStream,
}

impl GraderPeer {
    /// Read one command octet. `Ok(None)` means the client hung up.
    pub fn recv_command(&mut self) -> Result<Option<Command>, ProtocolError> {
        let mut byte = [0u8; 1];
        match self.stream.read_exact(&mut byte) {
            Ok(()) => Command::decode(byte[0]).map(Some),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(ProtocolError::Transport {
                message: e.to_string(),
            }),
        }
    }

    pub fn expect_command(&mut self, expected: Command) -> Result<(), ProtocolError> {
        match self.recv_command()? {
            Some(command) if command == expected => Ok(()),
            Some(other) => Err(ProtocolError::Transport {
                message: format!("expected {expected} command, got {other}"),
            }),
            None => Err(ProtocolError::Transport {
                message: format!("client disconnected while waiting for {expected} command"),
            }),
        }
    }

    /// Send a student identifier in a single write.
    pub fn send_identifier(&mut self, id: &str) -> Result<(), ProtocolError> {
        if id.starts_with(RESERVED_PREFIX) {
            return Err(ProtocolError::InvalidIdentifier {
                text: id.to_string(),
            });
        }
        self.send_raw(id)
    }

    pub fn send_stop(&mut self) -> Result<(), ProtocolError> {
        self.send_raw(STOP_SENTINEL)
    }

    fn send_raw(&mut self, text: &str) -> Result<(), ProtocolError> {
        self.stream
            .write_all(text.as_bytes())
            .and_then(|()| self.stream.flush())
            .map_err(|e| ProtocolError::Transport {
                message: e.to_string(),
            })
    }
}

/// Run a full review session over `peer`.
///
/// Waits for `Start`, then for each identifier sends it and waits for the
/// matching `Review`. `on_review` runs after each review arrives. The stop
/// sentinel is sent at the end even when the loop failed part-way.
pub fn run_review_loop<F>(
    peer: &mut GraderPeer,
    ids: &[String],
    mut on_review: F,
) -> Result<usize, ProtocolError>
where
    F: FnMut(&str),
{
    let result = collect_reviews(peer, ids, &mut on_review);
    if let Err(e) = peer.send_stop() {
        warn!("failed to send stop sentinel: {e}");
    }
    result
}

fn collect_reviews<F>(
    peer: &mut GraderPeer,
    ids: &[String],
    on_review: &mut F,
) -> Result<usize, ProtocolError>
where
    F: FnMut(&str),
{
    peer.expect_command(Command::Start)?;
    info!("client started grading");

    let mut reviewed = 0;
    for id in ids {
        peer.send_identifier(id)?;
        peer.expect_command(Command::Review)?;
        debug!(id = %id, "review received");
        on_review(id);
        reviewed += 1;
    }
    Ok(reviewed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (tempfile::TempDir, GraderSocket, UnixStream, GraderPeer) {
        let tmp = tempfile::tempdir().unwrap();
        let socket = GraderSocket::bind(tmp.path()).unwrap();
        let client = UnixStream::connect(socket.path()).unwrap();
        let peer = socket.accept().unwrap();
        (tmp, socket, client, peer)
    }

    #[test]
    fn binds_sock_inside_workdir_and_cleans_up() {
        let tmp = tempfile::tempdir().unwrap();
        let path = {
            let socket = GraderSocket::bind(tmp.path()).unwrap();
            assert_eq!(socket.path(), tmp.path().join("sock"));
            assert!(socket.path().exists());
            socket.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn rebinding_replaces_stale_socket() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sock");
        let stale = UnixListener::bind(&path).unwrap();
        drop(stale);
        assert!(path.exists());

        let socket = GraderSocket::bind(tmp.path()).unwrap();
        assert_eq!(socket.path(), path);
    }

    #[test]
    fn bind_leaves_regular_file_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sock");
        std::fs::write(&path, "notes").unwrap();

        let err = GraderSocket::bind(tmp.path()).err().unwrap();
        assert!(matches!(err, ProtocolError::Bind { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "notes");
    }

    #[test]
    fn bind_refuses_live_socket() {
        let tmp = tempfile::tempdir().unwrap();
        let live = GraderSocket::bind(tmp.path()).unwrap();

        let err = GraderSocket::bind(tmp.path()).err().unwrap();
        match err {
            ProtocolError::Bind { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::AddrInUse);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The first listener still owns the path.
        UnixStream::connect(live.path()).unwrap();
        live.accept().unwrap();
    }

    #[test]
    fn decodes_commands_and_eof() {
        let (_tmp, _socket, mut client, mut peer) = pair();
        client.write_all(&[1, 2, 3]).unwrap();
        drop(client);

        assert_eq!(peer.recv_command().unwrap(), Some(Command::Start));
        assert_eq!(peer.recv_command().unwrap(), Some(Command::Review));
        assert_eq!(peer.recv_command().unwrap(), Some(Command::Stop));
        assert_eq!(peer.recv_command().unwrap(), None);
    }

    #[test]
    fn unknown_byte_is_rejected() {
        let (_tmp, _socket, mut client, mut peer) = pair();
        client.write_all(&[9]).unwrap();

        assert!(matches!(
            peer.recv_command(),
            Err(ProtocolError::UnknownCommand { byte: 9 })
        ));
    }

    #[test]
    fn expect_command_rejects_mismatch() {
        let (_tmp, _socket, mut client, mut peer) = pair();
        client.write_all(&[2]).unwrap();

        let err = peer.expect_command(Command::Start).unwrap_err();
        assert!(err.to_string().contains("expected start command, got review"));
    }

    #[test]
    fn reserved_identifier_is_refused() {
        let (_tmp, _socket, _client, mut peer) = pair();
        assert!(matches!(
            peer.send_identifier("__stop"),
            Err(ProtocolError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn identifier_and_stop_go_out_verbatim() {
        let (_tmp, _socket, mut client, mut peer) = pair();
        peer.send_identifier("jdoe2").unwrap();
        peer.send_stop().unwrap();
        drop(peer);

        let mut received = String::new();
        client.read_to_string(&mut received).unwrap();
        assert_eq!(received, "jdoe2__stop");
    }

    #[test]
    fn review_loop_without_start_still_sends_stop() {
        let (_tmp, _socket, mut client, mut peer) = pair();
        client.write_all(&[2]).unwrap();

        let result = run_review_loop(&mut peer, &["jdoe2".to_string()], |_| {});
        assert!(result.is_err());
        drop(peer);

        let mut received = String::new();
        client.read_to_string(&mut received).unwrap();
        assert_eq!(received, "__stop");
    }
}
