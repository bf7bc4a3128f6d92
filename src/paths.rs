use std::path::{Path, PathBuf};

/// Socket filename the grader binds inside its work directory.
pub const DEFAULT_SOCKET_NAME: &str = "sock";

/// Resolve the control socket for a grader work directory.
///
/// An empty `socket_name` falls back to [`DEFAULT_SOCKET_NAME`] so a blank
/// config value never turns the directory itself into the endpoint.
pub fn socket_path(workdir: &Path, socket_name: &str) -> PathBuf {
    if socket_name.trim().is_empty() {
        workdir.join(DEFAULT_SOCKET_NAME)
    } else {
        workdir.join(socket_name)
    }
}
