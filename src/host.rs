//! Host adapter boundary.
//!
//! The host owns everything the protocol does not: where the socket lives,
//! how messages reach a human, what "save all" means, and how the host
//! shuts itself down. [`TerminalHost`] is the host used by the CLI.

use std::io::BufRead;
use std::path::PathBuf;
use std::process::Command as Process;
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::client::AppEvent;
use crate::config::{ClientConfig, EndpointConfig};
use crate::error::ProtocolError;
use crate::paths;

/// Collaborator interface the client core drives.
pub trait HostAdapter {
    /// Socket path, or `ConfigurationMissing` when it cannot be determined.
    fn resolve_endpoint(&self) -> Result<PathBuf, ProtocolError>;

    fn notify_info(&mut self, text: &str);

    fn notify_error(&mut self, text: &str);

    /// Persist all pending edits before a review is posted.
    fn request_save_all(&mut self) -> Result<()>;

    /// Called at most once, on a stop directive from the grader.
    fn terminate_host(&mut self);

    /// Hand the host a way to fire trigger actions. Hosts that drive the
    /// client directly can ignore it.
    fn on_trigger(&mut self, _trigger: TriggerHandle) {}
}

/// Cloneable handle that feeds trigger and shutdown requests into the
/// client's event channel.
#[derive(Debug, Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<AppEvent>,
}

impl TriggerHandle {
    pub fn new(tx: mpsc::Sender<AppEvent>) -> Self {
        Self { tx }
    }

    /// Returns `false` once the client has stopped listening.
    pub fn fire(&self) -> bool {
        self.tx.send(AppEvent::Trigger).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.tx.send(AppEvent::Shutdown).is_ok()
    }
}

/// Line-oriented trigger source: any line fires, `q`/`quit` or EOF shuts down.
pub fn pump_triggers<R: BufRead>(reader: R, trigger: &TriggerHandle) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("failed to read trigger input: {e}");
                break;
            }
        };
        match line.trim() {
            "q" | "quit" => break,
            _ => {
                if !trigger.fire() {
                    return;
                }
            }
        }
    }
    trigger.shutdown();
}

/// Host for an interactive terminal session.
pub struct TerminalHost {
    endpoint: EndpointConfig,
    workdir_override: Option<PathBuf>,
    save_command: Option<Vec<String>>,
    terminated: bool,
}

impl TerminalHost {
    pub fn new(config: &ClientConfig, workdir_override: Option<PathBuf>) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            workdir_override,
            save_command: config.save.command.clone(),
            terminated: false,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn workdir(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.workdir_override {
            return Some(dir.clone());
        }
        std::env::var_os(&self.endpoint.workdir_env)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    }
}

impl HostAdapter for TerminalHost {
    fn resolve_endpoint(&self) -> Result<PathBuf, ProtocolError> {
        let workdir = self
            .workdir()
            .ok_or_else(|| ProtocolError::ConfigurationMissing {
                variable: self.endpoint.workdir_env.clone(),
            })?;
        Ok(paths::socket_path(&workdir, &self.endpoint.socket_name))
    }

    fn notify_info(&mut self, text: &str) {
        info!("{text}");
        println!("[grader] {text}");
    }

    fn notify_error(&mut self, text: &str) {
        warn!("{text}");
        eprintln!("[grader] error: {text}");
    }

    fn request_save_all(&mut self) -> Result<()> {
        let Some((program, args)) = self.save_command.as_ref().and_then(|argv| argv.split_first())
        else {
            debug!("no save command configured; nothing to save");
            return Ok(());
        };

        let status = Process::new(program)
            .args(args)
            .status()
            .with_context(|| format!("failed to run save command '{program}'"))?;
        if !status.success() {
            bail!("save command '{program}' exited with {status}");
        }
        Ok(())
    }

    fn terminate_host(&mut self) {
        self.terminated = true;
    }

    fn on_trigger(&mut self, trigger: TriggerHandle) {
        let spawned = thread::Builder::new()
            .name("trigger-stdin".to_string())
            .spawn(move || pump_triggers(std::io::stdin().lock(), &trigger));
        if let Err(e) = spawned {
            self.notify_error(&format!("failed to read triggers from stdin: {e}"));
        }
    }
}
