//! Protocol log: JSON lines per client run.
//!
//! When configured, the client appends one line per protocol event:
//! connection changes, every command written, and every classified inbound
//! message. Each line is a self-contained JSON object with an RFC 3339
//! timestamp, so a grading session can be replayed with `jq` after the fact.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, warn};

use crate::wire::{Command, InboundMessage};

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    #[serde(flatten)]
    pub event: LogEvent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    Connected { endpoint: String },
    CommandSent { command: Command },
    CommandFailed { command: Command, reason: String },
    /// Review trigger dropped because save-all failed.
    SaveFailed,
    MessageReceived { message: InboundMessage },
    Disconnected,
    TransportError { message: String },
    SessionEnded { stop_sent: bool },
}

pub struct ProtocolLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl ProtocolLog {
    /// Open (or create) the log at `path`, creating parent directories.
    /// Appends to an existing file.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    pub fn log(&self, event: LogEvent) -> Result<()> {
        let entry = LogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event,
        };

        let json = serde_json::to_string(&entry).context("failed to serialize log entry")?;

        debug!(event = %json, "protocol log");

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow!("protocol log writer poisoned"))?;
        writeln!(writer, "{json}").context("failed to write log entry")?;
        writer.flush().context("failed to flush log")?;

        Ok(())
    }

    /// Like [`ProtocolLog::log`], but a failure is only traced.
    pub fn record(&self, event: LogEvent) {
        if let Err(e) = self.log(event) {
            warn!(path = %self.path.display(), "protocol log write failed: {e:#}");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
