//! Structured run log: JSON lines per harness run.
//!
//! When enabled with `--log`, every channel call, keystroke injection, poll
//! sample and scenario result is appended as one self-contained JSON object
//! with a timestamp, so a flaky run can be replayed from the file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

fn now_rfc3339() -> String {
    chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, false)
}

/// A structured event in the run log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// RFC 3339 local time with milliseconds.
    pub timestamp: String,
    #[serde(flatten)]
    pub event: LogEvent,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    /// gVim was spawned under a fresh server name.
    EditorLaunched {
        server_name: String,
        pid: u32,
        gvim: String,
    },
    /// A `--remote-send` round trip.
    CommandSent { keys: String },
    /// A `--remote-expr` round trip.
    ExpressionEvaluated { expr: String, reply: String },
    /// Keystrokes typed into the focused editor window.
    KeysInjected { keys: String },
    /// One convergence sample.
    PollSample { attempt: u32, line_count: usize },
    /// A snapshot was read back from the scratch file.
    SnapshotCaptured { lines: usize },
    ScenarioPassed { scenario: String },
    ScenarioFailed { scenario: String, reason: String },
    /// gVim was asked to quit (and killed if it lingered).
    EditorStopped { server_name: String, forced: bool },
}

/// Writer for JSON lines run logs.
pub struct RunLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl RunLog {
    /// Open `path` for appending, creating parent directories as needed.
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
            timestamp: now_rfc3339(),
            event,
        };

        let json = serde_json::to_string(&entry).context("failed to serialize log entry")?;

        debug!(event = %json, "run log");

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("run log writer poisoned"))?;
        writeln!(writer, "{json}").context("failed to write log entry")?;
        writer.flush().context("failed to flush log")?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
