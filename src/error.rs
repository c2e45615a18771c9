//! Failure taxonomy for the remote-control harness.
//!
//! Operations return `anyhow::Result`; these variants travel inside the
//! `anyhow::Error` so callers that care can `downcast_ref::<HarnessError>()`.
//! Nothing here is retried.

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A required executable or registry entry is missing.
    #[error("cannot resolve {what}: {detail}")]
    Resolution { what: String, detail: String },

    /// The time-derived server name is already registered.
    #[error("vim server name '{name}' is already in use")]
    Collision { name: String },

    /// The `--remote-*` round trip failed, exited non-zero or timed out.
    #[error("remote channel call `{operation}` failed: {detail}")]
    Channel { operation: String, detail: String },

    /// Keystrokes were requested before any editor was launched.
    #[error("no controlled gvim process has been launched")]
    NotRunning,

    /// `launch` was called on a client that already owns a process.
    #[error("gvim is already running under server name '{name}' (pid {pid})")]
    AlreadyRunning { name: String, pid: u32 },

    /// `launch` was called on a client whose editor has already been shut down.
    #[error("gvim server '{name}' was already shut down; a client launches once")]
    AlreadyStopped { name: String },

    /// The platform input facility refused the activation or keystrokes.
    #[error("keystroke injection failed: {0}")]
    Injection(String),
}

impl HarnessError {
    pub fn resolution(what: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Resolution {
            what: what.into(),
            detail: detail.into(),
        }
    }

    pub fn missing_file(what: impl Into<String>, path: &Path) -> Self {
        Self::Resolution {
            what: what.into(),
            detail: format!("{} does not exist", path.display()),
        }
    }

    pub fn channel(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Channel {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}
