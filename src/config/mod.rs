use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".gvimctl";

/// Where the editor binaries live and how gVim is started.
///
/// ```toml
/// [editor]
/// gvim = 'C:\Program Files\Vim\vim91\gvim.exe'
/// startup_flags = ["--noplugin"]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EditorConfig {
    /// Explicit GUI binary; skips the registry / PATH lookup.
    #[serde(default)]
    pub gvim: Option<PathBuf>,
    /// Explicit console binary; skips the sibling-file convention.
    #[serde(default)]
    pub vim: Option<PathBuf>,
    #[serde(default = "default_startup_flags")]
    pub startup_flags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsoleConfig {
    /// Script sourced into the launched editor, relative to the working directory.
    #[serde(default = "default_console_script")]
    pub script: PathBuf,
    /// Function called after sourcing to open the console buffer.
    #[serde(default = "default_console_entry")]
    pub entry: String,
    #[serde(default = "default_bootstrap_settle_millis")]
    pub bootstrap_settle_millis: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimingConfig {
    #[serde(default = "default_launch_settle_millis")]
    pub launch_settle_millis: u64,
    #[serde(default = "default_focus_settle_millis")]
    pub focus_settle_millis: u64,
    #[serde(default = "default_keystroke_settle_millis")]
    pub keystroke_settle_millis: u64,
    #[serde(default = "default_snapshot_settle_millis")]
    pub snapshot_settle_millis: u64,
    #[serde(default = "default_channel_timeout_secs")]
    pub channel_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_millis")]
    pub interval_millis: u64,
    #[serde(default = "default_poll_max_attempts")]
    pub max_attempts: u32,
    /// Report a scenario as failed when its line count never settles.
    #[serde(default = "default_fail_on_timeout")]
    pub fail_on_timeout: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BulkConfig {
    #[serde(default = "default_bulk_line_count")]
    pub line_count: usize,
}

fn default_startup_flags() -> Vec<String> {
    vec!["--noplugin".to_string()]
}

fn default_console_script() -> PathBuf {
    PathBuf::from("../pyconsole_vim.vim")
}

fn default_console_entry() -> String {
    "PyConsole()".to_string()
}

fn default_bootstrap_settle_millis() -> u64 {
    2000
}

fn default_launch_settle_millis() -> u64 {
    500
}

fn default_focus_settle_millis() -> u64 {
    100
}

fn default_keystroke_settle_millis() -> u64 {
    500
}

fn default_snapshot_settle_millis() -> u64 {
    200
}

fn default_channel_timeout_secs() -> u64 {
    10
}

fn default_poll_interval_millis() -> u64 {
    250
}

fn default_poll_max_attempts() -> u32 {
    200
}

fn default_fail_on_timeout() -> bool {
    true
}

fn default_bulk_line_count() -> usize {
    4000
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            gvim: None,
            vim: None,
            startup_flags: default_startup_flags(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            script: default_console_script(),
            entry: default_console_entry(),
            bootstrap_settle_millis: default_bootstrap_settle_millis(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            launch_settle_millis: default_launch_settle_millis(),
            focus_settle_millis: default_focus_settle_millis(),
            keystroke_settle_millis: default_keystroke_settle_millis(),
            snapshot_settle_millis: default_snapshot_settle_millis(),
            channel_timeout_secs: default_channel_timeout_secs(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_millis: default_poll_interval_millis(),
            max_attempts: default_poll_max_attempts(),
            fail_on_timeout: default_fail_on_timeout(),
        }
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            line_count: default_bulk_line_count(),
        }
    }
}

impl TimingConfig {
    pub fn launch_settle(&self) -> Duration {
        Duration::from_millis(self.launch_settle_millis)
    }

    pub fn focus_settle(&self) -> Duration {
        Duration::from_millis(self.focus_settle_millis)
    }

    pub fn keystroke_settle(&self) -> Duration {
        Duration::from_millis(self.keystroke_settle_millis)
    }

    pub fn snapshot_settle(&self) -> Duration {
        Duration::from_millis(self.snapshot_settle_millis)
    }

    pub fn channel_timeout(&self) -> Duration {
        Duration::from_secs(self.channel_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HarnessConfig {
    #[serde(default)]
    pub editor: EditorConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
}

impl HarnessConfig {
    /// Search upward from `start` for a `.gvimctl/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: HarnessConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((HarnessConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}
