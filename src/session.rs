//! The run-wide session context.
//!
//! One `Session` is created per harness run: it resolves the editor, launches
//! gVim under a fresh server name and opens the console. Every scenario
//! borrows it; nothing relaunches the editor between scenarios, so a scenario
//! that leaves the buffer dirty affects the next one. `finish` tears it down
//! once at the end (dropping the session kills gVim as a fallback).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::channel;
use crate::client::RemoteClient;
use crate::config::{ConsoleConfig, HarnessConfig};
use crate::identity::SessionIdentity;
use crate::locate;
use crate::log::RunLog;

pub struct Session {
    client: RemoteClient,
    identity: SessionIdentity,
}

impl Session {
    /// Resolve, launch and bootstrap the console in one go.
    pub fn start(config: &HarnessConfig, cwd: &Path, run_log: Option<RunLog>) -> Result<Self> {
        let paths = locate::resolve_editor_paths(&config.editor)?;
        let mut client = RemoteClient::new(paths, &config.timing);
        if let Some(run_log) = run_log {
            client = client.with_run_log(run_log);
        }
        Self::launch(client, config, cwd)
    }

    /// Launch gVim through an already-built client and open the console.
    pub fn launch(mut client: RemoteClient, config: &HarnessConfig, cwd: &Path) -> Result<Self> {
        let identity = client.launch(&config.editor.startup_flags)?;

        let script = console_script_path(&config.console, cwd);
        for command in bootstrap_commands(&config.console, &script) {
            client.send(&command)?;
        }
        std::thread::sleep(std::time::Duration::from_millis(
            config.console.bootstrap_settle_millis,
        ));

        info!(server = %identity, script = %script.display(), "console session ready");
        Ok(Self { client, identity })
    }

    pub fn client(&self) -> &RemoteClient {
        &self.client
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Quit the editor. Consumes the session so it cannot be reused.
    pub fn finish(mut self) -> Result<()> {
        self.client
            .shutdown()
            .with_context(|| format!("failed to stop gvim server '{}'", self.identity))
    }
}

/// The console script, resolved against the harness working directory.
pub fn console_script_path(console: &ConsoleConfig, cwd: &Path) -> PathBuf {
    if console.script.is_absolute() {
        console.script.clone()
    } else {
        cwd.join(&console.script)
    }
}

/// Remote-send strings that load the console script and open the console.
pub fn bootstrap_commands(console: &ConsoleConfig, script: &Path) -> Vec<String> {
    vec![
        format!(
            ":source {}\n",
            channel::escape_literal(&channel::fnameescape(script))
        ),
        format!(":call {}\n", channel::escape_literal(&console.entry)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::Fixture;
    use crate::config::ConsoleConfig;

    fn instant_config() -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.console.bootstrap_settle_millis = 0;
        config
    }

    #[test]
    fn relative_script_resolves_against_cwd() {
        let console = ConsoleConfig::default();
        assert_eq!(
            console_script_path(&console, Path::new("/work/test")),
            Path::new("/work/test").join("../pyconsole_vim.vim")
        );
    }

    #[test]
    fn absolute_script_is_kept() {
        let console = ConsoleConfig {
            script: PathBuf::from("/srv/pyconsole_vim.vim"),
            ..ConsoleConfig::default()
        };
        assert_eq!(
            console_script_path(&console, Path::new("/work")),
            PathBuf::from("/srv/pyconsole_vim.vim")
        );
    }

    #[test]
    fn bootstrap_sources_then_calls_entry() {
        let commands = bootstrap_commands(
            &ConsoleConfig::default(),
            Path::new("/work/pyconsole_vim.vim"),
        );
        assert_eq!(
            commands,
            vec![
                ":source /work/pyconsole_vim.vim\n".to_string(),
                ":call PyConsole()\n".to_string(),
            ]
        );
    }

    #[test]
    fn launch_bootstraps_console_once() {
        let fixture = Fixture::new();
        fixture.runner.reply_ok("GVIM\n");
        let session = Session::launch(fixture.client(), &instant_config(), Path::new("/work"))
            .unwrap();

        let calls = fixture.runner.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0], vec!["--serverlist".to_string()]);
        assert_eq!(calls[1][1], session.identity().as_str());
        assert!(calls[1][3].starts_with(":source "));
        assert_eq!(calls[2][3], ":call PyConsole()\n");
        assert_eq!(session.client().pid(), Some(4242));

        let spawned = fixture.spawner.spawned.borrow();
        assert_eq!(spawned[0].1.last().map(String::as_str), Some("--noplugin"));
    }

    #[test]
    fn finish_shuts_down_editor() {
        let fixture = Fixture::new();
        fixture.runner.reply_ok("");
        let session = Session::launch(fixture.client(), &instant_config(), Path::new("/work"))
            .unwrap();

        session.finish().unwrap();

        let calls = fixture.runner.calls();
        assert!(calls.last().unwrap()[3].contains(":qa!"));
    }
}
