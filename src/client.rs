//! Remote control client for one gVim process.
//!
//! Owns the server name and the process handle of the editor it launched and
//! exposes the three primitives everything else is built from:
//! fire-and-forget `send`, synchronous `eval`, and `inject_keys` into the
//! focused editor window. Nothing here knows when the editor has finished
//! acting on a command or keystroke; callers that care poll (see `poll`).

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::channel::{CommandRunner, ProcessRunner, RemoteChannel};
use crate::config::TimingConfig;
use crate::error::HarnessError;
use crate::identity::SessionIdentity;
use crate::keys::{self, KeyInjector};
use crate::locate::EditorPaths;
use crate::log::{LogEvent, RunLog};

/// Leave whatever mode the editor is in and quit without saving.
const QUIT_KEYS: &str = "<C-\\><C-N>:qa!<CR>";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Unix gVim forks and lets the spawned parent exit unless it stays in the
/// foreground; the recorded pid has to be the one that owns the window.
#[cfg(not(windows))]
const FOREGROUND_FLAGS: &[&str] = &["-f"];
#[cfg(windows)]
const FOREGROUND_FLAGS: &[&str] = &[];

#[cfg(windows)]
const NORMAL_PRIORITY_CLASS: u32 = 0x0000_0020;

/// The launched editor process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    child: Option<Child>,
}

impl ProcessHandle {
    pub fn new(pid: u32, child: Option<Child>) -> Self {
        Self { pid, child }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wait up to `grace` for the process to exit on its own.
    fn wait_for_exit(&mut self, grace: Duration) -> bool {
        let Some(child) = self.child.as_mut() else {
            return true;
        };
        let deadline = Instant::now() + grace;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return true,
                Ok(None) if Instant::now() < deadline => std::thread::sleep(EXIT_POLL_INTERVAL),
                Ok(None) => return false,
                Err(e) => {
                    warn!(pid = self.pid, error = %e, "failed to poll gvim exit status");
                    return false;
                }
            }
        }
    }

    fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Starts the GUI editor detached from the harness.
pub trait ProcessSpawner {
    fn spawn(&self, program: &Path, args: &[String]) -> Result<ProcessHandle>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedSpawner;

impl ProcessSpawner for DetachedSpawner {
    fn spawn(&self, program: &Path, args: &[String]) -> Result<ProcessHandle> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(NORMAL_PRIORITY_CLASS);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to launch {}", program.display()))?;
        Ok(ProcessHandle::new(child.id(), Some(child)))
    }
}

/// Settling delays the client applies on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTiming {
    /// After spawning gVim, before it is considered ready.
    pub launch_settle: Duration,
    /// Between focusing the window and typing.
    pub focus_settle: Duration,
}

impl From<&TimingConfig> for ClientTiming {
    fn from(config: &TimingConfig) -> Self {
        Self {
            launch_settle: config.launch_settle(),
            focus_settle: config.focus_settle(),
        }
    }
}

pub struct RemoteClient {
    paths: EditorPaths,
    channel: RemoteChannel,
    injector: Box<dyn KeyInjector>,
    spawner: Box<dyn ProcessSpawner>,
    timing: ClientTiming,
    identity: Option<SessionIdentity>,
    process: Option<ProcessHandle>,
    stopped: bool,
    run_log: Option<RunLog>,
}

/// GUI arguments for a launch under `identity`: server name, platform
/// foreground flags the caller did not already pass, then `flags`.
fn launch_args(identity: &SessionIdentity, flags: &[String]) -> Vec<String> {
    let mut args = vec!["--servername".to_string(), identity.to_string()];
    let already_foreground = flags.iter().any(|f| f == "-f" || f == "--nofork");
    if !already_foreground {
        args.extend(FOREGROUND_FLAGS.iter().map(|f| f.to_string()));
    }
    args.extend(flags.iter().cloned());
    args
}

impl RemoteClient {
    /// Client wired to real subprocesses and the platform input facility.
    pub fn new(paths: EditorPaths, timing: &TimingConfig) -> Self {
        Self::with_parts(
            paths,
            Box::new(ProcessRunner),
            keys::platform_injector(),
            Box::new(DetachedSpawner),
            timing,
        )
    }

    pub fn with_parts(
        paths: EditorPaths,
        runner: Box<dyn CommandRunner>,
        injector: Box<dyn KeyInjector>,
        spawner: Box<dyn ProcessSpawner>,
        timing: &TimingConfig,
    ) -> Self {
        let channel = RemoteChannel::new(paths.vim.clone(), timing.channel_timeout(), runner);
        Self {
            paths,
            channel,
            injector,
            spawner,
            timing: ClientTiming::from(timing),
            identity: None,
            process: None,
            stopped: false,
            run_log: None,
        }
    }

    pub fn with_run_log(mut self, run_log: RunLog) -> Self {
        self.run_log = Some(run_log);
        self
    }

    /// Address a server this client did not launch. Keystroke injection stays
    /// unavailable because there is no process handle.
    pub fn attach(&mut self, identity: SessionIdentity) {
        self.identity = Some(identity);
    }

    pub fn identity(&self) -> Option<&SessionIdentity> {
        self.identity.as_ref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(ProcessHandle::pid)
    }

    /// Server names currently registered with the channel.
    pub fn server_list(&self) -> Result<Vec<String>> {
        self.channel.server_list()
    }

    /// Derive a server name from the current time and make sure nobody holds it.
    pub fn generate_identity(&self) -> Result<SessionIdentity> {
        let registered = self.channel.server_list()?;
        SessionIdentity::generate(&chrono::Local::now(), &registered)
    }

    /// Spawn gVim under a fresh server name with `flags` appended.
    ///
    /// There is no readiness handshake: the client sleeps the launch settle
    /// delay and assumes the editor is listening afterwards.
    pub fn launch(&mut self, flags: &[String]) -> Result<SessionIdentity> {
        if let (Some(process), Some(identity)) = (&self.process, &self.identity) {
            return Err(HarnessError::AlreadyRunning {
                name: identity.to_string(),
                pid: process.pid(),
            }
            .into());
        }
        if self.stopped {
            let name = self
                .identity
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            return Err(HarnessError::AlreadyStopped { name }.into());
        }

        let identity = self.generate_identity()?;
        let args = launch_args(&identity, flags);

        let process = self.spawner.spawn(&self.paths.gvim, &args)?;
        let pid = process.pid();
        info!(server = %identity, pid, gvim = %self.paths.gvim.display(), "gvim launched");
        self.record(LogEvent::EditorLaunched {
            server_name: identity.to_string(),
            pid,
            gvim: self.paths.gvim.display().to_string(),
        });

        self.process = Some(process);
        self.identity = Some(identity.clone());
        std::thread::sleep(self.timing.launch_settle);
        Ok(identity)
    }

    fn require_identity(&self) -> Result<&SessionIdentity> {
        self.identity
            .as_ref()
            .ok_or_else(|| HarnessError::NotRunning.into())
    }

    /// Fire-and-forget `--remote-send`.
    pub fn send(&self, keys: &str) -> Result<()> {
        let identity = self.require_identity()?;
        self.channel.remote_send(identity.as_str(), keys)?;
        self.record(LogEvent::CommandSent {
            keys: keys.to_string(),
        });
        Ok(())
    }

    /// Synchronous `--remote-expr`; blocks until the editor answers.
    pub fn eval(&self, expr: &str) -> Result<String> {
        let identity = self.require_identity()?;
        let reply = self.channel.remote_expr(identity.as_str(), expr)?;
        self.record(LogEvent::ExpressionEvaluated {
            expr: expr.to_string(),
            reply: reply.clone(),
        });
        Ok(reply)
    }

    /// Focus the editor window and type `text` (Vim key notation).
    ///
    /// Best-effort: another window can steal focus between activation and
    /// typing.
    pub fn inject_keys(&self, text: &str) -> Result<()> {
        let process = self.process.as_ref().ok_or(HarnessError::NotRunning)?;

        self.injector.activate(process.pid())?;
        std::thread::sleep(self.timing.focus_settle);

        let keys = keys::parse_key_sequence(text);
        self.injector.send(&keys)?;
        debug!(pid = process.pid(), keys = %keys::describe(&keys), "keys injected");
        self.record(LogEvent::KeysInjected {
            keys: keys::describe(&keys),
        });
        Ok(())
    }

    /// Record a poll sample in the run log.
    pub fn record_poll_sample(&self, attempt: u32, line_count: usize) {
        self.record(LogEvent::PollSample {
            attempt,
            line_count,
        });
    }

    /// Append an event to the run log, if one is attached.
    pub fn record(&self, event: LogEvent) {
        if let Some(run_log) = &self.run_log {
            if let Err(e) = run_log.log(event) {
                warn!(error = %e, log = %run_log.path().display(), "failed to write run log");
            }
        }
    }

    /// Ask the editor to quit, then kill it if it is still around.
    ///
    /// Idempotent; a client that never launched does nothing.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        self.stopped = true;
        let server = self
            .identity
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();

        if let Err(e) = self.channel.remote_send(&server, QUIT_KEYS) {
            warn!(server = %server, error = %e, "quit command not delivered");
        }

        let forced = !process.wait_for_exit(SHUTDOWN_GRACE);
        if forced {
            warn!(server = %server, pid = process.pid(), "gvim still running, killing it");
            process.kill();
        }

        info!(server = %server, forced, "gvim stopped");
        self.record(LogEvent::EditorStopped {
            server_name: server,
            forced,
        });
        Ok(())
    }
}

impl Drop for RemoteClient {
    fn drop(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.kill();
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::rc::Rc;

    use super::*;
    use crate::channel::testing::ScriptedRunner;
    use crate::keys::testing::RecordingInjector;

    #[derive(Clone, Default)]
    pub struct RecordingSpawner {
        pub spawned: Rc<RefCell<Vec<(PathBuf, Vec<String>)>>>,
    }

    impl ProcessSpawner for RecordingSpawner {
        fn spawn(&self, program: &Path, args: &[String]) -> Result<ProcessHandle> {
            self.spawned
                .borrow_mut()
                .push((program.to_path_buf(), args.to_vec()));
            Ok(ProcessHandle::new(4242, None))
        }
    }

    pub fn instant_timing() -> TimingConfig {
        TimingConfig {
            launch_settle_millis: 0,
            focus_settle_millis: 0,
            keystroke_settle_millis: 0,
            snapshot_settle_millis: 0,
            channel_timeout_secs: 1,
        }
    }

    pub struct Fixture {
        pub runner: ScriptedRunner,
        pub injector: RecordingInjector,
        pub spawner: RecordingSpawner,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                runner: ScriptedRunner::default(),
                injector: RecordingInjector::default(),
                spawner: RecordingSpawner::default(),
            }
        }

        pub fn client(&self) -> RemoteClient {
            RemoteClient::with_parts(
                EditorPaths {
                    gvim: PathBuf::from("/opt/vim/gvim"),
                    vim: PathBuf::from("/opt/vim/vim"),
                },
                Box::new(self.runner.clone()),
                Box::new(self.injector.clone()),
                Box::new(self.spawner.clone()),
                &instant_timing(),
            )
        }

        /// A client that has already launched under `server`.
        pub fn launched_client(&self, server: &str) -> RemoteClient {
            let mut client = self.client();
            client.identity = Some(SessionIdentity::from_existing(server));
            client.process = Some(ProcessHandle::new(4242, None));
            client
        }
    }
}
