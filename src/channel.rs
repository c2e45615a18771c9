//! The `--remote-*` control channel.
//!
//! Every operation is a single blocking invocation of the console editor
//! binary: `--serverlist`, `--servername <id> --remote-send <keys>` or
//! `--servername <id> --remote-expr <expr>`. There is no connection state;
//! the running gVim owns all of it.
//!
//! Output parsing lives in small named functions so the offset rules are
//! tested in one place instead of being sliced inline at call sites.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::error::HarnessError;

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Captured result of one channel subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs one console-editor invocation to completion.
///
/// Implementations must enforce `timeout` and report an overrun as a
/// `HarnessError::Channel`.
pub trait CommandRunner {
    fn run(&self, program: &Path, args: &[String], timeout: Duration) -> Result<CommandOutput>;
}

/// Spawns a real subprocess and waits for it with a deadline.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, program: &Path, args: &[String], timeout: Duration) -> Result<CommandOutput> {
        let operation = describe_invocation(args);
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                HarnessError::channel(&operation, format!("failed to run {}: {e}", program.display()))
            })?;

        // Drain pipes on their own threads so a chatty child cannot block on a
        // full pipe while we wait for it to exit.
        let stdout_reader = child.stdout.take().map(spawn_pipe_reader);
        let stderr_reader = child.stderr.take().map(spawn_pipe_reader);

        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child
                .try_wait()
                .with_context(|| format!("failed to wait for {}", program.display()))?
            {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                warn!(operation = %operation, timeout_ms = timeout.as_millis() as u64, "channel call timed out");
                return Err(HarnessError::channel(
                    &operation,
                    format!("timed out after {}ms", timeout.as_millis()),
                )
                .into());
            }
            std::thread::sleep(CHILD_POLL_INTERVAL);
        };

        let stdout = stdout_reader.map(join_pipe_reader).unwrap_or_default();
        let stderr = stderr_reader.map(join_pipe_reader).unwrap_or_default();

        Ok(CommandOutput {
            success: status.success(),
            exit_code: status.code(),
            stdout,
            stderr,
        })
    }
}

fn spawn_pipe_reader<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_pipe_reader(handle: std::thread::JoinHandle<Vec<u8>>) -> String {
    let bytes = handle.join().unwrap_or_default();
    String::from_utf8_lossy(&bytes).to_string()
}

/// Short label for logs and errors, e.g. `--remote-expr`.
fn describe_invocation(args: &[String]) -> String {
    args.iter()
        .find(|a| a.starts_with("--") && a.as_str() != "--servername")
        .cloned()
        .unwrap_or_else(|| "vim".to_string())
}

/// Typed front end over the console editor binary.
pub struct RemoteChannel {
    vim: PathBuf,
    timeout: Duration,
    runner: Box<dyn CommandRunner>,
}

impl RemoteChannel {
    pub fn new(vim: PathBuf, timeout: Duration, runner: Box<dyn CommandRunner>) -> Self {
        Self {
            vim,
            timeout,
            runner,
        }
    }

    /// Names of every server currently registered with the channel.
    pub fn server_list(&self) -> Result<Vec<String>> {
        let output = self.invoke(vec!["--serverlist".to_string()])?;
        let servers = parse_server_list(&output);
        debug!(count = servers.len(), "server list read");
        Ok(servers)
    }

    /// Fire-and-forget: the target interprets `keys` as typed input.
    pub fn remote_send(&self, server: &str, keys: &str) -> Result<()> {
        self.invoke(vec![
            "--servername".to_string(),
            server.to_string(),
            "--remote-send".to_string(),
            keys.to_string(),
        ])?;
        debug!(server = server, keys = keys, "remote-send");
        Ok(())
    }

    /// Evaluate `expr` inside the target and return its textual value.
    pub fn remote_expr(&self, server: &str, expr: &str) -> Result<String> {
        let output = self.invoke(vec![
            "--servername".to_string(),
            server.to_string(),
            "--remote-expr".to_string(),
            expr.to_string(),
        ])?;
        let reply = parse_expr_reply(&output).to_string();
        debug!(server = server, expr = expr, reply = %reply, "remote-expr");
        Ok(reply)
    }

    fn invoke(&self, args: Vec<String>) -> Result<String> {
        let operation = describe_invocation(&args);
        let output = self.runner.run(&self.vim, &args, self.timeout)?;
        if !output.success {
            let detail = match output.exit_code {
                Some(code) => format!("exit status {code}: {}", output.stderr.trim()),
                None => format!("terminated by signal: {}", output.stderr.trim()),
            };
            return Err(HarnessError::channel(operation, detail).into());
        }
        Ok(output.stdout)
    }
}

/// Split `--serverlist` output into names.
///
/// One name per line; blank lines and surrounding whitespace (including the
/// `\r` of CRLF output) are dropped.
pub fn parse_server_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Strip exactly one trailing line terminator from a `--remote-expr` reply.
///
/// The console editor prints the value followed by `\n` (`\r\n` on Windows).
/// Only that terminator is removed: a value that itself ends in whitespace
/// keeps it, which matters when the value is a prompt whose trailing space
/// is part of the prefix to strip later.
pub fn parse_expr_reply(output: &str) -> &str {
    if let Some(rest) = output.strip_suffix("\r\n") {
        rest
    } else if let Some(rest) = output.strip_suffix('\n') {
        rest
    } else {
        output
    }
}

/// Parse an integer `--remote-expr` reply such as `line('$')`.
pub fn parse_line_count(reply: &str) -> Result<usize> {
    reply.trim().parse::<usize>().map_err(|e| {
        HarnessError::channel("--remote-expr", format!("expected a line count, got {reply:?}: {e}"))
            .into()
    })
}

/// Make arbitrary text safe to embed in a `--remote-send` key string.
///
/// Remote-send text is key notation, so a literal `<` has to be spelled `<lt>`.
pub fn escape_literal(text: &str) -> String {
    text.replace('<', "<lt>")
}

fn is_ex_special(c: char) -> bool {
    matches!(c, ' ' | '%' | '#' | '|' | '"')
}

/// Escape a file name for use as an Ex command argument, like `fnameescape()`.
pub fn fnameescape(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if is_ex_special(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
