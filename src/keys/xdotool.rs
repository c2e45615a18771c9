//! X11 keystroke injection through the `xdotool` CLI.

use std::process::Command;

use anyhow::{Context, Result};
use tracing::debug;

use super::{Key, KeyInjector};
use crate::error::HarnessError;

/// Per-character delay for `xdotool type --delay`; the harness settles after
/// typing instead.
const TYPE_DELAY_MILLIS: u32 = 0;

/// Drives `xdotool search --pid`, `windowactivate` and `type`/`key`.
#[derive(Debug, Clone)]
pub struct XdotoolInjector {
    program: String,
}

impl Default for XdotoolInjector {
    fn default() -> Self {
        Self {
            program: "xdotool".to_string(),
        }
    }
}

impl XdotoolInjector {
    fn run(&self, args: &[String]) -> Result<String> {
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .with_context(|| format!("failed to run {} (is it installed?)", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HarnessError::Injection(format!(
                "{} {} failed: {}",
                self.program,
                args.first().map(String::as_str).unwrap_or_default(),
                stderr.trim()
            ))
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl KeyInjector for XdotoolInjector {
    fn activate(&self, pid: u32) -> Result<()> {
        let found = self.run(&[
            "search".to_string(),
            "--onlyvisible".to_string(),
            "--pid".to_string(),
            pid.to_string(),
        ])?;
        let window = found
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| HarnessError::Injection(format!("no visible window for pid {pid}")))?
            .to_string();

        self.run(&["windowactivate".to_string(), "--sync".to_string(), window.clone()])?;
        debug!(pid, window = %window, "window activated");
        Ok(())
    }

    fn send(&self, keys: &[Key]) -> Result<()> {
        for invocation in xdotool_invocations(keys, TYPE_DELAY_MILLIS) {
            self.run(&invocation)?;
        }
        Ok(())
    }
}

fn keysym(key: Key) -> Option<&'static str> {
    match key {
        Key::Enter => Some("Return"),
        Key::Escape => Some("Escape"),
        Key::Tab => Some("Tab"),
        Key::Backspace => Some("BackSpace"),
        Key::Char(_) => None,
    }
}

/// Group runs of printable characters into one `type` call and named keys
/// into one `key` call each.
fn xdotool_invocations(keys: &[Key], delay_millis: u32) -> Vec<Vec<String>> {
    let mut invocations = Vec::new();
    let mut pending = String::new();

    let flush = |pending: &mut String, invocations: &mut Vec<Vec<String>>| {
        if !pending.is_empty() {
            invocations.push(vec![
                "type".to_string(),
                "--delay".to_string(),
                delay_millis.to_string(),
                "--".to_string(),
                std::mem::take(pending),
            ]);
        }
    };

    for key in keys {
        match (key, keysym(*key)) {
            (Key::Char(c), _) => pending.push(*c),
            (_, Some(sym)) => {
                flush(&mut pending, &mut invocations);
                invocations.push(vec!["key".to_string(), sym.to_string()]);
            }
            (_, None) => {}
        }
    }
    flush(&mut pending, &mut invocations);

    invocations
}
